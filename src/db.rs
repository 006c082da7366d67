use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema};

use crate::info;

pub mod entity;
pub mod requests;

/// 初始化数据库连接并建表
pub async fn init(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(db_url).await?;
    create_tables(&db).await?;

    info!(target: "Database", "连接成功: {}", db_url);

    Ok(db)
}

/// 按实体定义建表 (已存在则跳过)
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, entity::friend_request::Entity).await?;
    create_table(db, entity::group_invite::Entity).await?;
    Ok(())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut create_table_stmt = schema.create_table_from_entity(entity);
    create_table_stmt.if_not_exists();

    db.execute(builder.build(&create_table_stmt)).await?;
    Ok(())
}

/// 关闭连接
pub async fn close(db: DatabaseConnection) {
    match db.close().await {
        Ok(()) => info!(target: "Database", "连接已关闭"),
        Err(e) => crate::error!(target: "Database", "关闭连接失败: {}", e),
    }
}
