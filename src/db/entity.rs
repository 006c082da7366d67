/// 待处理的好友请求
pub mod friend_request {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "friend_request")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        /// 协议端下发的请求标识
        pub flag: String,
        pub user_id: i64,
        pub comment: String,
        /// 七位数字编号，处理完成后清空
        #[sea_orm(nullable)]
        pub token: Option<String>,
        pub finished: bool,
        #[sea_orm(nullable)]
        pub finished_by: Option<i64>,
        #[sea_orm(nullable)]
        pub finished_at: Option<DateTimeUtc>,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// 待处理的加群请求 / 群邀请
pub mod group_invite {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "group_invite")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub flag: String,
        /// add / invite
        pub sub_type: String,
        pub group_id: i64,
        pub user_id: i64,
        pub comment: String,
        #[sea_orm(nullable)]
        pub token: Option<String>,
        pub finished: bool,
        #[sea_orm(nullable)]
        pub finished_by: Option<i64>,
        #[sea_orm(nullable)]
        pub finished_at: Option<DateTimeUtc>,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
