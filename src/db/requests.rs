use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::Mutex;

use super::entity::{friend_request, group_invite};
use crate::{debug, info};

/// 单个编号的最大重试次数
const MAX_TOKEN_ATTEMPTS: usize = 64;
/// 编号位数
const TOKEN_DIGITS: usize = 7;
const TOKEN_SPACE: u32 = 10_000_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Db(#[from] DbErr),

    #[error("无法分配空闲的请求编号")]
    TokensExhausted,
}

/// 未完成请求编号池
///
/// 同一时刻每个编号至多对应一条未完成的请求。
#[derive(Debug, Default)]
pub struct TokenPool {
    open: HashSet<String>,
}

impl TokenPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        Self {
            open: tokens.into_iter().collect(),
        }
    }

    /// 分配一个新编号，碰撞时重试
    pub fn issue(&mut self) -> Result<String, StoreError> {
        let mut rng = rand::rng();
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let n: u32 = rng.random_range(0..TOKEN_SPACE);
            let token = format!("{:0width$}", n, width = TOKEN_DIGITS);
            if self.open.insert(token.clone()) {
                return Ok(token);
            }
        }
        Err(StoreError::TokensExhausted)
    }

    pub fn release(&mut self, token: &str) -> bool {
        self.open.remove(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.open.contains(token)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// 一条未完成的请求
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRequest {
    Friend(friend_request::Model),
    Group(group_invite::Model),
}

impl PendingRequest {
    pub fn flag(&self) -> &str {
        match self {
            PendingRequest::Friend(m) => &m.flag,
            PendingRequest::Group(m) => &m.flag,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            PendingRequest::Friend(m) => m.token.as_deref(),
            PendingRequest::Group(m) => m.token.as_deref(),
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            PendingRequest::Friend(m) => m.user_id,
            PendingRequest::Group(m) => m.user_id,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            PendingRequest::Friend(m) => &m.comment,
            PendingRequest::Group(m) => &m.comment,
        }
    }

    /// 待办列表中的一行
    pub fn describe(&self) -> String {
        let token = self.token().unwrap_or("-");
        match self {
            PendingRequest::Friend(m) => {
                format!("[{}] 好友请求 {} 验证信息: {}", token, m.user_id, m.comment)
            }
            PendingRequest::Group(m) => format!(
                "[{}] 群邀请 群 {} 来自 {} 验证信息: {}",
                token, m.group_id, m.user_id, m.comment
            ),
        }
    }
}

/// 待处理请求存储
pub struct RequestStore {
    db: DatabaseConnection,
    tokens: Mutex<TokenPool>,
    /// 正在处理中的编号，处理完成或放弃前其他人无法再次认领
    claimed: Mutex<HashSet<String>>,
}

impl RequestStore {
    /// 以数据库中未完成的请求编号初始化编号池
    pub async fn new(db: DatabaseConnection) -> Result<Self, StoreError> {
        super::create_tables(&db).await?;

        let mut open = Vec::new();
        for m in friend_request::Entity::find()
            .filter(friend_request::Column::Finished.eq(false))
            .all(&db)
            .await?
        {
            open.extend(m.token);
        }
        for m in group_invite::Entity::find()
            .filter(group_invite::Column::Finished.eq(false))
            .all(&db)
            .await?
        {
            open.extend(m.token);
        }

        debug!(target: "Database", "载入 {} 条未完成的请求", open.len());

        Ok(Self {
            db,
            tokens: Mutex::new(TokenPool::with_open(open)),
            claimed: Mutex::new(HashSet::new()),
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 记录好友请求，返回编号；同一 flag 重复上报时复用原编号
    pub async fn add_friend_request(
        &self,
        flag: &str,
        user_id: i64,
        comment: &str,
    ) -> Result<String, StoreError> {
        let mut pool = self.tokens.lock().await;

        let existing = friend_request::Entity::find()
            .filter(friend_request::Column::Flag.eq(flag))
            .filter(friend_request::Column::Finished.eq(false))
            .one(&self.db)
            .await?;
        if let Some(token) = existing.and_then(|m| m.token) {
            return Ok(token);
        }

        let token = pool.issue()?;
        let record = friend_request::ActiveModel {
            flag: Set(flag.to_string()),
            user_id: Set(user_id),
            comment: Set(comment.to_string()),
            token: Set(Some(token.clone())),
            finished: Set(false),
            finished_by: Set(None),
            finished_at: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = record.insert(&self.db).await {
            pool.release(&token);
            return Err(e.into());
        }

        info!(target: "Database", "记录好友请求 {} -> [{}]", user_id, token);
        Ok(token)
    }

    /// 记录群邀请 / 加群请求，返回编号
    pub async fn add_group_invite(
        &self,
        flag: &str,
        sub_type: &str,
        group_id: i64,
        user_id: i64,
        comment: &str,
    ) -> Result<String, StoreError> {
        let mut pool = self.tokens.lock().await;

        let existing = group_invite::Entity::find()
            .filter(group_invite::Column::Flag.eq(flag))
            .filter(group_invite::Column::Finished.eq(false))
            .one(&self.db)
            .await?;
        if let Some(token) = existing.and_then(|m| m.token) {
            return Ok(token);
        }

        let token = pool.issue()?;
        let record = group_invite::ActiveModel {
            flag: Set(flag.to_string()),
            sub_type: Set(sub_type.to_string()),
            group_id: Set(group_id),
            user_id: Set(user_id),
            comment: Set(comment.to_string()),
            token: Set(Some(token.clone())),
            finished: Set(false),
            finished_by: Set(None),
            finished_at: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = record.insert(&self.db).await {
            pool.release(&token);
            return Err(e.into());
        }

        info!(target: "Database", "记录群邀请 群 {} 来自 {} -> [{}]", group_id, user_id, token);
        Ok(token)
    }

    /// 按编号查找未完成的请求，好友请求优先
    pub async fn find_open(&self, token: &str) -> Result<Option<PendingRequest>, StoreError> {
        if let Some(m) = friend_request::Entity::find()
            .filter(friend_request::Column::Token.eq(token))
            .filter(friend_request::Column::Finished.eq(false))
            .one(&self.db)
            .await?
        {
            return Ok(Some(PendingRequest::Friend(m)));
        }

        let group = group_invite::Entity::find()
            .filter(group_invite::Column::Token.eq(token))
            .filter(group_invite::Column::Finished.eq(false))
            .one(&self.db)
            .await?;
        Ok(group.map(PendingRequest::Group))
    }

    /// 认领一条未完成的请求
    ///
    /// 已被认领或不存在时返回 `None`。认领后须调用 `finish` 或 `release_claim`。
    pub async fn claim(&self, token: &str) -> Result<Option<PendingRequest>, StoreError> {
        let mut claimed = self.claimed.lock().await;
        if claimed.contains(token) {
            debug!(target: "Database", "请求 [{}] 正在处理中", token);
            return Ok(None);
        }

        let request = self.find_open(token).await?;
        if request.is_some() {
            claimed.insert(token.to_string());
        }
        Ok(request)
    }

    /// 放弃认领，编号重新可用
    pub async fn release_claim(&self, token: &str) {
        self.claimed.lock().await.remove(token);
    }

    /// 标记请求已处理：清空编号并归还编号池
    pub async fn finish(&self, request: &PendingRequest, finished_by: i64) -> Result<(), StoreError> {
        let mut pool = self.tokens.lock().await;
        let now = Utc::now();

        match request {
            PendingRequest::Friend(m) => {
                let mut active: friend_request::ActiveModel = m.clone().into();
                active.finished = Set(true);
                active.token = Set(None);
                active.finished_by = Set(Some(finished_by));
                active.finished_at = Set(Some(now));
                active.update(&self.db).await?;
            }
            PendingRequest::Group(m) => {
                let mut active: group_invite::ActiveModel = m.clone().into();
                active.finished = Set(true);
                active.token = Set(None);
                active.finished_by = Set(Some(finished_by));
                active.finished_at = Set(Some(now));
                active.update(&self.db).await?;
            }
        }

        if let Some(token) = request.token() {
            pool.release(token);
            self.claimed.lock().await.remove(token);
        }
        Ok(())
    }

    /// 所有未完成的请求，按创建时间排序
    pub async fn list_open(&self) -> Result<Vec<PendingRequest>, StoreError> {
        let mut result: Vec<PendingRequest> = friend_request::Entity::find()
            .filter(friend_request::Column::Finished.eq(false))
            .order_by_asc(friend_request::Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(PendingRequest::Friend)
            .collect();

        result.extend(
            group_invite::Entity::find()
                .filter(group_invite::Column::Finished.eq(false))
                .order_by_asc(group_invite::Column::CreatedAt)
                .all(&self.db)
                .await?
                .into_iter()
                .map(PendingRequest::Group),
        );
        Ok(result)
    }

    /// 当前占用中的编号数量
    pub async fn open_token_count(&self) -> usize {
        self.tokens.lock().await.len()
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> RequestStore {
    let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = sea_orm::Database::connect(opt).await.unwrap();
    RequestStore::new(db).await.unwrap()
}
