use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, http_client, read_json, with_token};
use crate::event::get_i64;
use crate::{debug, error};

/// 登录号信息
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LoginInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub max_member_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StrangerInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub age: i64,
}

/// 消息发送目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Group(i64),
    Private(i64),
}

impl MessageTarget {
    /// 从事件或类事件数据中取出回复目标，group_id 优先
    pub fn from_value(target: &Value) -> Result<Self, ApiError> {
        if let Some(gid) = get_i64(target, "group_id") {
            Ok(MessageTarget::Group(gid))
        } else if let Some(uid) = get_i64(target, "user_id") {
            Ok(MessageTarget::Private(uid))
        } else {
            Err(ApiError::NoTarget)
        }
    }
}

/// 机器人协议 API
///
/// 调用失败时记录日志并返回 `None` / `false`，不会向调用方抛出传输错误。
#[async_trait]
pub trait BotApi: Send + Sync {
    /// 发送私聊消息，返回 message_id
    async fn send_private_msg(&self, user_id: i64, message: &str) -> Option<i64>;

    async fn send_group_msg(&self, group_id: i64, message: &str) -> Option<Value>;

    /// 按事件中的 group_id / user_id 回复
    async fn send_msg(&self, target: &Value, message: &str) -> Result<Option<Value>, ApiError> {
        match MessageTarget::from_value(target)? {
            MessageTarget::Group(gid) => Ok(self.send_group_msg(gid, message).await),
            MessageTarget::Private(uid) => Ok(self
                .send_private_msg(uid, message)
                .await
                .map(|id| json!({ "message_id": id }))),
        }
    }

    async fn set_friend_add_request(&self, flag: &str, approve: bool, remark: Option<&str>)
    -> bool;

    async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> bool;

    async fn get_login_info(&self) -> Option<LoginInfo>;

    async fn get_group_info(&self, group_id: i64, no_cache: bool) -> Option<GroupInfo>;

    async fn get_stranger_info(&self, user_id: i64, no_cache: bool) -> Option<StrangerInfo>;

    async fn get_nickname(&self, user_id: i64) -> Option<String> {
        self.get_stranger_info(user_id, false)
            .await
            .map(|info| info.nickname)
    }

    /// 机器人是否已在群内
    async fn is_in_group(&self, group_id: i64) -> bool;
}

/// 通过服务端转发的 go-cqhttp HTTP API
pub struct GocqApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GocqApi {
    pub fn new(host_and_port: &str, token: &str) -> Self {
        Self::with_base_url(format!("http://{}/client/api", host_and_port), token)
    }

    pub fn with_base_url(base_url: String, token: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// 通用 API 调用函数
    ///
    /// 响应格式: `{ status, retcode, data }`，返回 data 字段
    pub async fn call_action(&self, action: &str, params: Value) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, action);
        debug!(target: "BotApi", "调用 {}: {}", action, params);

        let req = with_token(self.client.post(&url).json(&params), &self.token);
        let resp = read_json(req.send().await?).await?;

        let retcode = get_i64(&resp, "retcode").unwrap_or(-1);
        if retcode != 0 {
            let msg = resp
                .get("wording")
                .or_else(|| resp.get("msg"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown Error")
                .to_string();
            return Err(ApiError::Failed { code: retcode, msg });
        }

        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn call_logged(&self, action: &str, params: Value) -> Option<Value> {
        match self.call_action(action, params).await {
            Ok(data) => Some(data),
            Err(e) => {
                error!(target: "BotApi", "{} 调用失败: {}", action, e);
                None
            }
        }
    }

    async fn call_typed<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        params: Value,
    ) -> Option<T> {
        let data = self.call_logged(action, params).await?;
        match serde_json::from_value(data) {
            Ok(v) => Some(v),
            Err(e) => {
                error!(target: "BotApi", "{} 返回数据无法解析: {}", action, e);
                None
            }
        }
    }
}

#[async_trait]
impl BotApi for GocqApi {
    async fn send_private_msg(&self, user_id: i64, message: &str) -> Option<i64> {
        let data = self
            .call_logged(
                "send_private_msg",
                json!({ "user_id": user_id, "message": message, "auto_escape": false }),
            )
            .await?;
        get_i64(&data, "message_id")
    }

    async fn send_group_msg(&self, group_id: i64, message: &str) -> Option<Value> {
        self.call_logged(
            "send_group_msg",
            json!({ "group_id": group_id, "message": message, "auto_escape": false }),
        )
        .await
    }

    async fn send_msg(&self, target: &Value, message: &str) -> Result<Option<Value>, ApiError> {
        let params = match MessageTarget::from_value(target)? {
            MessageTarget::Group(gid) => json!({ "group_id": gid, "message": message }),
            MessageTarget::Private(uid) => json!({ "user_id": uid, "message": message }),
        };
        Ok(self.call_logged("send_msg", params).await)
    }

    async fn set_friend_add_request(
        &self,
        flag: &str,
        approve: bool,
        remark: Option<&str>,
    ) -> bool {
        self.call_logged(
            "set_friend_add_request",
            json!({ "flag": flag, "approve": approve, "remark": remark.unwrap_or("") }),
        )
        .await
        .is_some()
    }

    async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: Option<&str>,
    ) -> bool {
        self.call_logged(
            "set_group_add_request",
            json!({
                "flag": flag,
                "sub_type": sub_type,
                "approve": approve,
                "reason": reason.unwrap_or(""),
            }),
        )
        .await
        .is_some()
    }

    async fn get_login_info(&self) -> Option<LoginInfo> {
        self.call_typed("get_login_info", json!({})).await
    }

    async fn get_group_info(&self, group_id: i64, no_cache: bool) -> Option<GroupInfo> {
        self.call_typed(
            "get_group_info",
            json!({ "group_id": group_id, "no_cache": no_cache }),
        )
        .await
    }

    async fn get_stranger_info(&self, user_id: i64, no_cache: bool) -> Option<StrangerInfo> {
        self.call_typed(
            "get_stranger_info",
            json!({ "user_id": user_id, "no_cache": no_cache }),
        )
        .await
    }

    async fn is_in_group(&self, group_id: i64) -> bool {
        let Some(groups) = self.call_logged("get_group_list", json!({})).await else {
            return false;
        };
        groups
            .as_array()
            .map(|list| list.iter().any(|g| get_i64(g, "group_id") == Some(group_id)))
            .unwrap_or(false)
    }
}
