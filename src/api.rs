use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub mod bot;
pub mod client;
pub mod server;

pub use bot::{BotApi, GocqApi, GroupInfo, LoginInfo, StrangerInfo};
pub use client::{ClientApi, ClientInfo};
pub use server::{BackendApi, ServerApi};

/// 单次 HTTP 调用超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP 状态异常: {0}")]
    Status(reqwest::StatusCode),

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error("API 调用失败 (code={code}): {msg}")]
    Failed { code: i64, msg: String },

    #[error("消息中既没有 group_id 也没有 user_id")]
    NoTarget,

    #[error("文件读取失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 构造共享的 HTTP 客户端
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// `Authorization: Bearer <token>`，token 为空时不附加
pub(crate) fn with_token(req: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
    if token.is_empty() {
        req
    } else {
        req.bearer_auth(token)
    }
}

/// 读取响应体并解析为 JSON，非 2xx 视为失败
pub(crate) async fn read_json(resp: reqwest::Response) -> Result<Value, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Status(status));
    }

    let mut bytes = resp.bytes().await?.to_vec();
    simd_json::serde::from_slice(&mut bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
