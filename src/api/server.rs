use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use super::{ApiError, http_client, read_json, with_token};
use crate::event::get_i64;
use crate::{debug, error};

/// 服务端实例管理 API
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn start_instance(&self) -> bool;

    async fn stop_instance(&self) -> bool;

    /// 登录二维码 (PNG)
    async fn get_qrcode(&self) -> Option<Vec<u8>>;

    async fn get_status(&self) -> Option<Value>;

    async fn upload_file(&self, path: &Path) -> Option<Value>;
}

/// KenkoGo 服务端 HTTP 接口
///
/// 响应格式: `{ code, msg, data }`，code 为 200 表示成功
pub struct ServerApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ServerApi {
    pub fn new(host_and_port: &str, token: &str) -> Self {
        Self::with_base_url(format!("http://{}", host_and_port), token)
    }

    pub fn with_base_url(base_url: String, token: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 校验 `{code, msg, data}` 并取出 data
    fn unwrap_data(resp: Value) -> Result<Value, ApiError> {
        let code = get_i64(&resp, "code").unwrap_or(-1);
        if code != 200 {
            let msg = resp
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Error")
                .to_string();
            return Err(ApiError::Failed { code, msg });
        }
        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn post_empty(&self, path: &str) -> Result<Value, ApiError> {
        let req = with_token(self.client.post(self.url(path)), &self.token);
        Self::unwrap_data(read_json(req.send().await?).await?)
    }

    async fn instance_action(&self, path: &str, label: &str) -> bool {
        debug!(target: "ServerApi", "{}实例...", label);
        match self.post_empty(path).await {
            Ok(_) => {
                debug!(target: "ServerApi", "实例已{}", label);
                true
            }
            Err(e) => {
                error!(target: "ServerApi", "实例{}失败: {}", label, e);
                false
            }
        }
    }

    async fn fetch_qrcode(&self) -> Result<Option<Vec<u8>>, ApiError> {
        let req = with_token(self.client.get(self.url("/instance/qrcode")), &self.token);
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status()));
        }

        let is_png = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim() == "image/png")
            .unwrap_or(false);
        if !is_png {
            error!(target: "ServerApi", "二维码响应的 Content-Type 不是 image/png");
            return Ok(None);
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn send_file(&self, path: &Path) -> Result<Value, ApiError> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let part = reqwest::multipart::Part::bytes(content).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let req = with_token(self.client.post(self.url("/file/upload")), &self.token);
        Self::unwrap_data(read_json(req.multipart(form).send().await?).await?)
    }
}

#[async_trait]
impl BackendApi for ServerApi {
    async fn start_instance(&self) -> bool {
        self.instance_action("/instance/start", "启动").await
    }

    async fn stop_instance(&self) -> bool {
        self.instance_action("/instance/stop", "停止").await
    }

    async fn get_qrcode(&self) -> Option<Vec<u8>> {
        match self.fetch_qrcode().await {
            Ok(png) => png,
            Err(e) => {
                error!(target: "ServerApi", "获取二维码失败: {}", e);
                None
            }
        }
    }

    async fn get_status(&self) -> Option<Value> {
        let req = with_token(self.client.get(self.url("/info")), &self.token);
        let result = match req.send().await {
            Ok(resp) => read_json(resp).await.and_then(Self::unwrap_data),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(data) => Some(data),
            Err(e) => {
                error!(target: "ServerApi", "获取服务端状态失败: {}", e);
                None
            }
        }
    }

    async fn upload_file(&self, path: &Path) -> Option<Value> {
        match self.send_file(path).await {
            Ok(info) => Some(info),
            Err(e) => {
                error!(target: "ServerApi", "上传文件 {} 失败: {}", path.display(), e);
                None
            }
        }
    }
}
