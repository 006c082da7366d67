use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::event::ReceiveCounter;
use crate::{APP_NAME, VERSION};

/// 客户端自身状态
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientInfo {
    pub app_name: String,
    pub version: String,
    pub connected: bool,
    pub websocket_message_count: u64,
    pub uptime_secs: u64,
}

/// 客户端自省 API
#[derive(Clone)]
pub struct ClientApi {
    started: Instant,
    received: Arc<ReceiveCounter>,
    connected: Arc<AtomicBool>,
}

impl ClientApi {
    pub fn new(received: Arc<ReceiveCounter>, connected: Arc<AtomicBool>) -> Self {
        Self {
            started: Instant::now(),
            received,
            connected,
        }
    }

    pub fn get_info(&self) -> ClientInfo {
        ClientInfo {
            app_name: APP_NAME.to_string(),
            version: VERSION.to_string(),
            connected: self.connected.load(Ordering::Relaxed),
            websocket_message_count: self.received.get(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
