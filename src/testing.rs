//! 测试用的 API 替身与记录型插件

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::api::bot::MessageTarget;
use crate::api::{BackendApi, BotApi, ClientApi, GroupInfo, LoginInfo, StrangerInfo};
use crate::event::{Event, ReceiveCounter};
use crate::plugins::{Ack, EventResult, Plugin, PluginApis, PluginError, PluginMetadata};

pub const SELF_ID: i64 = 999;

/// 记录所有调用的 BotApi
#[derive(Default)]
pub struct RecordingBot {
    pub sent: Mutex<Vec<(MessageTarget, String)>>,
    pub friend_requests: Mutex<Vec<(String, bool)>>,
    pub group_requests: Mutex<Vec<(String, String, bool)>>,
    pub groups: Mutex<BTreeSet<i64>>,
    /// 为真时处理请求的接口返回失败
    pub reject_requests: AtomicBool,
}

impl RecordingBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(MessageTarget, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: MessageTarget) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl BotApi for RecordingBot {
    async fn send_private_msg(&self, user_id: i64, message: &str) -> Option<i64> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((MessageTarget::Private(user_id), message.to_string()));
        Some(sent.len() as i64)
    }

    async fn send_group_msg(&self, group_id: i64, message: &str) -> Option<Value> {
        self.sent
            .lock()
            .unwrap()
            .push((MessageTarget::Group(group_id), message.to_string()));
        Some(Value::Null)
    }

    async fn set_friend_add_request(&self, flag: &str, approve: bool, _remark: Option<&str>) -> bool {
        // 让出一次，模拟网络往返期间其他任务插入
        tokio::task::yield_now().await;
        if self.reject_requests.load(Ordering::SeqCst) {
            return false;
        }
        self.friend_requests
            .lock()
            .unwrap()
            .push((flag.to_string(), approve));
        true
    }

    async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        _reason: Option<&str>,
    ) -> bool {
        self.group_requests
            .lock()
            .unwrap()
            .push((flag.to_string(), sub_type.to_string(), approve));
        true
    }

    async fn get_login_info(&self) -> Option<LoginInfo> {
        Some(LoginInfo {
            user_id: SELF_ID,
            nickname: "kenko".to_string(),
        })
    }

    async fn get_group_info(&self, group_id: i64, _no_cache: bool) -> Option<GroupInfo> {
        Some(GroupInfo {
            group_id,
            group_name: format!("群{}", group_id),
            ..Default::default()
        })
    }

    async fn get_stranger_info(&self, user_id: i64, _no_cache: bool) -> Option<StrangerInfo> {
        Some(StrangerInfo {
            user_id,
            nickname: format!("用户{}", user_id),
            ..Default::default()
        })
    }

    async fn is_in_group(&self, group_id: i64) -> bool {
        self.groups.lock().unwrap().contains(&group_id)
    }
}

/// 不连接任何服务端的 BackendApi
pub struct NullBackend;

#[async_trait]
impl BackendApi for NullBackend {
    async fn start_instance(&self) -> bool {
        true
    }

    async fn stop_instance(&self) -> bool {
        true
    }

    async fn get_qrcode(&self) -> Option<Vec<u8>> {
        None
    }

    async fn get_status(&self) -> Option<Value> {
        Some(serde_json::json!({ "instance": "running" }))
    }

    async fn upload_file(&self, _path: &Path) -> Option<Value> {
        None
    }
}

pub fn test_apis(bot: Arc<RecordingBot>) -> PluginApis {
    PluginApis {
        bot,
        client: ClientApi::new(
            Arc::new(ReceiveCounter::new()),
            Arc::new(AtomicBool::new(true)),
        ),
        server: Arc::new(NullBackend),
    }
}

/// 插件行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Pass,
    Veto,
    Fail,
    Panic,
}

/// 记录调用顺序的插件
pub struct ScriptedPlugin {
    pub name: &'static str,
    pub behavior: Behavior,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPlugin {
    fn record(&self, what: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, what));
    }

    fn outcome(&self) -> Result<Ack, PluginError> {
        match self.behavior {
            Behavior::Fail => Err(PluginError::Hook(format!("{} failed", self.name))),
            Behavior::Panic => panic!("{} panicked", self.name),
            _ => Ok(Ack),
        }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(self.name, "scripted", "1.0.0")
    }

    async fn on_enable(&self) -> Result<Ack, PluginError> {
        self.record("enable");
        Ok(Ack)
    }

    async fn on_disable(&self) -> Result<Ack, PluginError> {
        self.record("disable");
        Ok(Ack)
    }

    async fn on_connect(&self) -> Result<Ack, PluginError> {
        self.record("connect");
        self.outcome()
    }

    async fn on_disconnect(&self) -> Result<Ack, PluginError> {
        self.record("disconnect");
        self.outcome()
    }

    async fn on_message(&self, _event: &Event) -> Result<EventResult, PluginError> {
        self.record("message");
        match self.behavior {
            Behavior::Pass => Ok(EventResult::Continue),
            Behavior::Veto => Ok(EventResult::Stop),
            Behavior::Fail => Err(PluginError::Hook(format!("{} failed", self.name))),
            Behavior::Panic => panic!("{} panicked", self.name),
        }
    }
}

pub fn call_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn touch_module(dir: &Path, module_name: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{}.rs", module_name)), "").unwrap();
}
