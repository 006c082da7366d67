use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{Ack, EventResult, Plugin, PluginApis, PluginError, PluginMetadata};
use crate::event::Event;
use crate::{debug, info};

const REPLY: &str = "我希望你把篮球和鸡联系起来想想";

/// 示例插件：被 @ 时回复一句话
pub struct HelloWorld {
    apis: PluginApis,
    self_id: AtomicI64,
}

pub fn create(apis: PluginApis) -> Box<dyn Plugin> {
    Box::new(HelloWorld {
        apis,
        self_id: AtomicI64::new(0),
    })
}

/// `[CQ:at,qq=<id>]`
fn at_code(user_id: i64) -> String {
    format!("[CQ:at,qq={}]", user_id)
}

#[async_trait]
impl Plugin for HelloWorld {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "你好，世界！".to_string(),
            description: "这是一个插件示例".to_string(),
            long_description: "被 @ 时回复一句话".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    async fn on_enable(&self) -> Result<Ack, PluginError> {
        debug!(target: "HelloWorld", "enabled");
        Ok(Ack)
    }

    async fn on_disable(&self) -> Result<Ack, PluginError> {
        debug!(target: "HelloWorld", "disabled");
        Ok(Ack)
    }

    async fn on_connect(&self) -> Result<Ack, PluginError> {
        if let Some(login) = self.apis.bot.get_login_info().await {
            self.self_id.store(login.user_id, Ordering::Relaxed);
        }
        Ok(Ack)
    }

    async fn on_message(&self, event: &Event) -> Result<EventResult, PluginError> {
        let Some(msg) = event.as_message() else {
            return Ok(EventResult::Continue);
        };

        let self_id = match msg.self_id() {
            0 => self.self_id.load(Ordering::Relaxed),
            id => id,
        };
        if self_id != 0 && msg.text().contains(&at_code(self_id)) {
            info!(target: "HelloWorld", "有人叫我");
            self.apis.bot.send_msg(msg.0, REPLY).await?;
        }
        Ok(EventResult::Continue)
    }
}
