use async_trait::async_trait;

use super::{EventResult, Plugin, PluginApis, PluginError, PluginMetadata};
use crate::event::Event;
use crate::info;

/// 调试用插件，仅在测试模式下注册
pub struct TestPlugin {
    apis: PluginApis,
}

pub fn create(apis: PluginApis) -> Box<dyn Plugin> {
    Box::new(TestPlugin { apis })
}

#[async_trait]
impl Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("测试插件", "该插件仅作调试用处", "Test Only")
    }

    async fn on_message(&self, event: &Event) -> Result<EventResult, PluginError> {
        if let Some(msg) = event.as_message()
            && msg.text() == "tsa1"
        {
            let info = self.apis.client.get_info();
            info!(target: "TestPlugin", "收到测试指令，已接收 {} 条消息", info.websocket_message_count);
            let reply = format!(
                "{} {} 已接收 {} 条消息",
                info.app_name, info.version, info.websocket_message_count
            );
            self.apis.bot.send_msg(msg.0, &reply).await?;
        }
        Ok(EventResult::Continue)
    }
}
