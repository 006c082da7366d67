use async_trait::async_trait;

use super::{EventResult, Plugin, PluginApis, PluginError, PluginMetadata};
use crate::event::Event;

/// 示例插件：只放行，不做任何处理
pub struct GoodbyeWorld {
    _apis: PluginApis,
}

pub fn create(apis: PluginApis) -> Box<dyn Plugin> {
    Box::new(GoodbyeWorld { _apis: apis })
}

#[async_trait]
impl Plugin for GoodbyeWorld {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("再见，世界！", "这还是一个插件示例", "1.2.3")
    }

    async fn on_message(&self, _event: &Event) -> Result<EventResult, PluginError> {
        Ok(EventResult::Continue)
    }
}
