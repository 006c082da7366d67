use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ConfigError, write_atomic};
use crate::debug;

/// 插件期望状态，按调度顺序持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginState {
    pub module_name: String,
    pub should_enable: bool,
}

/// 读取状态文件；文件不存在时返回空列表
pub async fn load(path: &Path) -> Result<Vec<PluginState>, ConfigError> {
    if !path.exists() {
        debug!(target: "Plugin", "状态文件 {} 不存在", path.display());
        return Ok(Vec::new());
    }

    let content = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&content)?)
}

/// 原子写入状态文件
pub async fn save(path: &Path, states: &[PluginState]) -> Result<(), ConfigError> {
    let content = serde_json::to_vec_pretty(states)?;
    write_atomic(path, content).await
}
