use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

use crate::api::{ApiError, BackendApi, BotApi, ClientApi};
use crate::config::ConfigError;
use crate::db::requests::StoreError;
use crate::event::Event;

pub mod goodbye_world;
pub mod hello_world;
pub mod manager;
pub mod state;
pub mod test_plugin;

pub use manager::{PluginManager, PluginRecord};

/// 插件模块名后缀，只有以此结尾的模块会被加载
pub const MODULE_SUFFIX: &str = "_kenko";

/// 元数据中表示版本错误的占位值
pub const VERSION_ERROR: &str = "#ERROR#";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("模块 {0} 不存在")]
    ModuleNotFound(String),

    #[error("类 {0} 不存在")]
    ClassNotFound(String),

    #[error("插件 {class} 的元数据字段 {field} 无效")]
    InvalidMetadata { class: String, field: &'static str },

    #[error("插件 {0} 尚未加载")]
    NotLoaded(String),

    #[error("{0}")]
    Hook(String),

    #[error("插件发生 panic: {0}")]
    Panicked(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// 生命周期钩子的确认信号
///
/// 钩子返回 `Ok(Ack)` 才视为成功完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack;

/// 事件处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventResult {
    /// 继续传递事件给后续插件
    #[default]
    Continue,
    /// 停止传递事件（事件已被处理）
    Stop,
}

/// 插件信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginMetadata {
    pub name: String,
    pub description: String,
    pub long_description: String,
    pub author: String,
    pub help_text: String,
    pub link: String,
    pub version: String,
}

impl PluginMetadata {
    pub fn new(name: &str, description: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    /// 校验必填字段：name、description、version
    pub fn validate(&self, class: &str) -> Result<(), PluginError> {
        let invalid = |field| PluginError::InvalidMetadata {
            class: class.to_string(),
            field,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name"));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description"));
        }
        if self.version.trim().is_empty() || self.version.eq_ignore_ascii_case(VERSION_ERROR) {
            return Err(invalid("version"));
        }
        Ok(())
    }
}

/// 注入给插件的外部能力
#[derive(Clone)]
pub struct PluginApis {
    pub bot: Arc<dyn BotApi>,
    pub client: ClientApi,
    pub server: Arc<dyn BackendApi>,
}

/// 业务逻辑插件接口
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件信息
    fn metadata(&self) -> PluginMetadata;

    /// 插件加载完成
    async fn on_initialize(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 插件被启用
    async fn on_enable(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 插件将被禁用
    async fn on_before_disable(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 插件已被禁用，可用于清理资源
    async fn on_disable(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 已连接到服务端
    async fn on_connect(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 已断开服务端连接
    async fn on_disconnect(&self) -> Result<Ack, PluginError> {
        Ok(Ack)
    }

    /// 收到上报事件 (message / notice / request)
    async fn on_message(&self, _event: &Event) -> Result<EventResult, PluginError> {
        Ok(EventResult::Continue)
    }
}

/// 插件构造函数
pub type PluginFactory = Arc<dyn Fn(PluginApis) -> Box<dyn Plugin> + Send + Sync>;

/// 编译期插件目录：类名 -> 构造函数
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 随程序发布的插件
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("HelloWorld", hello_world::create);
        catalog.register("GoodbyeWorld", goodbye_world::create);
        catalog
    }

    pub fn register<F>(&mut self, class_name: &str, factory: F)
    where
        F: Fn(PluginApis) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories
            .insert(class_name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, class_name: &str) -> Option<PluginFactory> {
        self.factories.get(class_name).cloned()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }
}

/// `hello_world_kenko` -> `HelloWorld`
pub fn camelize(module_name: &str) -> String {
    module_name
        .strip_suffix(MODULE_SUFFIX)
        .unwrap_or(module_name)
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 执行插件钩子，panic 转换为 `PluginError::Panicked`
pub async fn guarded<T, F>(fut: F) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked(panic_message(payload))),
    }
}

/// 调用构造函数，panic 转换为 `PluginError::Panicked`
pub fn construct(
    factory: &PluginFactory,
    apis: PluginApis,
) -> Result<Box<dyn Plugin>, PluginError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| factory(apis)))
        .map_err(|payload| PluginError::Panicked(panic_message(payload)))
}

/// 读取并校验插件元数据
pub fn read_metadata(plugin: &dyn Plugin, class: &str) -> Result<PluginMetadata, PluginError> {
    let metadata = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.metadata()))
        .map_err(|payload| PluginError::Panicked(panic_message(payload)))?;
    metadata.validate(class)?;
    Ok(metadata)
}
