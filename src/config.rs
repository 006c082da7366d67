use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{debug, error};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件格式错误: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("配置序列化失败: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("状态文件格式错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("后台写入任务异常退出: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务端地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 服务端端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 访问令牌 (Bearer)
    #[serde(default)]
    pub token: String,
    /// 是否并发处理消息；关闭时所有事件严格按到达顺序处理
    #[serde(default)]
    pub multi_thread: bool,
    #[serde(default)]
    pub debug: bool,
    /// 测试模式会额外加载内置测试插件
    #[serde(default)]
    pub test_mode: bool,
    /// 插件目录
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// 插件启用状态文件
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// 待办请求数据库
    #[serde(default = "default_database")]
    pub database: String,
    /// 消息管理器配置
    #[serde(default)]
    pub message_manager: MessageConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18082
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugin")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("plugins.json")
}

fn default_database() -> String {
    // mode=rwc 允许 读/写/创建
    "sqlite:database.db?mode=rwc".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: String::new(),
            multi_thread: false,
            debug: false,
            test_mode: false,
            plugin_dir: default_plugin_dir(),
            state_file: default_state_file(),
            database: default_database(),
            message_manager: MessageConfig::default(),
        }
    }
}

impl AppConfig {
    /// `host:port`
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 消息管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// 管理员，无条件响应
    #[serde(default)]
    pub administrators: BTreeSet<i64>,
    /// 管理员指令前缀
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    #[serde(default = "default_true")]
    pub block_self: bool,
    #[serde(default)]
    pub block_private: bool,
    #[serde(default)]
    pub block_group: bool,
    #[serde(default)]
    pub block_guild: bool,
    /// 好友请求不再继续传递给插件
    #[serde(default)]
    pub block_friend_request: bool,
    /// 群邀请不再继续传递给插件
    #[serde(default)]
    pub block_group_invite: bool,
    /// 不记录好友请求，也不通知管理员
    #[serde(default)]
    pub ignore_friend_request: bool,
    #[serde(default)]
    pub ignore_group_invite: bool,

    /// 白名单模式：只响应白名单内的用户与群
    #[serde(default)]
    pub whitelist_mode: bool,
    #[serde(default)]
    pub whitelist_users: BTreeSet<i64>,
    #[serde(default)]
    pub whitelist_groups: BTreeSet<i64>,

    /// 屏蔽的账号，使得插件不响应
    #[serde(default)]
    pub block_users: BTreeSet<i64>,
    /// 屏蔽的群，使得插件不响应
    #[serde(default)]
    pub block_groups: BTreeSet<i64>,
    /// 忽略的用户，跳过过滤直接交给插件
    #[serde(default)]
    pub ignore_users: BTreeSet<i64>,
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "!".to_string()
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            enable: true,
            administrators: BTreeSet::new(),
            command_prefix: default_command_prefix(),
            block_self: true,
            block_private: false,
            block_group: false,
            block_guild: false,
            block_friend_request: false,
            block_group_invite: false,
            ignore_friend_request: false,
            ignore_group_invite: false,
            whitelist_mode: false,
            whitelist_users: BTreeSet::new(),
            whitelist_groups: BTreeSet::new(),
            block_users: BTreeSet::new(),
            block_groups: BTreeSet::new(),
            ignore_users: BTreeSet::new(),
        }
    }
}

impl MessageConfig {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.administrators.contains(&user_id)
    }
}

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(AppConfig::default()),
        }
    }

    /// 使用给定配置构造，不触碰磁盘上的内容 (用于测试与嵌入)
    pub fn with_config<P: AsRef<Path>>(path: P, cfg: AppConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(cfg),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub async fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.path.exists() {
            let default_cfg = AppConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let cfg: AppConfig = toml::from_str(&content)?;
        debug!(target: "Config", "已加载配置文件: {}", self.path.display());

        let mut write_lock = self.config.write().await;
        *write_lock = cfg.clone();

        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        let mut write_lock = self.config.write().await;
        let content = toml::to_string_pretty(cfg)?;
        write_atomic(&self.path, content.into_bytes()).await?;
        *write_lock = cfg.clone();

        Ok(())
    }

    /// 获取当前配置（只读快照）
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// 更新配置并保存
    ///
    /// 写锁一直持有到落盘完成，并发更新按顺序写入。
    /// 保存失败时内存中的修改保留，返回错误交由调用方上报
    pub async fn update<F>(&self, f: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut cfg = self.config.write().await;
        f(&mut cfg);
        let new_cfg = cfg.clone();

        let content = toml::to_string_pretty(&new_cfg)?;
        if let Err(e) = write_atomic(&self.path, content.into_bytes()).await {
            error!(target: "Config", "保存配置文件失败: {}", e);
            return Err(e);
        }
        Ok(new_cfg)
    }
}

/// 原子写文件：写入同目录下独立的临时文件、落盘、再 rename 覆盖目标
pub async fn write_atomic(path: &Path, content: Vec<u8>) -> Result<(), ConfigError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(&content)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await??;

    Ok(())
}
