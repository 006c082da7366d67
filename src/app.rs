use sea_orm::{DatabaseConnection, DbErr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::api::{ClientApi, GocqApi, ServerApi};
use crate::config::{AppConfig, ConfigError, ConfigManager};
use crate::db::{self, requests::RequestStore, requests::StoreError};
use crate::dispatch::Dispatcher;
use crate::event::ReceiveCounter;
use crate::message_manager::MessageManager;
use crate::plugins::{Plugin, PluginApis, PluginCatalog, PluginManager, test_plugin};
use crate::session::Session;
use crate::{debug, error, info, log};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("配置文件加载失败: {0}")]
    Config(#[from] ConfigError),

    #[error("数据库初始化失败: {0}")]
    Db(#[from] DbErr),

    #[error("请求存储初始化失败: {0}")]
    Store(#[from] StoreError),
}

/// 启动参数 (命令行覆盖配置文件)
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub debug: bool,
    pub test_mode: bool,
}

/// 应用上下文
///
/// 启动时构造一次，持有所有组件的句柄，代替进程级全局单例。
pub struct AppContext {
    pub config: Arc<ConfigManager>,
    pub apis: PluginApis,
    pub store: Arc<RequestStore>,
    pub plugins: Arc<Mutex<PluginManager>>,
    pub message_manager: Arc<MessageManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub session: Session,
    db: DatabaseConnection,
    worker: JoinHandle<()>,
}

impl AppContext {
    /// 按顺序初始化：配置 -> 数据库 -> API -> 插件 -> 消息管理器 -> 分发 -> 会话
    pub async fn build(config_path: &Path, options: Options) -> Result<Self, StartupError> {
        let config = Arc::new(ConfigManager::new(config_path));
        let cfg = config.load().await?;
        Self::build_with(config, cfg, options).await
    }

    pub async fn build_with(
        config: Arc<ConfigManager>,
        cfg: AppConfig,
        options: Options,
    ) -> Result<Self, StartupError> {
        if options.debug || cfg.debug {
            log::set_debug(true);
            debug!(target: "App", "调试模式已开启");
        }

        let db = db::init(&cfg.database).await?;
        let store = Arc::new(RequestStore::new(db.clone()).await?);

        let host_and_port = cfg.host_and_port();
        let counter = Arc::new(ReceiveCounter::new());
        let connected = Arc::new(AtomicBool::new(false));
        let apis = PluginApis {
            bot: Arc::new(GocqApi::new(&host_and_port, &cfg.token)),
            client: ClientApi::new(counter.clone(), connected.clone()),
            server: Arc::new(ServerApi::new(&host_and_port, &cfg.token)),
        };

        let mut manager = PluginManager::new(
            &cfg.plugin_dir,
            &cfg.state_file,
            PluginCatalog::builtin(),
            apis.clone(),
        );
        manager.load_persisted_state().await;
        if options.test_mode || cfg.test_mode {
            info!(target: "App", "测试模式：注册测试插件");
            manager.register_builtin("test_plugin", test_plugin::create);
        }
        manager.discover_local_modules().await;
        let initialized = manager.initialize_all_modules().await;
        let enabled = manager.enable_desired().await;
        info!(
            target: "App",
            "插件 {} 个，已初始化 {} 个，已启用 {} 个",
            manager.records().len(), initialized, enabled
        );
        let plugins = Arc::new(Mutex::new(manager));

        let message_manager = Arc::new(MessageManager::new(
            config.clone(),
            apis.clone(),
            store.clone(),
        ));
        if let Err(e) = message_manager.on_initialize().await {
            error!(target: "App", "消息管理器初始化失败: {}", e);
        }
        if let Err(e) = message_manager.on_enable().await {
            error!(target: "App", "消息管理器启用失败: {}", e);
        }

        let dispatcher = Arc::new(Dispatcher::new(message_manager.clone(), plugins.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(dispatcher.clone().run(rx, cfg.multi_thread));

        let session = Session::new(&host_and_port, &cfg.token, counter, connected, tx);

        Ok(Self {
            config,
            apis,
            store,
            plugins,
            message_manager,
            dispatcher,
            session,
            db,
            worker,
        })
    }

    /// 按相反顺序退出：停止接收 -> 处理完剩余事件 -> 禁用插件 -> 关闭数据库
    pub async fn shutdown(self) {
        let Self {
            plugins,
            message_manager,
            dispatcher,
            session,
            db,
            worker,
            ..
        } = self;

        session.stop().await;
        drop(session);
        if let Err(e) = worker.await {
            error!(target: "App", "分发循环异常退出: {}", e);
        }
        drop(dispatcher);

        plugins.lock().await.disable_all().await;
        if let Err(e) = message_manager.on_disable().await {
            error!(target: "App", "消息管理器禁用失败: {}", e);
        }

        db::close(db).await;
        info!(target: "App", "已退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::touch_module;

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig {
            port: 1,
            plugin_dir: dir.join("plugin"),
            state_file: dir.join("plugins.json"),
            database: format!("sqlite:{}?mode=rwc", dir.join("kenko.db").display()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn startup_loads_plugins_and_shutdown_disables_them() {
        let dir = tempfile::tempdir().unwrap();
        touch_module(&dir.path().join("plugin"), "hello_world_kenko");
        touch_module(&dir.path().join("plugin"), "unknown_kenko");

        let config = Arc::new(ConfigManager::with_config(
            dir.path().join("config.toml"),
            config_in(dir.path()),
        ));
        let app = AppContext::build_with(
            config.clone(),
            config_in(dir.path()),
            Options {
                debug: false,
                test_mode: true,
            },
        )
        .await
        .unwrap();

        {
            let pm = app.plugins.lock().await;
            let names: Vec<_> = pm.records().iter().map(|r| r.module_name.as_str()).collect();
            assert_eq!(names, ["test_plugin", "hello_world_kenko", "unknown_kenko"]);
            assert!(pm.records()[0].enable && pm.records()[1].enable);
            assert!(!pm.records()[2].loaded);
        }
        assert!(app.message_manager.is_enabled());

        let plugins = app.plugins.clone();
        let message_manager = app.message_manager.clone();
        app.shutdown().await;

        assert!(plugins.lock().await.records().iter().all(|r| !r.enable));
        assert!(!message_manager.is_enabled());
    }

    #[tokio::test]
    async fn corrupt_config_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "host = = 1").unwrap();

        let err = AppContext::build(&path, Options::default()).await.err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Parse(_))));
    }
}
