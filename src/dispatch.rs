use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::event::Event;
use crate::message_manager::MessageManager;
use crate::plugins::{EventResult, Plugin, PluginManager, guarded};
use crate::{debug, error, info, warn};

/// 传输会话交给分发引擎的输入
#[derive(Debug)]
pub enum Inbound {
    Connected,
    Disconnected,
    Event(Event),
}

/// 分发引擎
///
/// 事件依次经过消息管理器与所有已启用插件，任一环节返回 `Stop` 即终止。
pub struct Dispatcher {
    policy: Arc<MessageManager>,
    plugins: Arc<Mutex<PluginManager>>,
}

impl Dispatcher {
    pub fn new(policy: Arc<MessageManager>, plugins: Arc<Mutex<PluginManager>>) -> Self {
        Self { policy, plugins }
    }

    pub fn plugins(&self) -> &Arc<Mutex<PluginManager>> {
        &self.plugins
    }

    /// 取已启用插件快照后立即释放锁，插件回调期间可再次操作注册表
    async fn snapshot(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.plugins.lock().await.enabled_plugins()
    }

    pub async fn dispatch_message(&self, event: &Event) {
        match guarded(self.policy.on_message(event)).await {
            Ok(EventResult::Continue) => {}
            Ok(EventResult::Stop) => {
                debug!(target: "Dispatch", "事件已被消息管理器拦截");
                return;
            }
            Err(e) => {
                error!(target: "Dispatch", "消息管理器处理失败: {}", e);
                return;
            }
        }

        for (name, plugin) in self.snapshot().await {
            match guarded(plugin.on_message(event)).await {
                Ok(EventResult::Continue) => {}
                Ok(EventResult::Stop) => {
                    debug!(target: "Dispatch", "事件已被 {} 拦截", name);
                    break;
                }
                Err(e) => error!(target: "Dispatch", "插件 {} 处理事件失败: {}", name, e),
            }
        }
    }

    pub async fn dispatch_connected(&self) {
        if let Err(e) = guarded(self.policy.on_connect()).await {
            error!(target: "Dispatch", "消息管理器 on_connect 失败: {}", e);
        }
        for (name, plugin) in self.snapshot().await {
            if let Err(e) = guarded(plugin.on_connect()).await {
                error!(target: "Dispatch", "插件 {} on_connect 失败: {}", name, e);
            }
        }
    }

    pub async fn dispatch_disconnected(&self) {
        if let Err(e) = guarded(self.policy.on_disconnect()).await {
            error!(target: "Dispatch", "消息管理器 on_disconnect 失败: {}", e);
        }
        for (name, plugin) in self.snapshot().await {
            if let Err(e) = guarded(plugin.on_disconnect()).await {
                error!(target: "Dispatch", "插件 {} on_disconnect 失败: {}", name, e);
            }
        }
    }

    pub async fn handle(&self, inbound: Inbound) {
        match inbound {
            Inbound::Connected => self.dispatch_connected().await,
            Inbound::Disconnected => self.dispatch_disconnected().await,
            Inbound::Event(event) => match &event {
                Event::Heartbeat(_) => {}
                Event::Meta(v) => debug!(target: "Dispatch", "元事件: {}", v),
                Event::ServerEvent(v) => info!(target: "Dispatch", "服务端事件: {}", v),
                Event::Malformed(reason) => {
                    warn!(target: "Dispatch", "丢弃无法解析的消息: {}", reason)
                }
                e if e.is_dispatchable() => self.dispatch_message(e).await,
                _ => {}
            },
        }
    }

    /// 工作循环，发送端全部关闭后处理完剩余事件再返回
    ///
    /// 单线程模式下严格按到达顺序处理；多线程模式下每个事件独立成任务。
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Inbound>, multi_thread: bool) {
        let mut tasks = JoinSet::new();

        while let Some(inbound) = rx.recv().await {
            if multi_thread {
                let this = self.clone();
                tasks.spawn(async move { this.handle(inbound).await });
                while tasks.try_join_next().is_some() {}
            } else {
                self.handle(inbound).await;
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(target: "Dispatch", "事件处理任务异常退出: {}", e);
            }
        }
        debug!(target: "Dispatch", "分发循环已退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigManager};
    use crate::db::requests::memory_store;
    use crate::event::{Frame, ReceiveCounter, decode};
    use crate::plugins::{Plugin, PluginCatalog};
    use crate::testing::{
        Behavior, ScriptedPlugin, RecordingBot, SELF_ID, call_log, test_apis, touch_module,
    };
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    async fn dispatcher(
        dir: &std::path::Path,
        plugins: &[(&'static str, Behavior)],
        log: Log,
    ) -> (Arc<Dispatcher>, Arc<RecordingBot>) {
        let bot = RecordingBot::new();
        let apis = test_apis(bot.clone());

        let mut catalog = PluginCatalog::new();
        for &(name, behavior) in plugins {
            let log = log.clone();
            catalog.register(name, move |_| -> Box<dyn Plugin> {
                Box::new(ScriptedPlugin {
                    name,
                    behavior,
                    log: log.clone(),
                })
            });
            touch_module(
                &dir.join("plugin"),
                &format!("{}_kenko", name.to_lowercase()),
            );
        }

        let mut pm = PluginManager::new(
            dir.join("plugin"),
            dir.join("plugins.json"),
            catalog,
            apis.clone(),
        );
        pm.discover_local_modules().await;
        pm.initialize_all_modules().await;
        pm.enable_desired().await;

        let mut cfg = AppConfig::default();
        cfg.message_manager.administrators.insert(111);
        let config = Arc::new(ConfigManager::with_config(dir.join("config.toml"), cfg));
        let store = Arc::new(memory_store().await);
        let policy = Arc::new(MessageManager::new(config, apis, store));
        policy.on_enable().await.unwrap();

        let dispatcher = Dispatcher::new(policy, Arc::new(Mutex::new(pm)));
        (Arc::new(dispatcher), bot)
    }

    fn private(user_id: i64, text: &str) -> Event {
        Event::Message(json!({
            "post_type": "message", "message_type": "private",
            "user_id": user_id, "self_id": SELF_ID, "raw_message": text,
        }))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn veto_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(
            dir.path(),
            &[
                ("Aaa", Behavior::Pass),
                ("Bbb", Behavior::Veto),
                ("Ccc", Behavior::Pass),
            ],
            log.clone(),
        )
        .await;

        d.dispatch_message(&private(5, "hello")).await;
        assert_eq!(entries(&log), ["Aaa:enable", "Bbb:enable", "Ccc:enable", "Aaa:message", "Bbb:message"]);
    }

    #[tokio::test]
    async fn failing_plugins_do_not_block_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(
            dir.path(),
            &[
                ("Aaa", Behavior::Fail),
                ("Bbb", Behavior::Panic),
                ("Ccc", Behavior::Pass),
            ],
            log.clone(),
        )
        .await;
        log.lock().unwrap().clear();

        d.dispatch_message(&private(5, "hello")).await;
        assert_eq!(entries(&log), ["Aaa:message", "Bbb:message", "Ccc:message"]);

        log.lock().unwrap().clear();
        d.dispatch_connected().await;
        d.dispatch_disconnected().await;
        assert_eq!(
            entries(&log),
            [
                "Aaa:connect",
                "Bbb:connect",
                "Ccc:connect",
                "Aaa:disconnect",
                "Bbb:disconnect",
                "Ccc:disconnect",
            ]
        );
    }

    #[tokio::test]
    async fn admin_help_reaches_no_user_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, bot) = dispatcher(dir.path(), &[("Aaa", Behavior::Pass)], log.clone()).await;
        log.lock().unwrap().clear();

        d.dispatch_message(&private(111, "!help")).await;
        assert!(entries(&log).is_empty());
        assert_eq!(bot.sent().len(), 1);
    }

    #[tokio::test]
    async fn disabled_plugins_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(
            dir.path(),
            &[("Aaa", Behavior::Pass), ("Bbb", Behavior::Pass)],
            log.clone(),
        )
        .await;
        assert!(d.plugins().lock().await.disable_plugin("Aaa").await);
        log.lock().unwrap().clear();

        d.dispatch_message(&private(5, "hello")).await;
        assert_eq!(entries(&log), ["Bbb:message"]);
    }

    #[tokio::test]
    async fn heartbeats_are_counted_but_not_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(dir.path(), &[("Aaa", Behavior::Pass)], log.clone()).await;
        log.lock().unwrap().clear();

        let counter = ReceiveCounter::new();
        let frame = r#"{"post_type":"meta_event","meta_event_type":"heartbeat","interval":5000}"#;
        let event = decode(Frame::Text(frame.to_string()), &counter);
        assert_eq!(counter.get(), 1);

        d.handle(Inbound::Event(event)).await;
        d.handle(Inbound::Event(decode(Frame::Text("{oops".to_string()), &counter)))
            .await;
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn worker_preserves_order_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(dir.path(), &[("Aaa", Behavior::Pass)], log.clone()).await;
        log.lock().unwrap().clear();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Inbound::Connected).unwrap();
        tx.send(Inbound::Event(private(5, "a"))).unwrap();
        tx.send(Inbound::Event(private(5, "b"))).unwrap();
        tx.send(Inbound::Disconnected).unwrap();
        drop(tx);

        d.run(rx, false).await;
        assert_eq!(
            entries(&log),
            ["Aaa:connect", "Aaa:message", "Aaa:message", "Aaa:disconnect"]
        );
    }

    #[tokio::test]
    async fn multi_thread_worker_handles_everything() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let (d, _) = dispatcher(dir.path(), &[("Aaa", Behavior::Pass)], log.clone()).await;
        log.lock().unwrap().clear();

        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..20 {
            tx.send(Inbound::Event(private(5, &i.to_string()))).unwrap();
        }
        drop(tx);

        d.run(rx, true).await;
        assert_eq!(entries(&log).len(), 20);
    }
}
