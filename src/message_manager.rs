use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::api::{BackendApi, BotApi, ClientApi};
use crate::config::{ConfigManager, MessageConfig};
use crate::db::requests::{PendingRequest, RequestStore};
use crate::event::{Event, MessageEvent, NoticeEvent, RequestEvent};
use crate::plugins::{Ack, EventResult, Plugin, PluginApis, PluginError, PluginMetadata};
use crate::{debug, error, info, warn};

pub mod command;
pub mod text;

use command::{AdminCommand, ListTarget, Resolution};

/// 消息管理器
///
/// 始终位于插件链首位：处理管理员指令与黑白名单，可拦截后续分发。
pub struct MessageManager {
    config: Arc<ConfigManager>,
    bot: Arc<dyn BotApi>,
    client: ClientApi,
    server: Arc<dyn BackendApi>,
    store: Arc<RequestStore>,
    self_id: AtomicI64,
    enabled: AtomicBool,
}

impl MessageManager {
    pub fn new(config: Arc<ConfigManager>, apis: PluginApis, store: Arc<RequestStore>) -> Self {
        Self {
            config,
            bot: apis.bot,
            client: apis.client,
            server: apis.server,
            store,
            self_id: AtomicI64::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn reply(&self, target: &Value, message: &str) {
        if let Err(e) = self.bot.send_msg(target, message).await {
            error!(target: "MessageManager", "回复失败: {}", e);
        }
    }

    fn self_id_of(&self, reported: i64) -> i64 {
        if reported != 0 {
            reported
        } else {
            self.self_id.load(Ordering::Relaxed)
        }
    }

    // ================== 通知 ==================

    fn handle_notice(&self, notice: NoticeEvent<'_>, cfg: &MessageConfig) -> EventResult {
        if cfg.block_self && notice.user_id() == self.self_id_of(notice.self_id()) {
            debug!(target: "MessageManager", "屏蔽自身通知: {}", notice.notice_type());
            return EventResult::Stop;
        }
        EventResult::Continue
    }

    // ================== 消息 ==================

    async fn handle_message(&self, msg: MessageEvent<'_>, cfg: &MessageConfig) -> EventResult {
        let user_id = msg.user_id();

        if cfg.block_self && user_id == self.self_id_of(msg.self_id()) {
            return EventResult::Stop;
        }

        let text = command::normalize(msg.text());
        let body = command::strip_prefix(&text, &cfg.command_prefix);
        let is_admin = cfg.is_admin(user_id);

        if is_admin
            && let Some(cmd) = body.and_then(command::parse)
            && let Some(reply) = self.admin_command(cmd, msg, cfg).await
        {
            self.reply(msg.0, &reply).await;
            return EventResult::Stop;
        }

        if !is_admin && !cfg.ignore_users.contains(&user_id) && self.is_blocked(msg, cfg) {
            return EventResult::Stop;
        }

        if matches!(body, Some("help") | Some("?")) {
            self.reply(msg.0, &text::help(&cfg.command_prefix)).await;
            return EventResult::Stop;
        }

        EventResult::Continue
    }

    /// 非管理员消息过滤
    fn is_blocked(&self, msg: MessageEvent<'_>, cfg: &MessageConfig) -> bool {
        let user_id = msg.user_id();
        if cfg.block_users.contains(&user_id) {
            debug!(target: "MessageManager", "屏蔽黑名单用户 {}", user_id);
            return true;
        }

        if msg.is_private() {
            return cfg.block_private
                || (cfg.whitelist_mode && !cfg.whitelist_users.contains(&user_id));
        }

        if msg.is_group() {
            let group_id = msg.group_id().unwrap_or(0);
            return cfg.block_group
                || (cfg.whitelist_mode && !cfg.whitelist_groups.contains(&group_id))
                || cfg.block_groups.contains(&group_id);
        }

        if msg.is_guild() {
            return cfg.block_guild;
        }

        false
    }

    /// 执行管理员指令，返回回复内容；返回 `None` 表示交由后续流程处理
    async fn admin_command(
        &self,
        cmd: AdminCommand,
        msg: MessageEvent<'_>,
        cfg: &MessageConfig,
    ) -> Option<String> {
        let prefix = &cfg.command_prefix;
        let reply = match cmd {
            AdminCommand::AdminHelp => text::admin_help(prefix),
            AdminCommand::Status => self.status_text().await,
            AdminCommand::Screen => "当前运行环境不支持截屏".to_string(),
            AdminCommand::Settings => toml::to_string_pretty(cfg)
                .unwrap_or_else(|e| format!("设置序列化失败: {}", e)),
            AdminCommand::List => list_text(cfg),
            AdminCommand::Query => {
                let group_id = msg.group_id().filter(|_| msg.is_group())?;
                let name = self.group_label(group_id).await;
                if cfg.whitelist_groups.contains(&group_id) {
                    format!("群 {} 在白名单中", name)
                } else {
                    format!("群 {} 不在白名单中", name)
                }
            }
            AdminCommand::Add(target) => self.edit_whitelist(target, msg, true).await,
            AdminCommand::Del(target) => self.edit_whitelist(target, msg, false).await,
            AdminCommand::Todo => self.todo_text().await,
            AdminCommand::Resolve { action, token } => {
                self.resolve(action, &token, msg.user_id()).await
            }
        };
        Some(reply)
    }

    async fn group_label(&self, group_id: i64) -> String {
        match self.bot.get_group_info(group_id, false).await {
            Some(info) if !info.group_name.is_empty() => {
                format!("{}({})", info.group_name, group_id)
            }
            _ => group_id.to_string(),
        }
    }

    async fn status_text(&self) -> String {
        let server = match self.server.get_status().await {
            Some(status) => serde_json::to_string_pretty(&status).unwrap_or_default(),
            None => "服务端状态获取失败".to_string(),
        };
        let client = serde_json::to_string_pretty(&self.client.get_info()).unwrap_or_default();
        format!("{}\n{}", server, client)
    }

    async fn todo_text(&self) -> String {
        match self.store.list_open().await {
            Ok(list) if list.is_empty() => "暂无待办事项".to_string(),
            Ok(list) => {
                let lines: Vec<String> = list.iter().map(PendingRequest::describe).collect();
                format!("待办事项：\n{}", lines.join("\n"))
            }
            Err(e) => {
                error!(target: "MessageManager", "读取待办事项失败: {}", e);
                format!("读取待办事项失败: {}", e)
            }
        }
    }

    async fn edit_whitelist(&self, target: ListTarget, msg: MessageEvent<'_>, add: bool) -> String {
        let (is_user, id) = match target {
            ListTarget::User(id) => (true, id),
            ListTarget::Group(id) => (false, id),
            ListTarget::CurrentGroup => match msg.group_id().filter(|_| msg.is_group()) {
                Some(gid) => (false, gid),
                None => return "该命令只能在群聊中使用".to_string(),
            },
        };

        let label = if is_user {
            format!("用户 {}", id)
        } else {
            format!("群 {}", self.group_label(id).await)
        };

        let mut changed = false;
        let result = self
            .config
            .update(|c| {
                let set = if is_user {
                    &mut c.message_manager.whitelist_users
                } else {
                    &mut c.message_manager.whitelist_groups
                };
                changed = if add { set.insert(id) } else { set.remove(&id) };
            })
            .await;

        let reply = match (add, changed) {
            (true, true) => format!("{} 已加入白名单", label),
            (true, false) => format!("{} 已在白名单中", label),
            (false, true) => format!("{} 已从白名单移除", label),
            (false, false) => format!("{} 不在白名单中", label),
        };

        match result {
            Ok(_) => reply,
            Err(e) => format!("{}，但保存配置失败: {}", reply, e),
        }
    }

    /// 按编号处理待办请求
    ///
    /// 先认领再调用机器人接口，同一编号的并发命令只有一条生效
    async fn resolve(&self, action: Resolution, token: &str, admin_id: i64) -> String {
        let request = match self.store.claim(token).await {
            Ok(Some(r)) => r,
            Ok(None) => return "未找到该请求".to_string(),
            Err(e) => {
                error!(target: "MessageManager", "查询请求失败: {}", e);
                return format!("查询请求失败: {}", e);
            }
        };

        let ok = match (action, &request) {
            (Resolution::Ignore, _) => true,
            (_, PendingRequest::Friend(m)) => {
                self.bot
                    .set_friend_add_request(&m.flag, action == Resolution::Accept, None)
                    .await
            }
            (_, PendingRequest::Group(m)) => {
                self.bot
                    .set_group_add_request(&m.flag, &m.sub_type, action == Resolution::Accept, None)
                    .await
            }
        };
        if !ok {
            self.store.release_claim(token).await;
            return "操作失败，请稍后重试".to_string();
        }

        let description = request.describe();
        if let Err(e) = self.store.finish(&request, admin_id).await {
            error!(target: "MessageManager", "更新请求状态失败: {}", e);
            return format!("操作已完成，但更新记录失败: {}", e);
        }

        info!(target: "MessageManager", "{} {}", action.label(), description);
        format!("{} {}", action.label(), description)
    }

    // ================== 请求 ==================

    async fn handle_request(&self, req: RequestEvent<'_>, cfg: &MessageConfig) -> EventResult {
        match req.request_type() {
            "friend" => {
                if !cfg.ignore_friend_request {
                    self.on_friend_request(req, cfg).await;
                }
                if cfg.block_friend_request {
                    EventResult::Stop
                } else {
                    EventResult::Continue
                }
            }
            "group" if req.sub_type() == "invite" => {
                if cfg.is_admin(req.user_id()) {
                    self.auto_accept_invite(req).await;
                } else if !cfg.ignore_group_invite {
                    self.on_group_invite(req, cfg).await;
                }
                if cfg.block_group_invite {
                    EventResult::Stop
                } else {
                    EventResult::Continue
                }
            }
            _ => EventResult::Continue,
        }
    }

    async fn on_friend_request(&self, req: RequestEvent<'_>, cfg: &MessageConfig) {
        let user_id = req.user_id();
        let token = match self
            .store
            .add_friend_request(req.flag(), user_id, req.comment())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                error!(target: "MessageManager", "记录好友请求失败: {}", e);
                return;
            }
        };

        let nickname = self.bot.get_nickname(user_id).await.unwrap_or_default();
        let notice = format!(
            "收到好友请求\nQQ: {}({})\n验证信息: {}{}",
            nickname,
            user_id,
            req.comment(),
            text::invite_help(&cfg.command_prefix, &token)
        );
        self.notify_admins(&cfg.administrators, &notice).await;
    }

    async fn on_group_invite(&self, req: RequestEvent<'_>, cfg: &MessageConfig) {
        let group_id = req.group_id().unwrap_or(0);
        let user_id = req.user_id();
        let token = match self
            .store
            .add_group_invite(req.flag(), req.sub_type(), group_id, user_id, req.comment())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                error!(target: "MessageManager", "记录群邀请失败: {}", e);
                return;
            }
        };

        let nickname = self.bot.get_nickname(user_id).await.unwrap_or_default();
        let headline = if self.bot.is_in_group(group_id).await {
            format!("收到群邀请（机器人已在群 {} 中）", group_id)
        } else {
            format!("收到群邀请\n群号: {}", group_id)
        };
        let notice = format!(
            "{}\n邀请人: {}({}){}",
            headline,
            nickname,
            user_id,
            text::invite_help(&cfg.command_prefix, &token)
        );
        self.notify_admins(&cfg.administrators, &notice).await;
    }

    async fn auto_accept_invite(&self, req: RequestEvent<'_>) {
        let group_id = req.group_id().unwrap_or(0);
        if self
            .bot
            .set_group_add_request(req.flag(), req.sub_type(), true, None)
            .await
        {
            info!(target: "MessageManager", "已自动同意管理员 {} 的群邀请: {}", req.user_id(), group_id);
        } else {
            warn!(target: "MessageManager", "自动同意群邀请失败: {}", group_id);
        }
    }

    async fn notify_admins(&self, admins: &BTreeSet<i64>, message: &str) {
        for &admin in admins {
            if self.bot.send_private_msg(admin, message).await.is_none() {
                warn!(target: "MessageManager", "通知管理员 {} 失败", admin);
            }
        }
    }
}

fn join_ids(ids: &BTreeSet<i64>) -> String {
    if ids.is_empty() {
        "无".to_string()
    } else {
        ids.iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn list_text(cfg: &MessageConfig) -> String {
    format!(
        "白名单模式: {}\n白名单用户: {}\n白名单群: {}\n黑名单用户: {}\n黑名单群: {}\n忽略用户: {}",
        if cfg.whitelist_mode { "开启" } else { "关闭" },
        join_ids(&cfg.whitelist_users),
        join_ids(&cfg.whitelist_groups),
        join_ids(&cfg.block_users),
        join_ids(&cfg.block_groups),
        join_ids(&cfg.ignore_users),
    )
}

#[async_trait]
impl Plugin for MessageManager {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("消息管理器", "管理员指令与黑白名单", crate::VERSION)
    }

    async fn on_initialize(&self) -> Result<Ack, PluginError> {
        debug!(target: "MessageManager", "initialized");
        Ok(Ack)
    }

    async fn on_enable(&self) -> Result<Ack, PluginError> {
        self.enabled.store(true, Ordering::Relaxed);
        debug!(target: "MessageManager", "enabled");
        Ok(Ack)
    }

    async fn on_disable(&self) -> Result<Ack, PluginError> {
        self.enabled.store(false, Ordering::Relaxed);
        Ok(Ack)
    }

    async fn on_connect(&self) -> Result<Ack, PluginError> {
        match self.bot.get_login_info().await {
            Some(login) => {
                self.self_id.store(login.user_id, Ordering::Relaxed);
                info!(target: "MessageManager", "当前登录账号: {}({})", login.nickname, login.user_id);
            }
            None => warn!(target: "MessageManager", "获取登录信息失败"),
        }
        Ok(Ack)
    }

    async fn on_message(&self, event: &Event) -> Result<EventResult, PluginError> {
        if !self.is_enabled() {
            return Ok(EventResult::Continue);
        }
        let cfg = self.config.get().await.message_manager;
        if !cfg.enable {
            return Ok(EventResult::Continue);
        }

        let result = if let Some(msg) = event.as_message() {
            self.handle_message(msg, &cfg).await
        } else if let Some(notice) = event.as_notice() {
            self.handle_notice(notice, &cfg)
        } else if let Some(req) = event.as_request() {
            self.handle_request(req, &cfg).await
        } else {
            EventResult::Continue
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bot::MessageTarget;
    use crate::config::AppConfig;
    use crate::db::requests::memory_store;
    use crate::testing::{RecordingBot, SELF_ID, test_apis};
    use serde_json::json;

    struct Fixture {
        manager: MessageManager,
        bot: Arc<RecordingBot>,
        config: Arc<ConfigManager>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(edit: impl FnOnce(&mut MessageConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.message_manager.administrators.insert(111);
        edit(&mut cfg.message_manager);
        let config = Arc::new(ConfigManager::with_config(dir.path().join("config.toml"), cfg));

        let bot = RecordingBot::new();
        let store = Arc::new(memory_store().await);
        let manager = MessageManager::new(config.clone(), test_apis(bot.clone()), store);
        manager.on_enable().await.unwrap();
        manager.on_connect().await.unwrap();

        Fixture {
            manager,
            bot,
            config,
            _dir: dir,
        }
    }

    fn private(user_id: i64, text: &str) -> Event {
        Event::Message(json!({
            "post_type": "message", "message_type": "private",
            "user_id": user_id, "self_id": SELF_ID, "raw_message": text, "message": text,
        }))
    }

    fn group(group_id: i64, user_id: i64, text: &str) -> Event {
        Event::Message(json!({
            "post_type": "message", "message_type": "group", "group_id": group_id,
            "user_id": user_id, "self_id": SELF_ID, "raw_message": text, "message": text,
        }))
    }

    fn friend_request(user_id: i64, flag: &str, comment: &str) -> Event {
        Event::Request(json!({
            "post_type": "request", "request_type": "friend",
            "user_id": user_id, "flag": flag, "comment": comment, "self_id": SELF_ID,
        }))
    }

    async fn run(f: &Fixture, event: &Event) -> EventResult {
        f.manager.on_message(event).await.unwrap()
    }

    fn extract_token(text: &str) -> String {
        let line = text
            .lines()
            .find(|l| l.starts_with("同意发送："))
            .unwrap();
        line.rsplit(' ').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn admin_help_is_terminal() {
        let f = fixture(|_| {}).await;
        assert_eq!(run(&f, &private(111, "!help")).await, EventResult::Stop);
        let sent = f.bot.sent_to(MessageTarget::Private(111));
        assert_eq!(sent, [text::help("!")]);

        assert_eq!(run(&f, &private(111, "！h")).await, EventResult::Stop);
        assert!(f.bot.sent_to(MessageTarget::Private(111))[1].contains("超级管理员操作菜单"));
    }

    #[tokio::test]
    async fn non_whitelisted_private_message_is_vetoed_silently() {
        let f = fixture(|c| c.whitelist_mode = true).await;
        assert_eq!(run(&f, &private(222, "!help")).await, EventResult::Stop);
        assert!(f.bot.sent().is_empty());

        f.config
            .update(|c| {
                c.message_manager.whitelist_users.insert(222);
            })
            .await
            .unwrap();
        assert_eq!(run(&f, &private(222, "hello")).await, EventResult::Continue);
    }

    #[tokio::test]
    async fn self_messages_and_notices_are_blocked() {
        let f = fixture(|_| {}).await;
        assert_eq!(run(&f, &private(SELF_ID, "hi")).await, EventResult::Stop);

        let notice = Event::Notice(json!({
            "post_type": "notice", "notice_type": "poke", "user_id": SELF_ID, "self_id": SELF_ID,
        }));
        assert_eq!(run(&f, &notice).await, EventResult::Stop);

        let notice = Event::Notice(json!({
            "post_type": "notice", "notice_type": "poke", "user_id": 5, "self_id": SELF_ID,
        }));
        assert_eq!(run(&f, &notice).await, EventResult::Continue);
    }

    #[tokio::test]
    async fn group_filters() {
        let f = fixture(|c| {
            c.block_groups.insert(13);
            c.block_users.insert(666);
            c.ignore_users.insert(777);
            c.whitelist_mode = true;
            c.whitelist_groups.insert(12);
            c.whitelist_groups.insert(13);
        })
        .await;

        assert_eq!(run(&f, &group(12, 5, "hi")).await, EventResult::Continue);
        assert_eq!(run(&f, &group(11, 5, "hi")).await, EventResult::Stop);
        assert_eq!(run(&f, &group(13, 5, "hi")).await, EventResult::Stop);
        assert_eq!(run(&f, &group(12, 666, "hi")).await, EventResult::Stop);
        // 忽略用户跳过过滤
        assert_eq!(run(&f, &group(11, 777, "hi")).await, EventResult::Continue);
        // 管理员不受过滤影响
        assert_eq!(run(&f, &group(11, 111, "hi")).await, EventResult::Continue);
    }

    #[tokio::test]
    async fn disabled_manager_passes_everything() {
        let f = fixture(|c| c.block_private = true).await;
        f.manager.on_disable().await.unwrap();
        assert_eq!(run(&f, &private(5, "hi")).await, EventResult::Continue);
    }

    #[tokio::test]
    async fn group_whitelist_commands_persist() {
        let f = fixture(|_| {}).await;

        assert_eq!(run(&f, &group(42, 111, "!add")).await, EventResult::Stop);
        assert!(f.config.get().await.message_manager.whitelist_groups.contains(&42));
        assert_eq!(run(&f, &group(42, 111, "!?")).await, EventResult::Stop);
        assert_eq!(run(&f, &group(42, 111, "!add")).await, EventResult::Stop);

        let replies = f.bot.sent_to(MessageTarget::Group(42));
        assert_eq!(replies[0], "群 群42(42) 已加入白名单");
        assert_eq!(replies[1], "群 群42(42) 在白名单中");
        assert_eq!(replies[2], "群 群42(42) 已在白名单中");

        run(&f, &private(111, "!del u 5")).await;
        run(&f, &private(111, "!add u 5")).await;
        assert!(f.config.get().await.message_manager.whitelist_users.contains(&5));
        let replies = f.bot.sent_to(MessageTarget::Private(111));
        assert_eq!(replies, ["用户 5 不在白名单中", "用户 5 已加入白名单"]);

        let saved: AppConfig =
            toml::from_str(&std::fs::read_to_string(f.config.path()).unwrap()).unwrap();
        assert!(saved.message_manager.whitelist_users.contains(&5));
        assert!(saved.message_manager.whitelist_groups.contains(&42));
    }

    #[tokio::test]
    async fn admin_question_mark_in_private_is_generic_help() {
        let f = fixture(|_| {}).await;
        assert_eq!(run(&f, &private(111, "!?")).await, EventResult::Stop);
        assert_eq!(f.bot.sent_to(MessageTarget::Private(111)), [text::help("!")]);
    }

    #[tokio::test]
    async fn friend_request_notifies_each_admin_once() {
        let f = fixture(|c| {
            c.administrators.insert(112);
        })
        .await;

        assert_eq!(run(&f, &friend_request(333, "F1", "hi")).await, EventResult::Continue);

        let open = f.manager.store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        let token = open[0].token().unwrap().to_string();
        assert_eq!(open[0].flag(), "F1");
        assert_eq!(open[0].user_id(), 333);
        assert_eq!(open[0].comment(), "hi");

        for admin in [111, 112] {
            let sent = f.bot.sent_to(MessageTarget::Private(admin));
            assert_eq!(sent.len(), 1);
            assert!(sent[0].contains(&token));
            assert_eq!(extract_token(&sent[0]), token);
        }
    }

    #[tokio::test]
    async fn resolving_a_token_accepts_once() {
        let f = fixture(|_| {}).await;
        run(&f, &friend_request(333, "F1", "hi")).await;
        let token = extract_token(&f.bot.sent_to(MessageTarget::Private(111))[0]);

        let cmd = private(111, &format!("!1 {}", token));
        assert_eq!(run(&f, &cmd).await, EventResult::Stop);
        assert_eq!(
            *f.bot.friend_requests.lock().unwrap(),
            [("F1".to_string(), true)]
        );
        let replies = f.bot.sent_to(MessageTarget::Private(111));
        assert!(replies[1].starts_with("已同意"));

        assert_eq!(run(&f, &cmd).await, EventResult::Stop);
        assert_eq!(f.bot.sent_to(MessageTarget::Private(111))[2], "未找到该请求");
        assert_eq!(f.bot.friend_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_resolves_call_the_bot_once() {
        let f = fixture(|_| {}).await;
        run(&f, &friend_request(333, "F5", "")).await;
        let token = extract_token(&f.bot.sent_to(MessageTarget::Private(111))[0]);

        let cmd = private(111, &format!("!1 {}", token));
        let (a, b) = tokio::join!(run(&f, &cmd), run(&f, &cmd));
        assert_eq!((a, b), (EventResult::Stop, EventResult::Stop));

        assert_eq!(f.bot.friend_requests.lock().unwrap().len(), 1);
        let replies = f.bot.sent_to(MessageTarget::Private(111));
        assert_eq!(replies.iter().filter(|r| r.starts_with("已同意")).count(), 1);
        assert_eq!(replies.iter().filter(|r| *r == "未找到该请求").count(), 1);
    }

    #[tokio::test]
    async fn failed_resolve_can_be_retried() {
        let f = fixture(|_| {}).await;
        run(&f, &friend_request(333, "F6", "")).await;
        let token = extract_token(&f.bot.sent_to(MessageTarget::Private(111))[0]);
        let cmd = private(111, &format!("!2 {}", token));

        f.bot.reject_requests.store(true, Ordering::SeqCst);
        run(&f, &cmd).await;
        assert_eq!(f.bot.sent_to(MessageTarget::Private(111))[1], "操作失败，请稍后重试");

        f.bot.reject_requests.store(false, Ordering::SeqCst);
        run(&f, &cmd).await;
        assert!(f.bot.sent_to(MessageTarget::Private(111))[2].starts_with("已拒绝"));
        assert_eq!(
            *f.bot.friend_requests.lock().unwrap(),
            [("F6".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn ignoring_a_request_makes_no_api_call() {
        let f = fixture(|_| {}).await;
        run(&f, &friend_request(333, "F2", "")).await;
        let token = extract_token(&f.bot.sent_to(MessageTarget::Private(111))[0]);

        run(&f, &private(111, &format!("!0 [{}]", token))).await;
        assert!(f.bot.friend_requests.lock().unwrap().is_empty());
        assert!(f.manager.store.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocked_friend_requests_stop_the_chain() {
        let f = fixture(|c| {
            c.block_friend_request = true;
            c.ignore_friend_request = true;
        })
        .await;
        assert_eq!(run(&f, &friend_request(333, "F3", "")).await, EventResult::Stop);
        assert!(f.bot.sent().is_empty());
        assert!(f.manager.store.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_invites() {
        let f = fixture(|_| {}).await;
        f.bot.groups.lock().unwrap().insert(77);

        let from_admin = Event::Request(json!({
            "post_type": "request", "request_type": "group", "sub_type": "invite",
            "group_id": 55, "user_id": 111, "flag": "G1", "comment": "",
        }));
        run(&f, &from_admin).await;
        assert_eq!(
            *f.bot.group_requests.lock().unwrap(),
            [("G1".to_string(), "invite".to_string(), true)]
        );
        assert!(f.manager.store.list_open().await.unwrap().is_empty());

        let from_other = Event::Request(json!({
            "post_type": "request", "request_type": "group", "sub_type": "invite",
            "group_id": 77, "user_id": 5, "flag": "G2", "comment": "",
        }));
        run(&f, &from_other).await;
        let notice = &f.bot.sent_to(MessageTarget::Private(111))[0];
        assert!(notice.contains("机器人已在群 77 中"));

        let token = extract_token(notice);
        run(&f, &private(111, &format!("!2 {}", token))).await;
        assert_eq!(
            f.bot.group_requests.lock().unwrap()[1],
            ("G2".to_string(), "invite".to_string(), false)
        );
    }

    #[tokio::test]
    async fn todo_lists_open_requests() {
        let f = fixture(|_| {}).await;
        run(&f, &private(111, "!todo")).await;
        run(&f, &friend_request(333, "F4", "hey")).await;
        run(&f, &private(111, "!todo")).await;

        let replies = f.bot.sent_to(MessageTarget::Private(111));
        assert_eq!(replies[0], "暂无待办事项");
        assert!(replies[2].starts_with("待办事项："));
        assert!(replies[2].contains("333"));
    }
}
