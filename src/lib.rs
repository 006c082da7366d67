// lib.rs
//
// ================================================================================
// KenkoGo Client
//
// 架构：WebSocket 会话 | 插件链分发 | 消息管理器 | 原子配置
// ================================================================================

pub mod log;
pub mod api;
pub mod app;
pub mod config;
pub mod console;
pub mod db;
pub mod dispatch;
pub mod event;
pub mod message_manager;
pub mod plugins;
pub mod session;

#[cfg(test)]
mod testing;

pub const APP_NAME: &str = "KenkoGoClient";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
