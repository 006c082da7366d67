use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{debug, warn};

/// 已解码的上报事件
///
/// 每帧构造一次，由分发引擎同步消费，不做保留。
#[derive(Debug, Clone)]
pub enum Event {
    /// 心跳，只计数，不分发
    Heartbeat(Value),
    /// 服务端自身事件，只记录日志
    ServerEvent(Value),
    /// 其他元事件 (如 lifecycle)，只记录日志
    Meta(Value),
    Message(Value),
    Notice(Value),
    Request(Value),
    /// 无法解析的帧，附带原因
    Malformed(String),
}

impl Event {
    /// 原始键值数据
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Event::Heartbeat(v)
            | Event::ServerEvent(v)
            | Event::Meta(v)
            | Event::Message(v)
            | Event::Notice(v)
            | Event::Request(v) => Some(v),
            Event::Malformed(_) => None,
        }
    }

    /// 是否需要交给插件流水线
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Event::Message(_) | Event::Notice(_) | Event::Request(_))
    }

    pub fn post_type(&self) -> Option<&str> {
        self.payload().and_then(|v| v.get("post_type")).and_then(Value::as_str)
    }

    pub fn as_message(&self) -> Option<MessageEvent<'_>> {
        match self {
            Event::Message(v) => Some(MessageEvent(v)),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<RequestEvent<'_>> {
        match self {
            Event::Request(v) => Some(RequestEvent(v)),
            _ => None,
        }
    }

    pub fn as_notice(&self) -> Option<NoticeEvent<'_>> {
        match self {
            Event::Notice(v) => Some(NoticeEvent(v)),
            _ => None,
        }
    }
}

/// 读取整数字段，兼容数字与数字字符串两种上报格式
pub fn get_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|v| v as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

// ================== 事件视图 ==================

/// 消息事件封装，提供便捷的强类型访问
#[derive(Debug, Clone, Copy)]
pub struct MessageEvent<'a>(pub &'a Value);

impl<'a> MessageEvent<'a> {
    pub fn user_id(&self) -> i64 {
        get_i64(self.0, "user_id").unwrap_or(0)
    }

    pub fn self_id(&self) -> i64 {
        get_i64(self.0, "self_id").unwrap_or(0)
    }

    /// 群号 (仅群消息)
    pub fn group_id(&self) -> Option<i64> {
        get_i64(self.0, "group_id")
    }

    /// private / group / guild
    pub fn message_type(&self) -> &'a str {
        get_str(self.0, "message_type").unwrap_or("")
    }

    /// 纯文本内容 (raw_message)，缺失时退回 message 字段
    pub fn text(&self) -> &'a str {
        get_str(self.0, "raw_message")
            .or_else(|| get_str(self.0, "message"))
            .unwrap_or("")
    }

    pub fn is_group(&self) -> bool {
        self.message_type() == "group"
    }

    pub fn is_private(&self) -> bool {
        self.message_type() == "private"
    }

    pub fn is_guild(&self) -> bool {
        self.message_type() == "guild"
    }
}

/// 请求事件 (好友申请 / 群邀请)
#[derive(Debug, Clone, Copy)]
pub struct RequestEvent<'a>(pub &'a Value);

impl<'a> RequestEvent<'a> {
    /// friend / group
    pub fn request_type(&self) -> &'a str {
        get_str(self.0, "request_type").unwrap_or("")
    }

    /// add / invite (仅群请求)
    pub fn sub_type(&self) -> &'a str {
        get_str(self.0, "sub_type").unwrap_or("")
    }

    pub fn user_id(&self) -> i64 {
        get_i64(self.0, "user_id").unwrap_or(0)
    }

    pub fn group_id(&self) -> Option<i64> {
        get_i64(self.0, "group_id")
    }

    pub fn flag(&self) -> &'a str {
        get_str(self.0, "flag").unwrap_or("")
    }

    pub fn comment(&self) -> &'a str {
        get_str(self.0, "comment").unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoticeEvent<'a>(pub &'a Value);

impl<'a> NoticeEvent<'a> {
    pub fn notice_type(&self) -> &'a str {
        get_str(self.0, "notice_type").unwrap_or("")
    }

    pub fn user_id(&self) -> i64 {
        get_i64(self.0, "user_id").unwrap_or(0)
    }

    pub fn self_id(&self) -> i64 {
        get_i64(self.0, "self_id").unwrap_or(0)
    }
}

// ================== 帧解码 ==================

/// 原始帧
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// 接收计数器，用于状态上报
#[derive(Debug, Default)]
pub struct ReceiveCounter(AtomicU64);

impl ReceiveCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// 将一帧解码为事件。解析失败返回 `Event::Malformed`，从不 panic。
/// 每个成功解码的帧都会使计数器加一。
pub fn decode(frame: Frame, counter: &ReceiveCounter) -> Event {
    let mut bytes = match frame {
        Frame::Text(text) => text.into_bytes(),
        Frame::Binary(data) => match String::from_utf8(data) {
            Ok(text) => text.into_bytes(),
            Err(e) => {
                warn!(target: "Decoder", "二进制帧不是合法的 UTF-8: {}", e);
                return Event::Malformed(format!("invalid utf-8: {}", e));
            }
        },
    };

    let value: Value = match simd_json::serde::from_slice(&mut bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "Decoder", "帧解析失败，已丢弃: {}", e);
            return Event::Malformed(e.to_string());
        }
    };

    if !value.is_object() {
        warn!(target: "Decoder", "帧不是 JSON 对象，已丢弃");
        return Event::Malformed("frame is not an object".to_string());
    }

    counter.incr();
    classify(value)
}

fn classify(value: Value) -> Event {
    let post_type = get_str(&value, "post_type").unwrap_or("").to_string();
    match post_type.as_str() {
        "meta_event" => {
            if get_str(&value, "meta_event_type") == Some("heartbeat") {
                Event::Heartbeat(value)
            } else {
                debug!(target: "Decoder", "收到元事件: {}", value);
                Event::Meta(value)
            }
        }
        "server_event" => {
            debug!(target: "Decoder", "收到服务端事件: {}", value);
            Event::ServerEvent(value)
        }
        "message" | "message_sent" => Event::Message(value),
        "notice" => Event::Notice(value),
        "request" => Event::Request(value),
        "" => {
            warn!(target: "Decoder", "缺少 post_type 字段，已丢弃");
            Event::Malformed("missing post_type".to_string())
        }
        other => {
            warn!(target: "Decoder", "未知的 post_type: {}", other);
            Event::Malformed(format!("unknown post_type: {}", other))
        }
    }
}
