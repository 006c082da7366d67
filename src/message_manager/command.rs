use regex::Regex;
use std::sync::OnceLock;

/// 请求处理动作，对应指令中的数字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ignore,
    Accept,
    Reject,
}

impl Resolution {
    fn from_digit(d: &str) -> Option<Self> {
        match d {
            "0" => Some(Resolution::Ignore),
            "1" => Some(Resolution::Accept),
            "2" => Some(Resolution::Reject),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Ignore => "已忽略",
            Resolution::Accept => "已同意",
            Resolution::Reject => "已拒绝",
        }
    }
}

/// 白名单操作的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    /// 当前群
    CurrentGroup,
    User(i64),
    Group(i64),
}

/// 管理员指令 (已去除前缀)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AdminHelp,
    Status,
    Screen,
    Settings,
    List,
    /// 查询当前群是否在白名单中
    Query,
    Add(ListTarget),
    Del(ListTarget),
    Todo,
    Resolve { action: Resolution, token: String },
}

static RESOLVE_REGEX: OnceLock<Regex> = OnceLock::new();

fn resolve_regex() -> &'static Regex {
    // 编号两侧的方括号可有可无
    RESOLVE_REGEX.get_or_init(|| Regex::new(r"^([012])\s+\[?(\d+)\]?\s*$").unwrap())
}

/// 全角感叹号转半角，去除首尾空白
pub fn normalize(text: &str) -> String {
    text.trim().replace('！', "!")
}

/// 去掉指令前缀
pub fn strip_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    text.strip_prefix(prefix).map(str::trim)
}

/// 反转义协议端发来的 HTML 实体
pub fn unescape(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

fn parse_target(kind: Option<&str>, id: Option<&str>) -> Option<ListTarget> {
    match (kind, id) {
        (None, _) => Some(ListTarget::CurrentGroup),
        (Some("u"), Some(id)) => id.parse().ok().map(ListTarget::User),
        (Some("g"), Some(id)) => id.parse().ok().map(ListTarget::Group),
        _ => None,
    }
}

/// 解析管理员指令，无法识别时返回 `None`
pub fn parse(body: &str) -> Option<AdminCommand> {
    let body = unescape(body);
    let body = body.trim();

    if let Some(caps) = resolve_regex().captures(body) {
        let action = Resolution::from_digit(&caps[1])?;
        return Some(AdminCommand::Resolve {
            action,
            token: caps[2].to_string(),
        });
    }

    let mut parts = body.split_whitespace();
    let head = parts.next()?;
    let kind = parts.next();
    let id = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let cmd = match (head, kind) {
        ("h", None) => AdminCommand::AdminHelp,
        ("status", None) => AdminCommand::Status,
        ("screen", None) => AdminCommand::Screen,
        ("set", None) => AdminCommand::Settings,
        ("ls", None) => AdminCommand::List,
        ("?", None) => AdminCommand::Query,
        ("todo", None) => AdminCommand::Todo,
        ("add", _) => AdminCommand::Add(parse_target(kind, id)?),
        ("del", _) => AdminCommand::Del(parse_target(kind, id)?),
        _ => return None,
    };
    Some(cmd)
}
