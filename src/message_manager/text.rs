use crate::VERSION;

/// `[CP]` 会被替换为指令前缀
const ADMIN_HELP_TEXT: &str = "超级管理员操作菜单：
当前版本([VERSION])支持的命令：
[CP]h - 显示本信息
[CP]help - 显示帮助信息（非超级管理员特有）
[CP]status - 显示当前状态
[CP]screen - 截屏
[CP]set - 查看设置
[CP]ls - 列出白名单/黑名单
[CP]? - 判断群是否在白名单中
[CP]add - 将本群加入白名单
[CP]del - 将本群从白名单移除

[CP]todo - 查看待办事项（如好友请求、群聊邀请）
[CP]0 <id> - 忽略请求
[CP]1 <id> - 同意请求
[CP]2 <id> - 拒绝请求

--[CP]add u <QQ号> - 将QQ号加入白名单
--[CP]add g <群号> - 将群加入白名单
--[CP]del u <QQ号> - 将QQ号从白名单移除
--[CP]del g <群号> - 将群从白名单移除";

const HELP_TEXT: &str = "操作菜单：
[CP]help - 显示帮助信息（即本信息）
[CP]? - 同上";

/// `[UUID]` 会被替换为请求编号
const INVITE_HELP_TEXT: &str = "

忽略发送：[CP]0 [UUID]
同意发送：[CP]1 [UUID]
拒绝发送：[CP]2 [UUID]";

pub fn admin_help(prefix: &str) -> String {
    ADMIN_HELP_TEXT
        .replace("[VERSION]", VERSION)
        .replace("[CP]", prefix)
}

pub fn help(prefix: &str) -> String {
    HELP_TEXT.replace("[CP]", prefix)
}

pub fn invite_help(prefix: &str, token: &str) -> String {
    INVITE_HELP_TEXT
        .replace("[CP]", prefix)
        .replace("[UUID]", token)
}
