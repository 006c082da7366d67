use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::AppContext;
use crate::plugins::PluginRecord;
use crate::{error, info, warn};

const HELP_TEXT: &str = "可用命令：
/help - 显示本信息
/exit - 退出程序
/connect - 连接服务端
/disconnect - 断开连接
/info - 客户端信息
/status - 服务端状态
/start - 启动机器人实例
/stop - 停止机器人实例
/qrcode - 获取登录二维码
/list - 列出插件
/reload <名称> - 重载插件
/enable <名称> - 启用插件
/disable <名称> - 禁用插件
/up <名称> - 插件上移
/down <名称> - 插件下移";

/// 单条命令的执行结果
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Exit,
}

/// 控制台主循环，读到 /exit、EOF 或 Ctrl-C 时返回
pub async fn run(app: &AppContext) {
    info!(target: "Console", "控制台已就绪，输入 /help 查看可用命令");

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = reader.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!(target: "Console", "收到中断信号");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(target: "Console", "读取输入失败: {}", e);
                break;
            }
        };

        match execute(app, &line).await {
            Outcome::Reply(text) if text.is_empty() => {}
            Outcome::Reply(text) => {
                for l in text.lines() {
                    info!(target: "Console", "{}", l);
                }
            }
            Outcome::Exit => break,
        }
    }
}

fn status_label(record: &PluginRecord) -> &'static str {
    if record.enable {
        "启用"
    } else if record.initialized {
        "禁用"
    } else if record.loaded {
        "未初始化"
    } else {
        "未加载"
    }
}

fn require(arg: &str, usage: &str) -> Result<(), Outcome> {
    if arg.is_empty() {
        Err(Outcome::Reply(format!("用法: {}", usage)))
    } else {
        Ok(())
    }
}

/// 执行一条控制台命令
pub async fn execute(app: &AppContext, line: &str) -> Outcome {
    let line = line.trim();
    if line.is_empty() {
        return Outcome::Reply(String::new());
    }

    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    let reply = match cmd {
        "/help" => HELP_TEXT.to_string(),
        "/exit" => return Outcome::Exit,
        "/connect" => {
            if app.session.start().await {
                format!("正在连接 {}", app.session.url())
            } else {
                "连接已在运行中".to_string()
            }
        }
        "/disconnect" => {
            app.session.stop().await;
            "已断开连接".to_string()
        }
        "/info" => serde_json::to_string_pretty(&app.apis.client.get_info()).unwrap_or_default(),
        "/status" => match app.apis.server.get_status().await {
            Some(status) => serde_json::to_string_pretty(&status).unwrap_or_default(),
            None => "获取服务端状态失败".to_string(),
        },
        "/start" => {
            if app.apis.server.start_instance().await {
                "实例已启动".to_string()
            } else {
                "启动实例失败".to_string()
            }
        }
        "/stop" => {
            if app.apis.server.stop_instance().await {
                "实例已停止".to_string()
            } else {
                "停止实例失败".to_string()
            }
        }
        "/qrcode" => save_qrcode(app).await,
        "/list" => list_plugins(app).await,
        "/reload" | "/enable" | "/disable" | "/up" | "/down" => {
            if let Err(usage) = require(arg, &format!("{} <名称>", cmd)) {
                return usage;
            }
            plugin_command(app, cmd, arg).await
        }
        other => {
            warn!(target: "Console", "未知命令: {}", other);
            format!("未知命令: {}，输入 /help 查看可用命令", other)
        }
    };
    Outcome::Reply(reply)
}

async fn save_qrcode(app: &AppContext) -> String {
    let Some(png) = app.apis.server.get_qrcode().await else {
        return "获取二维码失败".to_string();
    };
    let path = app.config.path().with_file_name("qrcode.png");
    match tokio::fs::write(&path, png).await {
        Ok(()) => format!("二维码已保存到 {}", path.display()),
        Err(e) => format!("保存二维码失败: {}", e),
    }
}

async fn list_plugins(app: &AppContext) -> String {
    let pm = app.plugins.lock().await;
    if pm.records().is_empty() {
        return "没有插件".to_string();
    }
    pm.records()
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. [{}] {} ({}) {}",
                i + 1,
                status_label(r),
                r.display_name(),
                r.module_name,
                r.metadata.version
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn plugin_command(app: &AppContext, cmd: &str, name: &str) -> String {
    let mut pm = app.plugins.lock().await;
    let (ok, action) = match cmd {
        "/reload" => (pm.reinitialize_module(name).await, "重载"),
        "/enable" => (pm.enable_plugin(name).await, "启用"),
        "/disable" => (pm.disable_plugin(name).await, "禁用"),
        "/up" => (pm.move_up(name).await, "上移"),
        _ => (pm.move_down(name).await, "下移"),
    };
    if ok {
        format!("{} {} 成功", action, name)
    } else {
        format!("{} {} 失败", action, name)
    }
}
