use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use kenko::app::{AppContext, Options, StartupError};
use kenko::{APP_NAME, VERSION, console, error, info};

#[derive(Debug, Parser)]
#[command(name = "kenko-client", version, about = "KenkoGo 客户端")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 输出调试日志
    #[arg(short, long)]
    debug: bool,

    /// 测试模式，额外加载测试插件
    #[arg(short, long)]
    test: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "App", "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(target: "App", "{} v{} 正在启动", APP_NAME, VERSION);

    let options = Options {
        debug: cli.debug,
        test_mode: cli.test,
    };
    let app = match AppContext::build(&cli.config, options).await {
        Ok(app) => app,
        Err(e @ StartupError::Config(_)) => {
            return Err(e).with_context(|| format!("无法读取配置文件 {}", cli.config.display()));
        }
        Err(e) => return Err(e.into()),
    };

    app.session.start().await;
    console::run(&app).await;
    app.shutdown().await;
    Ok(())
}
