use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, protocol::Message as WsMessage},
};

use crate::dispatch::Inbound;
use crate::event::{Frame, ReceiveCounter, decode};
use crate::{debug, error, info, warn};

/// 断线重连间隔
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// stop() 等待接收循环自行退出的最长时间
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("WebSocket 错误: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("无效的访问令牌: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),
}

/// 连接结束原因
enum Closed {
    /// 对端关闭或连接中断
    Remote,
    /// 收到 stop() 请求
    Shutdown,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
}

/// 传输会话
///
/// 同一时刻只维持一条连接；意外断开后按固定间隔重连，
/// 收到的帧解码后交给分发引擎，接收循环从不等待插件执行。
/// 发往服务端的文本经由同一循环写出。
pub struct Session {
    url: String,
    token: String,
    reconnect_delay: Duration,
    stop_timeout: Duration,
    counter: Arc<ReceiveCounter>,
    connected: Arc<AtomicBool>,
    auto_reconnect: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Inbound>,
    running: Mutex<Option<Running>>,
}

impl Session {
    pub fn new(
        host_and_port: &str,
        token: &str,
        counter: Arc<ReceiveCounter>,
        connected: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        Self {
            url: format!("ws://{}/client", host_and_port),
            token: token.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            stop_timeout: STOP_TIMEOUT,
            counter,
            connected,
            auto_reconnect: Arc::new(AtomicBool::new(false)),
            tx,
            running: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// 启动接收循环；已在运行时仅给出警告
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            warn!(target: "Session", "连接已在运行中");
            return false;
        }

        self.auto_reconnect.store(true, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let ctx = LoopContext {
            url: self.url.clone(),
            token: self.token.clone(),
            reconnect_delay: self.reconnect_delay,
            counter: self.counter.clone(),
            connected: self.connected.clone(),
            auto_reconnect: self.auto_reconnect.clone(),
            tx: self.tx.clone(),
        };
        let handle = tokio::spawn(run_loop(ctx, shutdown_rx, outbound_rx));

        *running = Some(Running {
            handle,
            shutdown,
            outbound,
        });
        true
    }

    /// 向服务端发送一条文本帧，未连接时返回 false
    pub async fn send(&self, text: &str) -> bool {
        if !self.is_connected() {
            warn!(target: "Session", "未连接，无法发送消息");
            return false;
        }

        match self.running.lock().await.as_ref() {
            Some(r) if !r.handle.is_finished() => r.outbound.send(text.to_string()).is_ok(),
            _ => false,
        }
    }

    /// 停止会话：关闭自动重连并请求正常关闭，超时后强制结束接收循环
    pub async fn stop(&self) {
        self.auto_reconnect.store(false, Ordering::Relaxed);

        let Some(Running {
            mut handle,
            shutdown,
            ..
        }) = self.running.lock().await.take()
        else {
            return;
        };

        let _ = shutdown.send(true);
        if tokio::time::timeout(self.stop_timeout, &mut handle).await.is_err() {
            warn!(target: "Session", "接收循环未能按时退出，强制终止");
            handle.abort();
            let _ = handle.await;
        }

        if self.connected.swap(false, Ordering::Relaxed) {
            let _ = self.tx.send(Inbound::Disconnected);
        }
        info!(target: "Session", "连接已停止");
    }
}

struct LoopContext {
    url: String,
    token: String,
    reconnect_delay: Duration,
    counter: Arc<ReceiveCounter>,
    connected: Arc<AtomicBool>,
    auto_reconnect: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Inbound>,
}

async fn run_loop(
    ctx: LoopContext,
    mut shutdown: watch::Receiver<bool>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    loop {
        match connect_and_listen(&ctx, &mut shutdown, &mut outbound).await {
            Ok(Closed::Shutdown) => break,
            Ok(Closed::Remote) => warn!(target: "Session", "[{}] 连接断开", ctx.url),
            Err(e) => error!(target: "Session", "[{}] 连接失败: {}", ctx.url, e),
        }

        if !ctx.auto_reconnect.load(Ordering::Relaxed) || *shutdown.borrow() {
            break;
        }

        info!(target: "Session", "{} 秒后重连...", ctx.reconnect_delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(ctx.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
        if !ctx.auto_reconnect.load(Ordering::Relaxed) {
            break;
        }
    }
    debug!(target: "Session", "接收循环已退出");
}

async fn connect_and_listen(
    ctx: &LoopContext,
    shutdown: &mut watch::Receiver<bool>,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Result<Closed, SessionError> {
    let mut request = ctx.url.as_str().into_client_request()?;
    if !ctx.token.is_empty() {
        let token_header = format!("Bearer {}", ctx.token);
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(&token_header)?);
    }

    let ws_stream = tokio::select! {
        result = connect_async(request) => result?.0,
        _ = shutdown.changed() => return Ok(Closed::Shutdown),
    };
    info!(target: "Session", "[{}] 连接成功", ctx.url);

    ctx.connected.store(true, Ordering::Relaxed);
    let _ = ctx.tx.send(Inbound::Connected);

    let (mut write_half, mut read_half) = ws_stream.split();
    let result = loop {
        // 关闭前先写出已排队的消息
        let message = tokio::select! {
            biased;
            message = read_half.next() => message,
            Some(text) = outbound.recv() => {
                if let Err(e) = write_half.send(WsMessage::Text(text.into())).await {
                    break Err(SessionError::from(e));
                }
                continue;
            }
            _ = shutdown.changed() => {
                if let Err(e) = write_half.send(WsMessage::Close(None)).await {
                    debug!(target: "Session", "发送关闭帧失败: {}", e);
                    break Ok(Closed::Shutdown);
                }
                // 等待对端回应关闭帧，期间收到的消息不再分发
                while let Some(Ok(message)) = read_half.next().await {
                    if message.is_close() {
                        break;
                    }
                }
                break Ok(Closed::Shutdown);
            }
        };

        let frame = match message {
            Some(Ok(WsMessage::Text(text))) => Frame::Text(text.to_string()),
            Some(Ok(WsMessage::Binary(data))) => Frame::Binary(data.to_vec()),
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(target: "Session", "收到关闭帧: {:?}", frame);
                break Ok(Closed::Remote);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Err(SessionError::from(e)),
            None => break Ok(Closed::Remote),
        };

        let event = decode(frame, &ctx.counter);
        if ctx.tx.send(Inbound::Event(event)).is_err() {
            warn!(target: "Session", "分发引擎已关闭，停止接收");
            break Ok(Closed::Shutdown);
        }
    };

    if ctx.connected.swap(false, Ordering::Relaxed) {
        let _ = ctx.tx.send(Inbound::Disconnected);
    }
    result
}
