//! 聊天服务器核心实现
//!
//! 接受连接、完成握手、把会话交给注册表和路由引擎。每个连接都是被
//! `TaskTracker` 跟踪的独立任务，关闭服务时可以统一取消并等待。

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    ClientMessage, DisplayName, FrameReader, FrameWriter, ProtocolError, ServerMessage,
    TcpListener, Transport, TransportListener,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::events::{EventSender, ServerEvent};
use crate::registry::SessionRegistry;
use crate::router::Router;
use crate::session::{run_writer, ClientSession, SessionId};

/// 关闭服务时发给每个会话的通知
pub const SERVER_STOPPING: &str = "Server stopping.";

/// accept 出错后的退避时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 握手被拒绝的原因
#[derive(Error, Debug)]
pub enum Rejection {
    /// 第一行不是 SETNAME
    #[error("first line is not SETNAME")]
    InvalidHandshake,
    /// 用户名为空
    #[error("empty username")]
    EmptyName,
    /// 用户名过长或包含保留字符
    #[error("invalid username: {0}")]
    InvalidName(ProtocolError),
    /// 用户名已被占用
    #[error("username already exists")]
    NameTaken,
    /// 超过最大连接数
    #[error("server is full")]
    ServerFull,
    /// 握手超时
    #[error("handshake timed out")]
    Timeout,
    /// 握手期间服务关闭
    #[error("server stopping")]
    Stopping,
    /// 握手期间连接出错或关闭
    #[error("transport failure: {0}")]
    Transport(ProtocolError),
}

impl Rejection {
    /// 关闭连接前发给对端的通知，连接已不可用时为 None
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Rejection::InvalidHandshake => Some("Invalid handshake."),
            Rejection::EmptyName => Some("Empty username."),
            Rejection::InvalidName(_) => Some("Invalid username."),
            Rejection::NameTaken => Some("Username already exists."),
            Rejection::ServerFull => Some("Server is full."),
            Rejection::Timeout => Some("Handshake timed out."),
            Rejection::Stopping => Some(SERVER_STOPPING),
            Rejection::Transport(_) => None,
        }
    }
}

impl From<ProtocolError> for Rejection {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::EmptyName => Rejection::EmptyName,
            e @ (ProtocolError::NameTooLong { .. } | ProtocolError::InvalidNameChar { .. }) => {
                Rejection::InvalidName(e)
            }
            other => Rejection::Transport(other),
        }
    }
}

/// 连接计数占位，释放时归还名额
struct ConnectionSlot {
    count: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    /// 增加连接数，如果超过限制则返回 None
    fn try_acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()
            .map(|_| Self {
                count: Arc::clone(count),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 每个连接任务共享的上下文
#[derive(Clone)]
struct ConnectionContext {
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// 聊天服务器
pub struct ChatServer<L = TcpListener> {
    listener: L,
    ctx: ConnectionContext,
    events: EventSender,
    connections: Arc<AtomicUsize>,
    next_session_id: SessionId,
}

impl ChatServer<TcpListener> {
    /// 按配置绑定 TCP 监听地址，绑定失败直接返回给调用方
    pub async fn bind(config: ServerConfig) -> protocol::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        Ok(Self::new(listener, config))
    }

    /// 绑定并在后台运行，返回用于停止服务的句柄
    pub async fn start(config: ServerConfig) -> protocol::Result<ServerHandle> {
        let server = Self::bind(config).await?;
        Ok(server.spawn())
    }
}

impl<L> ChatServer<L>
where
    L: TransportListener + 'static,
    L::Transport: 'static,
{
    pub fn new(listener: L, config: ServerConfig) -> Self {
        let events = EventSender::new();
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(Router::new(registry, events.clone()));
        Self {
            listener,
            ctx: ConnectionContext {
                router,
                config: Arc::new(config),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            },
            events,
            connections: Arc::new(AtomicUsize::new(0)),
            next_session_id: 1,
        }
    }

    pub fn local_addr(&self) -> protocol::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 订阅服务端事件
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(self.ctx.router.registry())
    }

    /// 取消该 token 即停止服务
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// 在后台任务中运行，直到句柄被停止
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr().ok();
        let shutdown = self.shutdown_token();
        let events = self.events.clone();
        let registry = self.registry();
        let task = tokio::spawn(self.run_until(std::future::pending::<()>()));
        ServerHandle {
            local_addr,
            shutdown,
            events,
            registry,
            task,
        }
    }

    /// 运行服务器，直到收到 Ctrl+C
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal, initiating graceful shutdown...");
        })
        .await
    }

    /// 运行服务器，直到 `shutdown` 完成或 shutdown token 被取消
    pub async fn run_until<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.listener.local_addr()?;
        info!("Server listening on {}", addr);
        self.events.log(format!("[Server] Listening on {addr}"));

        tokio::pin!(shutdown);
        let stop = self.ctx.shutdown.clone();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = stop.cancelled() => break,

                result = self.listener.accept() => {
                    match result {
                        Ok(transport) => self.spawn_connection(transport),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        // 停止接受新连接
        drop(self.listener);
        shutdown_sessions(&self.ctx).await;
        self.events.log("[Server] Stopped.");
        info!("Server shutdown complete");

        Ok(())
    }

    fn spawn_connection(&mut self, transport: L::Transport) {
        let ctx = self.ctx.clone();

        let Some(slot) =
            ConnectionSlot::try_acquire(&self.connections, ctx.config.max_connections)
        else {
            warn!("Connection limit reached, rejecting new connection");
            ctx.tracker.clone().spawn(async move {
                let (_reader, writer) = transport.split();
                let mut writer = FrameWriter::new(writer);
                reject(&mut writer, &Rejection::ServerFull, &ctx.config).await;
            });
            return;
        };

        let id = self.next_session_id;
        self.next_session_id += 1;

        ctx.tracker.clone().spawn(async move {
            handle_connection(transport, id, ctx).await;
            drop(slot);
        });
    }
}

/// 停止所有会话：尽力发送关闭通知，再取消全部会话，最后等待任务退出
async fn shutdown_sessions(ctx: &ConnectionContext) {
    let notice = ServerMessage::system(SERVER_STOPPING);
    for session in ctx.router.registry().sessions().await {
        session.send(&notice);
    }

    ctx.shutdown.cancel();
    ctx.tracker.close();

    if timeout(ctx.config.shutdown_grace, ctx.tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "Shutdown timeout, {} connections still active",
            ctx.router.registry().len().await
        );
    }
}

/// 处理单个连接：握手、注册、启动写任务、运行读循环
async fn handle_connection<T: Transport>(transport: T, id: SessionId, ctx: ConnectionContext) {
    let peer = transport.peer_addr();
    let (reader, writer) = transport.split();
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);
    let cancel = ctx.shutdown.child_token();

    let name = match handshake(&mut reader, &ctx.config, &cancel).await {
        Ok(name) => name,
        Err(rejection) => {
            debug!("Rejected connection from {:?}: {}", peer, rejection);
            reject(&mut writer, &rejection, &ctx.config).await;
            return;
        }
    };

    let (session, outbound) = ClientSession::new(
        id,
        name.clone(),
        peer,
        ctx.config.outbound_capacity,
        cancel.clone(),
    );
    let session = Arc::new(session);

    if !ctx.router.registry().try_register(Arc::clone(&session)).await {
        info!("Rejected {:?}: username {} already exists", peer, name);
        reject(&mut writer, &Rejection::NameTaken, &ctx.config).await;
        return;
    }

    ctx.tracker.spawn(run_writer(
        name,
        outbound,
        writer,
        ctx.config.write_timeout,
        cancel,
    ));

    ctx.router.join(&session).await;
    ctx.router.run_session(session, reader).await;
}

/// 读取第一行并校验 SETNAME
async fn handshake<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    config: &ServerConfig,
    cancel: &CancellationToken,
) -> Result<DisplayName, Rejection> {
    let first = tokio::select! {
        _ = cancel.cancelled() => return Err(Rejection::Stopping),
        result = timeout(config.handshake_timeout, reader.recv::<ClientMessage>()) => result,
    };

    match first {
        Ok(Ok(ClientMessage::SetName { name })) => Ok(DisplayName::parse(&name)?),
        Ok(Ok(_)) => Err(Rejection::InvalidHandshake),
        Ok(Err(e)) => Err(Rejection::Transport(e)),
        Err(_) => Err(Rejection::Timeout),
    }
}

/// 尽力发送拒绝原因，然后关闭写入方向
async fn reject<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    rejection: &Rejection,
    config: &ServerConfig,
) {
    if let Some(notice) = rejection.notice() {
        let msg = ServerMessage::system(notice);
        if let Err(e) = timeout(config.write_timeout, writer.send(&msg))
            .await
            .unwrap_or(Err(ProtocolError::ConnectionTimeout))
        {
            debug!("Failed to send rejection notice: {}", e);
        }
    }
    let _ = timeout(config.write_timeout, writer.shutdown()).await;
}

/// 后台运行中的服务器
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    events: EventSender,
    registry: Arc<SessionRegistry>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 停止服务并等待所有会话退出
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.task.await?
    }
}
