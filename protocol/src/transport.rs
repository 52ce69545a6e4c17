//! 传输层抽象
//!
//! 服务端只依赖 `TransportListener`，客户端只依赖 `Transport`。
//! 连接建立后立即拆成读、写两半：读端交给读循环，写端交给写任务。

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::CONNECT_TIMEOUT;

/// 传输层配置
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 连接超时时间
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            // 每帧都是一行短文本，优先低延迟
            nodelay: true,
        }
    }
}

/// 一条已建立的双向字节流
pub trait Transport: Send + Sync + Sized {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// 主动连接，超过 `connect_timeout` 返回 `ConnectionTimeout`
    fn connect(addr: &str, config: &TransportConfig)
        -> impl Future<Output = Result<Self>> + Send;

    /// 对端地址，只用于日志
    fn peer_addr(&self) -> Option<SocketAddr>;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 接受连接的监听端
pub trait TransportListener: Send + Sync + Sized {
    type Transport: Transport;

    fn bind(addr: &str) -> impl Future<Output = Result<Self>> + Send;

    fn accept(&self) -> impl Future<Output = Result<Self::Transport>> + Send;

    fn local_addr(&self) -> Result<SocketAddr>;
}

/// TCP 连接
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    fn with_stream(stream: TcpStream, peer: Option<SocketAddr>, nodelay: bool) -> Result<Self> {
        stream.set_nodelay(nodelay)?;
        Ok(Self { stream, peer })
    }
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;
        let peer = stream.peer_addr().ok();
        Self::with_stream(stream, peer, config.nodelay)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// TCP 监听端，接受的连接一律开启 nodelay
pub struct TcpListener {
    inner: tokio::net::TcpListener,
}

impl TransportListener for TcpListener {
    type Transport = TcpTransport;

    async fn bind(addr: &str) -> Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    async fn accept(&self) -> Result<TcpTransport> {
        let (stream, peer) = self.inner.accept().await?;
        debug!("Accepted TCP connection from {}", peer);
        TcpTransport::with_stream(stream, Some(peer), true)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
