//! 客户端会话
//!
//! 每个会话的读取端只由自己的路由循环消费；写入端可能被任意多个路由循环
//! 同时广播，因此所有写入都先进入一个有界队列，再由唯一的写任务按顺序落到
//! socket 上，同一时刻最多只有一次写入。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use protocol::{DisplayName, Frame, FrameWriter, ServerMessage};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// 会话 ID，区分同名的先后两个会话
pub type SessionId = u64;

/// 已编码的一行，广播时在多个队列间共享
pub type Line = Arc<str>;

/// 一个握手成功的连接
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    name: DisplayName,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Line>,
    cancel: CancellationToken,
}

impl ClientSession {
    /// 创建会话，返回会话和写任务要消费的队列接收端
    pub fn new(
        id: SessionId,
        name: DisplayName,
        peer: Option<SocketAddr>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Line>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            id,
            name,
            peer,
            connected_at: Utc::now(),
            outbound,
            cancel,
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// 编码并投递一条消息
    pub fn send(&self, msg: &ServerMessage) -> bool {
        self.send_line(Line::from(msg.encode()))
    }

    /// 投递已编码的一行，不会阻塞调用方
    ///
    /// 队列满说明对端长时间不读，直接断开该会话，避免拖住整个广播。
    pub fn send_line(&self, line: Line) -> bool {
        match self.outbound.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.cancel.is_cancelled() {
                    warn!(
                        "Outbound queue full for {}, disconnecting slow client",
                        self.name
                    );
                    self.cancel.cancel();
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 请求关闭会话，读循环会走正常的退出流程
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 等待会话被关闭
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// 写任务：按顺序把队列中的行写到 socket
///
/// 所有发送端（即会话本身）被释放后，写完剩余的行并关闭写入方向。
/// 写入失败或超时会关闭会话。
pub async fn run_writer<W: AsyncWrite + Unpin>(
    name: DisplayName,
    mut rx: mpsc::Receiver<Line>,
    mut writer: FrameWriter<W>,
    write_timeout: Duration,
    cancel: CancellationToken,
) {
    while let Some(line) = rx.recv().await {
        match timeout(write_timeout, writer.write_line(&line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Failed to send to {}: {}", name, e);
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!("Write to {} timed out", name);
                cancel.cancel();
                return;
            }
        }
    }

    let _ = timeout(write_timeout, writer.shutdown()).await;
    debug!("Writer for {} finished", name);
}
