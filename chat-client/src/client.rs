//! 聊天客户端核心实现
//!
//! `ChatClient` 是给展示层用的句柄：方法调用变成命令送进网络任务，
//! 服务端推送的帧解码成 `ClientEvent` 从事件通道交回展示层。
//! 连接结束时（无论哪条路径）最后一定会收到一个 `Disconnected` 事件。

use std::time::Duration;

use protocol::{
    ClientMessage, DisplayName, FrameReader, FrameWriter, ProtocolError, ServerMessage,
    TcpTransport, Transport, TransportConfig, TYPING_IDLE_TIMEOUT,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// 客户端错误
#[derive(Error, Debug)]
pub enum ClientError {
    /// 本地校验用户名失败
    #[error("invalid username: {0}")]
    InvalidName(ProtocolError),
    /// 连接或发送失败
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// 网络任务已经退出
    #[error("not connected")]
    NotConnected,
}

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    /// 输入空闲多久后发送 `TYPING|0`
    pub typing_idle: Duration,
    /// 事件通道容量
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            typing_idle: TYPING_IDLE_TIMEOUT,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// 展示层发送给网络任务的命令
#[derive(Debug)]
enum Command {
    Chat { text: String },
    Whisper { to: String, text: String },
    SetTyping { typing: bool },
    InputChanged { empty: bool },
    Disconnect,
}

/// 网络任务发送给展示层的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// 系统通知
    System { text: String },
    /// 在线用户列表
    UserList { users: Vec<String> },
    /// 群聊消息
    Chat { from: String, text: String },
    /// 私聊消息
    Whisper {
        from: String,
        to: String,
        text: String,
    },
    /// 某用户的输入状态
    Typing { user: String, typing: bool },
    /// 无法识别的行
    Unknown { raw: String },
    /// 连接断开，之后不会再有事件
    Disconnected { reason: String },
}

impl From<ServerMessage> for ClientEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::System { text } => ClientEvent::System { text },
            ServerMessage::UserList { users } => ClientEvent::UserList { users },
            ServerMessage::Chat { from, text } => ClientEvent::Chat { from, text },
            ServerMessage::Whisper { from, to, text } => ClientEvent::Whisper { from, to, text },
            ServerMessage::Typing { user, typing } => ClientEvent::Typing { user, typing },
            ServerMessage::Unknown { raw } => ClientEvent::Unknown { raw },
        }
    }
}

/// 聊天客户端句柄
///
/// 句柄被丢弃时网络任务也会断开连接。
#[derive(Debug)]
pub struct ChatClient {
    name: DisplayName,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ChatClient {
    /// 连接服务器并发送 SETNAME
    ///
    /// 握手结果由服务端推送：成功时先收到 `UserList`，被拒绝时收到
    /// `System` 通知和随后的 `Disconnected`。
    pub async fn connect(
        addr: &str,
        name: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let name = DisplayName::parse(name).map_err(ClientError::InvalidName)?;

        let transport = TcpTransport::connect(addr, &config.transport).await?;
        info!("Connected to {}", addr);
        Self::handshake(transport, name, config).await
    }

    /// 在已建立的传输上完成握手
    pub async fn handshake<T: Transport + 'static>(
        transport: T,
        name: DisplayName,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let (reader, writer) = transport.split();
        let mut writer = FrameWriter::new(writer);
        writer
            .send(&ClientMessage::SetName {
                name: name.to_string(),
            })
            .await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        tokio::spawn(network_loop(
            FrameReader::new(reader),
            writer,
            cmd_rx,
            event_tx,
            config.typing_idle,
        ));

        Ok((Self { name, cmd_tx }, event_rx))
    }

    /// 本地显示名
    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// 发送群聊消息
    pub fn send(&self, text: &str) -> Result<(), ClientError> {
        self.command(Command::Chat {
            text: text.to_string(),
        })
    }

    /// 发送私聊消息
    pub fn send_whisper(&self, to: &str, text: &str) -> Result<(), ClientError> {
        self.command(Command::Whisper {
            to: to.to_string(),
            text: text.to_string(),
        })
    }

    /// 显式设置输入状态
    pub fn set_typing(&self, typing: bool) -> Result<(), ClientError> {
        self.command(Command::SetTyping { typing })
    }

    /// 输入框内容变化，由网络任务决定何时发送 `TYPING|1` / `TYPING|0`
    pub fn input_changed(&self, input: &str) -> Result<(), ClientError> {
        self.command(Command::InputChanged {
            empty: input.is_empty(),
        })
    }

    /// 断开连接
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// 网络任务是否仍在运行
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.cmd_tx.send(cmd).map_err(|_| ClientError::NotConnected)
    }
}

/// 本地输入状态
///
/// 只在状态真正变化时产生帧；最后一次输入之后空闲 `idle` 自动结束。
#[derive(Debug)]
struct TypingIndicator {
    active: bool,
    deadline: Option<Instant>,
    idle: Duration,
}

impl TypingIndicator {
    fn new(idle: Duration) -> Self {
        Self {
            active: false,
            deadline: None,
            idle,
        }
    }

    /// 有输入活动，返回需要发送的状态
    fn touch(&mut self) -> Option<bool> {
        self.deadline = Some(Instant::now() + self.idle);
        if self.active {
            None
        } else {
            self.active = true;
            Some(true)
        }
    }

    fn stop(&mut self) -> Option<bool> {
        self.deadline = None;
        if self.active {
            self.active = false;
            Some(false)
        } else {
            None
        }
    }

    fn input_changed(&mut self, empty: bool) -> Option<bool> {
        if empty {
            self.stop()
        } else {
            self.touch()
        }
    }

    /// 等到空闲超时；未在输入时永远挂起
    async fn idle_elapsed(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// 网络循环
async fn network_loop<R, W>(
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ClientEvent>,
    typing_idle: Duration,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut typing = TypingIndicator::new(typing_idle);

    let reason = loop {
        tokio::select! {
            // 接收服务器消息；被其他分支打断时半行留在 reader 内部
            result = reader.recv::<ServerMessage>() => {
                match result {
                    Ok(msg) => {
                        if let ServerMessage::Unknown { raw } = &msg {
                            debug!("Unknown line from server: {:?}", raw);
                        }
                        if event_tx.send(msg.into()).await.is_err() {
                            break "event receiver dropped".to_string();
                        }
                    }
                    Err(ProtocolError::ConnectionClosed) => {
                        info!("Server closed connection");
                        break "server closed the connection".to_string();
                    }
                    Err(e) => {
                        warn!("Receive error: {}", e);
                        break e.to_string();
                    }
                }
            }

            // 输入空闲
            _ = typing.idle_elapsed() => {
                if let Some(flag) = typing.stop() {
                    if let Err(e) = send_typing(&mut writer, flag).await {
                        break e.to_string();
                    }
                }
            }

            // 处理展示层命令
            cmd = cmd_rx.recv() => {
                let cmd = match cmd {
                    Some(Command::Disconnect) | None => break "disconnected".to_string(),
                    Some(cmd) => cmd,
                };
                if let Err(e) = handle_command(cmd, &mut writer, &mut typing).await {
                    warn!("Failed to send: {}", e);
                    break e.to_string();
                }
            }
        }
    };

    let _ = writer.shutdown().await;
    debug!("Network loop finished: {}", reason);
    let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
}

async fn handle_command<W: AsyncWrite + Unpin>(
    cmd: Command,
    writer: &mut FrameWriter<W>,
    typing: &mut TypingIndicator,
) -> protocol::Result<()> {
    let flag = match cmd {
        Command::Chat { text } => {
            writer.send(&ClientMessage::Chat { text }).await?;
            typing.stop()
        }
        Command::Whisper { to, text } => {
            writer.send(&ClientMessage::Whisper { to, text }).await?;
            typing.stop()
        }
        Command::SetTyping { typing: true } => typing.touch(),
        Command::SetTyping { typing: false } => typing.stop(),
        Command::InputChanged { empty } => typing.input_changed(empty),
        Command::Disconnect => None,
    };

    if let Some(flag) = flag {
        send_typing(writer, flag).await?;
    }
    Ok(())
}

async fn send_typing<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    typing: bool,
) -> protocol::Result<()> {
    writer.send(&ClientMessage::Typing { typing }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct FakeServer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn next_line(&mut self) -> String {
            timeout(WAIT, self.reader.read_line()).await.unwrap().unwrap()
        }

        /// 原样写出字节，可以只写半行
        async fn write_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
        }

        async fn assert_quiet(&mut self, wait: Duration) {
            assert!(timeout(wait, self.reader.read_line()).await.is_err());
        }
    }

    fn spawn_loop(
        typing_idle: Duration,
    ) -> (
        mpsc::UnboundedSender<Command>,
        mpsc::Receiver<ClientEvent>,
        FakeServer,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(16);
        tokio::spawn(network_loop(
            FrameReader::new(client_r),
            FrameWriter::new(client_w),
            cmd_rx,
            event_tx,
            typing_idle,
        ));
        (
            cmd_tx,
            event_rx,
            FakeServer {
                reader: FrameReader::new(server_r),
                writer: server_w,
            },
        )
    }

    #[test]
    fn test_typing_indicator_transitions() {
        let mut typing = TypingIndicator::new(Duration::from_secs(1));
        assert_eq!(typing.input_changed(false), Some(true));
        assert_eq!(typing.input_changed(false), None);
        assert_eq!(typing.input_changed(true), Some(false));
        assert_eq!(typing.input_changed(true), None);
        assert_eq!(typing.stop(), None);
    }

    #[tokio::test]
    async fn test_server_frames_become_events() {
        let (_cmd_tx, mut events, mut server) = spawn_loop(Duration::from_secs(1));

        for line in ["USERLIST|Alice,Bob", "MSG|Bob|hi|there", "TYPING|Bob|1", "HELLO"] {
            server.write_raw(format!("{line}\n").as_bytes()).await;
        }

        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(timeout(WAIT, events.recv()).await.unwrap().unwrap());
        }
        assert_eq!(
            received,
            vec![
                ClientEvent::UserList {
                    users: vec!["Alice".into(), "Bob".into()]
                },
                ClientEvent::Chat {
                    from: "Bob".into(),
                    text: "hi|there".into()
                },
                ClientEvent::Typing {
                    user: "Bob".into(),
                    typing: true
                },
                ClientEvent::Unknown {
                    raw: "HELLO".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_become_frames() {
        let (cmd_tx, _events, mut server) = spawn_loop(Duration::from_secs(5));

        cmd_tx.send(Command::Chat { text: "hello".into() }).unwrap();
        cmd_tx
            .send(Command::Whisper {
                to: "Bob".into(),
                text: "psst".into(),
            })
            .unwrap();

        assert_eq!(server.next_line().await, "MSG|hello");
        assert_eq!(server.next_line().await, "WHISPER|Bob|psst");
    }

    #[tokio::test]
    async fn test_typing_goes_idle_once() {
        let (cmd_tx, _events, mut server) = spawn_loop(Duration::from_millis(100));

        for _ in 0..3 {
            cmd_tx.send(Command::InputChanged { empty: false }).unwrap();
        }
        assert_eq!(server.next_line().await, "TYPING|1");
        assert_eq!(server.next_line().await, "TYPING|0");
        // 空闲之后不再有重复帧
        server.assert_quiet(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_local_input_does_not_split_incoming_line() {
        let (cmd_tx, mut events, mut server) = spawn_loop(Duration::from_millis(100));

        // 服务端一帧分两次到达，中间本地输入打断了读取
        server.write_raw(b"MSG|Bob|hel").await;
        cmd_tx.send(Command::InputChanged { empty: false }).unwrap();
        assert_eq!(server.next_line().await, "TYPING|1");
        assert_eq!(server.next_line().await, "TYPING|0");

        server.write_raw(b"lo\n").await;
        assert_eq!(
            timeout(WAIT, events.recv()).await.unwrap().unwrap(),
            ClientEvent::Chat {
                from: "Bob".into(),
                text: "hello".into()
            }
        );
    }

    #[tokio::test]
    async fn test_sending_message_stops_typing() {
        let (cmd_tx, _events, mut server) = spawn_loop(Duration::from_secs(5));

        cmd_tx.send(Command::InputChanged { empty: false }).unwrap();
        cmd_tx.send(Command::Chat { text: "done".into() }).unwrap();

        assert_eq!(server.next_line().await, "TYPING|1");
        assert_eq!(server.next_line().await, "MSG|done");
        assert_eq!(server.next_line().await, "TYPING|0");
    }

    #[tokio::test]
    async fn test_server_close_emits_disconnected() {
        let (_cmd_tx, mut events, server) = spawn_loop(Duration::from_secs(1));
        drop(server);

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::Disconnected { .. }));
        assert!(timeout(WAIT, events.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_command() {
        let (cmd_tx, mut events, mut server) = spawn_loop(Duration::from_secs(1));
        cmd_tx.send(Command::Disconnect).unwrap();

        assert_eq!(
            timeout(WAIT, events.recv()).await.unwrap().unwrap(),
            ClientEvent::Disconnected {
                reason: "disconnected".into()
            }
        );
        // 写入方向已关闭
        assert!(timeout(WAIT, server.reader.read_line())
            .await
            .unwrap()
            .is_err());
    }
}
