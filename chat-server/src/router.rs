//! 消息路由
//!
//! 每个会话有一个读循环，按消息类型决定哪些会话收到哪些帧：
//! - `MSG`: 广播给所有在线会话（包括发送者自己）
//! - `WHISPER`: 只发给目标和发送者，目标不存在时静默丢弃
//! - `TYPING`: 广播给所有在线会话，不排除发送者
//! - 其他: 只记录日志，不转发
//!
//! 同一个发送者的消息按读取顺序依次投递到各接收方的 FIFO 队列，
//! 因此单个发送者的因果顺序不会被打乱。

use std::sync::Arc;

use protocol::{ClientMessage, Frame, FrameReader, ProtocolError, ServerMessage};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::events::{EventSender, ServerEvent};
use crate::registry::SessionRegistry;
use crate::session::{ClientSession, Line};

/// 消息过长时发给发送者的通知
pub const MESSAGE_TOO_LONG: &str = "Message too long.";

/// 路由引擎
#[derive(Debug)]
pub struct Router {
    registry: Arc<SessionRegistry>,
    events: EventSender,
}

impl Router {
    pub fn new(registry: Arc<SessionRegistry>, events: EventSender) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 广播给所有在线会话，返回成功入队的数量
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        let line = Line::from(msg.encode());
        let sessions = self.registry.sessions().await;
        sessions
            .iter()
            .filter(|session| session.send_line(Arc::clone(&line)))
            .count()
    }

    async fn broadcast_user_list(&self) {
        let list = self.registry.user_list().await;
        self.broadcast(&list).await;
    }

    /// 注册成功后广播加入通知和新列表
    ///
    /// 新会话的第一帧快照已由 `SessionRegistry::try_register` 投递。
    pub async fn join(&self, session: &ClientSession) {
        let name = session.name().to_string();

        self.broadcast(&ServerMessage::system(format!("{name} joined.")))
            .await;
        self.broadcast_user_list().await;

        info!("{} connected from {:?}", name, session.peer());
        self.events.emit(ServerEvent::ClientJoined { name: name.clone() });
        self.events.log(format!("{name} connected."));
    }

    /// 会话结束：先从注册表移除，再通知剩余会话
    ///
    /// 先移除后广播，保证广播的用户列表里不会再有离开者。
    pub async fn leave(&self, session: &ClientSession) {
        if !self.registry.unregister(session).await {
            return;
        }

        let name = session.name().to_string();
        self.broadcast(&ServerMessage::system(format!("{name} left.")))
            .await;
        self.broadcast_user_list().await;

        let online_secs = (chrono::Utc::now() - session.connected_at()).num_seconds();
        info!("{} disconnected after {}s", name, online_secs);
        self.events.emit(ServerEvent::ClientLeft { name: name.clone() });
        self.events.log(format!("{name} disconnected."));
    }

    /// 处理一条来自会话的消息
    pub async fn dispatch(&self, session: &ClientSession, msg: ClientMessage) {
        if let Err(e) = msg.validate() {
            debug!("Dropping message from {}: {}", session.name(), e);
            session.send(&ServerMessage::system(MESSAGE_TOO_LONG));
            return;
        }

        match msg {
            ClientMessage::Chat { text } => {
                debug!("{} sent: {}", session.name(), text);
                self.broadcast(&ServerMessage::Chat {
                    from: session.name().to_string(),
                    text,
                })
                .await;
            }
            ClientMessage::Whisper { to, text } => {
                let Some(target) = self.registry.lookup(&to).await else {
                    debug!("{} whispered to unknown user {}", session.name(), to);
                    return;
                };

                let whisper = ServerMessage::Whisper {
                    from: session.name().to_string(),
                    to: target.name().to_string(),
                    text,
                };
                let line = Line::from(whisper.encode());
                target.send_line(Arc::clone(&line));
                if target.id() != session.id() {
                    session.send_line(line);
                }
            }
            ClientMessage::Typing { typing } => {
                self.broadcast(&ServerMessage::Typing {
                    user: session.name().to_string(),
                    typing,
                })
                .await;
            }
            ClientMessage::SetName { name } => {
                debug!("{} sent SETNAME|{} after handshake, ignoring", session.name(), name);
            }
            ClientMessage::Unknown { raw } => {
                debug!("Unknown line from {}: {:?}", session.name(), raw);
            }
        }
    }

    /// 会话读循环，直到对端断开、读取出错或会话被关闭，然后走退出流程
    pub async fn run_session<R: AsyncRead + Unpin>(
        &self,
        session: Arc<ClientSession>,
        mut reader: FrameReader<R>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = session.closed() => {
                    debug!("Session {} closed", session.name());
                    break;
                }

                result = reader.recv::<ClientMessage>() => {
                    match result {
                        Ok(msg) => self.dispatch(&session, msg).await,
                        Err(ProtocolError::ConnectionClosed) => {
                            debug!("{} closed the connection", session.name());
                            break;
                        }
                        Err(e) => {
                            warn!("Error receiving from {}: {}", session.name(), e);
                            break;
                        }
                    }
                }
            }
        }

        self.leave(&session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DisplayName;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Peer {
        session: Arc<ClientSession>,
        rx: mpsc::Receiver<Line>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Ok(line) = self.rx.try_recv() {
                lines.push(line.to_string());
            }
            lines
        }
    }

    async fn connect(router: &Router, id: u64, name: &str) -> Peer {
        let (session, rx) = ClientSession::new(
            id,
            DisplayName::parse(name).unwrap(),
            None,
            64,
            CancellationToken::new(),
        );
        let session = Arc::new(session);
        assert!(router.registry().try_register(Arc::clone(&session)).await);
        router.join(&session).await;
        Peer { session, rx }
    }

    fn router() -> Router {
        Router::new(Arc::new(SessionRegistry::new()), EventSender::new())
    }

    #[tokio::test]
    async fn test_join_sends_snapshot_then_announces() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        assert_eq!(
            alice.drain(),
            vec!["USERLIST|Alice", "SYS|Alice joined.", "USERLIST|Alice"]
        );

        let mut bob = connect(&router, 2, "bob").await;
        assert_eq!(
            bob.drain(),
            vec!["USERLIST|Alice,bob", "SYS|bob joined.", "USERLIST|Alice,bob"]
        );
        assert_eq!(alice.drain(), vec!["SYS|bob joined.", "USERLIST|Alice,bob"]);
    }

    #[tokio::test]
    async fn test_snapshot_precedes_racing_broadcast() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        alice.drain();

        let (session, rx) = ClientSession::new(
            2,
            DisplayName::parse("Bob").unwrap(),
            None,
            64,
            CancellationToken::new(),
        );
        let mut bob = Peer {
            session: Arc::new(session),
            rx,
        };
        assert!(router.registry().try_register(Arc::clone(&bob.session)).await);

        // Bob 已可见但还没执行 join，此时 Alice 的消息抢先广播
        router
            .dispatch(&alice.session, ClientMessage::Chat { text: "x".into() })
            .await;
        router.join(&bob.session).await;

        assert_eq!(
            bob.drain(),
            vec![
                "USERLIST|Alice,Bob",
                "MSG|Alice|x",
                "SYS|Bob joined.",
                "USERLIST|Alice,Bob",
            ]
        );
        assert_eq!(
            alice.drain(),
            vec!["MSG|Alice|x", "SYS|Bob joined.", "USERLIST|Alice,Bob"]
        );
    }

    #[tokio::test]
    async fn test_chat_echoes_to_everyone_once() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        alice.drain();
        bob.drain();

        router
            .dispatch(&alice.session, ClientMessage::Chat { text: "hi".into() })
            .await;

        assert_eq!(alice.drain(), vec!["MSG|Alice|hi"]);
        assert_eq!(bob.drain(), vec!["MSG|Alice|hi"]);
    }

    #[tokio::test]
    async fn test_whisper_reaches_only_sender_and_target() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        let mut carol = connect(&router, 3, "Carol").await;
        alice.drain();
        bob.drain();
        carol.drain();

        router
            .dispatch(
                &alice.session,
                ClientMessage::Whisper {
                    to: "bob".into(),
                    text: "secret|stuff".into(),
                },
            )
            .await;

        assert_eq!(bob.drain(), vec!["WHISPER|Alice|Bob|secret|stuff"]);
        assert_eq!(alice.drain(), vec!["WHISPER|Alice|Bob|secret|stuff"]);
        assert!(carol.drain().is_empty());
    }

    #[tokio::test]
    async fn test_whisper_to_missing_user_is_dropped() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        alice.drain();
        bob.drain();

        router
            .dispatch(
                &alice.session,
                ClientMessage::Whisper {
                    to: "ghost".into(),
                    text: "anyone?".into(),
                },
            )
            .await;

        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());
        assert!(!alice.session.is_closed());
    }

    #[tokio::test]
    async fn test_whisper_to_self_delivered_once() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        alice.drain();

        router
            .dispatch(
                &alice.session,
                ClientMessage::Whisper {
                    to: "alice".into(),
                    text: "note".into(),
                },
            )
            .await;
        assert_eq!(alice.drain(), vec!["WHISPER|Alice|Alice|note"]);
    }

    #[tokio::test]
    async fn test_typing_broadcast_includes_sender() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        alice.drain();
        bob.drain();

        router
            .dispatch(&alice.session, ClientMessage::Typing { typing: true })
            .await;
        router
            .dispatch(&alice.session, ClientMessage::Typing { typing: false })
            .await;

        let expected = vec!["TYPING|Alice|1", "TYPING|Alice|0"];
        assert_eq!(alice.drain(), expected);
        assert_eq!(bob.drain(), expected);
    }

    #[tokio::test]
    async fn test_unknown_and_repeated_setname_not_forwarded() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        alice.drain();
        bob.drain();

        router
            .dispatch(
                &alice.session,
                ClientMessage::Unknown {
                    raw: "PING".into(),
                },
            )
            .await;
        router
            .dispatch(
                &alice.session,
                ClientMessage::SetName {
                    name: "Mallory".into(),
                },
            )
            .await;

        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());
        assert!(router.registry().lookup("Alice").await.is_some());
    }

    #[tokio::test]
    async fn test_oversized_message_only_notifies_sender() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let mut bob = connect(&router, 2, "Bob").await;
        alice.drain();
        bob.drain();

        router
            .dispatch(
                &alice.session,
                ClientMessage::Chat {
                    text: "x".repeat(protocol::MAX_MESSAGE_LEN + 1),
                },
            )
            .await;

        assert_eq!(alice.drain(), vec!["SYS|Message too long."]);
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_leave_removes_before_announcing() {
        let router = router();
        let events = router.events.clone();
        let mut rx = events.subscribe();
        let mut alice = connect(&router, 1, "Alice").await;
        let bob = connect(&router, 2, "Bob").await;
        alice.drain();

        router.leave(&bob.session).await;
        assert_eq!(alice.drain(), vec!["SYS|Bob left.", "USERLIST|Alice"]);

        // 重复清理不会再次广播
        router.leave(&bob.session).await;
        assert!(alice.drain().is_empty());

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ServerEvent::ClientJoined {
            name: "Bob".into()
        }));
        assert!(seen.contains(&ServerEvent::ClientLeft {
            name: "Bob".into()
        }));
    }

    #[tokio::test]
    async fn test_run_session_preserves_order_and_cleans_up() {
        let router = router();
        let mut alice = connect(&router, 1, "Alice").await;
        let bob = connect(&router, 2, "Bob").await;
        alice.drain();

        let input = b"MSG|one\nMSG|two\r\nBOGUS\nMSG|three\n".to_vec();
        let reader = FrameReader::new(std::io::Cursor::new(input));
        router.run_session(Arc::clone(&bob.session), reader).await;

        assert_eq!(
            alice.drain(),
            vec![
                "MSG|Bob|one",
                "MSG|Bob|two",
                "MSG|Bob|three",
                "SYS|Bob left.",
                "USERLIST|Alice",
            ]
        );
        assert!(router.registry().lookup("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_closed_session_exits_read_loop() {
        let router = router();
        let alice = connect(&router, 1, "Alice").await;
        let (_client, server) = tokio::io::duplex(64);

        alice.session.close();
        router
            .run_session(Arc::clone(&alice.session), FrameReader::new(server))
            .await;
        assert!(router.registry().is_empty().await);
    }
}
