//! 服务端事件流
//!
//! 仅供展示和日志使用，不影响协议行为。没有订阅者时事件直接丢弃。

use tokio::sync::broadcast;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 服务端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// 用户加入
    ClientJoined { name: String },
    /// 用户离开
    ClientLeft { name: String },
    /// 运行日志
    LogLine { text: String },
}

/// 事件发送端
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventSender {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ServerEvent) {
        // 没有订阅者不是错误
        let _ = self.tx.send(event);
    }

    pub fn log(&self, text: impl Into<String>) {
        self.emit(ServerEvent::LogLine { text: text.into() });
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
