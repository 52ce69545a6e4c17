//! 聊天室共享协议库
//!
//! 包含:
//! - 行协议消息 (ClientMessage, ServerMessage) 与 `Frame` 编解码
//! - 显示名 (DisplayName)
//! - 传输层抽象 (Transport trait)
//! - 有界行读写 (FrameReader, FrameWriter)

mod codec;
mod constants;
mod error;
mod message;
mod name;
mod transport;

pub use codec::{FrameReader, FrameWriter};
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use message::{ClientMessage, Frame, ServerMessage};
pub use name::DisplayName;
pub use transport::{TcpListener, TcpTransport, Transport, TransportConfig, TransportListener};
