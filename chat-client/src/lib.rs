//! 聊天室客户端
//!
//! - [`client`] 网络句柄：连接、发送、输入状态、事件流
//! - [`view`] 与界面无关的视图状态和输入解析

pub mod client;
pub mod view;

pub use client::{ChatClient, ClientConfig, ClientError, ClientEvent};
pub use view::{parse_input, ChatLine, ChatView, ConnectionState, Input, LineKind, TypingSet};
