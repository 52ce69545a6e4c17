//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 帧大小超限
    #[error("Frame too large: more than {max} bytes")]
    FrameTooLarge { max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 用户名为空
    #[error("Username is empty")]
    EmptyName,

    /// 用户名过长
    #[error("Username too long: {len} chars (max: {max})")]
    NameTooLong { len: usize, max: usize },

    /// 用户名包含协议保留字符或控制字符
    #[error("Username contains forbidden character {ch:?}")]
    InvalidNameChar { ch: char },

    /// 消息过长
    #[error("Message too long: {len} bytes (max: {max})")]
    MessageTooLong { len: usize, max: usize },
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
