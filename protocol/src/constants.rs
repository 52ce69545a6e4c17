//! 协议常量定义

use std::time::Duration;

/// 帧分隔符（只发送 `\n`，接收时容忍 `\r\n`）
pub const LINE_DELIMITER: u8 = b'\n';

/// 字段分隔符
pub const FIELD_SEPARATOR: char = '|';

/// 用户列表分隔符
pub const USER_LIST_SEPARATOR: char = ',';

/// 用户名最大长度（字符数）
pub const MAX_USERNAME_LEN: usize = 20;

/// 单条聊天/私聊文本最大长度（字节）
pub const MAX_MESSAGE_LEN: usize = 4096;

/// 单行帧最大长度（字节，不含换行符）
pub const MAX_LINE_LEN: usize = 8192;

/// 服务端最大连接数
pub const MAX_CONNECTIONS: usize = 100;

/// 每个会话的发送队列容量，队列满时断开该会话
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// 默认端口
pub const DEFAULT_PORT: u16 = 8080;

/// 握手超时（秒）- 连接后必须在此时间内发送 SETNAME
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 单次写入超时（秒）
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// 关闭服务时等待会话退出的最长时间（秒）
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// 输入空闲多久后发送 `TYPING|0`（毫秒）
pub const TYPING_IDLE_TIMEOUT_MS: u64 = 1000;

/// 握手超时 Duration
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 写入超时 Duration
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(WRITE_TIMEOUT_SECS);

/// 关闭等待 Duration
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(SHUTDOWN_GRACE_SECS);

/// 输入空闲 Duration
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_millis(TYPING_IDLE_TIMEOUT_MS);
