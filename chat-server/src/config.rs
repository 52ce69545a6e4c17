//! 服务端配置

use std::time::Duration;

use clap::Parser;
use protocol::{
    DEFAULT_PORT, HANDSHAKE_TIMEOUT, MAX_CONNECTIONS, OUTBOUND_QUEUE_CAPACITY, SHUTDOWN_GRACE,
    WRITE_TIMEOUT,
};

/// 服务端运行配置
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// 监听地址，格式为 "host:port"
    pub listen: String,
    /// 同时在线（含握手中）的最大连接数
    pub max_connections: usize,
    /// 等待 SETNAME 的时间
    pub handshake_timeout: Duration,
    /// 每个会话的发送队列容量
    pub outbound_capacity: usize,
    /// 单次写入超时
    pub write_timeout: Duration,
    /// 关闭时等待会话退出的时间
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("127.0.0.1:{DEFAULT_PORT}"),
            max_connections: MAX_CONNECTIONS,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            write_timeout: WRITE_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Line-protocol chat server", long_about = None)]
pub struct ServerArgs {
    /// Address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, env = "CHAT_LISTEN", default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub listen: String,

    /// Maximum number of simultaneous connections.
    #[arg(long, env = "CHAT_MAX_CONNECTIONS", default_value_t = MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Seconds a new connection has to send SETNAME.
    #[arg(long, default_value_t = HANDSHAKE_TIMEOUT.as_secs())]
    pub handshake_timeout_secs: u64,

    /// Lines buffered per client before a slow client is disconnected.
    #[arg(long, default_value_t = OUTBOUND_QUEUE_CAPACITY)]
    pub outbound_capacity: usize,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            max_connections: args.max_connections,
            handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
            outbound_capacity: args.outbound_capacity,
            ..Self::default()
        }
    }
}
