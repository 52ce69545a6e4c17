//! 聊天室服务端
//!
//! - [`registry`] 显示名到会话的并发映射，负责唯一性和生命周期
//! - [`session`] 单个连接的会话状态和串行写任务
//! - [`router`] 广播、私聊、输入状态的路由规则
//! - [`server`] 接受连接、握手、任务跟踪和关闭流程
//! - [`events`] 供展示层订阅的事件流
//! - [`config`] 运行配置和命令行参数

pub mod config;
pub mod events;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use config::{ServerArgs, ServerConfig};
pub use events::{EventSender, ServerEvent};
pub use registry::SessionRegistry;
pub use router::Router;
pub use server::{ChatServer, Rejection, ServerHandle};
pub use session::{ClientSession, SessionId};
