//! 聊天室服务端
//!
//! 基于 Tokio 的异步 TCP 服务器

use anyhow::Result;
use chat_server::{ChatServer, ServerArgs, ServerConfig, ServerEvent};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("chat_server=debug".parse()?)
                .add_directive("protocol=debug".parse()?),
        )
        .init();

    let config = ServerConfig::from(ServerArgs::parse());
    info!("Chat Server starting on {}", config.listen);

    let server = ChatServer::bind(config).await?;

    // 控制台展示：带时间戳的日志行
    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ServerEvent::LogLine { text }) => {
                    println!("{} {}", Local::now().format("%H:%M:%S"), text);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console lagged {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    server.run().await?;

    Ok(())
}
