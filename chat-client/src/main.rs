//! 聊天室客户端
//!
//! 终端前端：标准输入的每一行是一条消息，`/w <user> <text>` 私聊，`/quit` 退出。

use anyhow::Result;
use chat_client::{parse_input, ChatClient, ChatView, ClientConfig, ClientEvent, Input};
use clap::Parser;
use protocol::DEFAULT_PORT;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about = "Line-protocol chat client", long_about = None)]
struct ClientArgs {
    /// Address of the chat server.
    #[arg(long, env = "CHAT_SERVER", default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    server: String,

    /// Display name to join with.
    #[arg(long, env = "CHAT_NAME")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chat_client=debug".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = ClientArgs::parse();

    let mut view = ChatView::new();
    view.connecting();
    let (client, mut events) =
        ChatClient::connect(&args.server, &args.name, ClientConfig::default()).await?;
    if let Some(line) = view.connected(client.name().as_str()) {
        println!("{line}");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let finished = matches!(event, ClientEvent::Disconnected { .. });
                let roster = matches!(event, ClientEvent::UserList { .. });

                if let Some(line) = view.apply(event) {
                    println!("{line}");
                }
                if roster {
                    println!("online: {}", view.user_labels().join(", "));
                }
                if finished {
                    break;
                }
            }

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim() == "/quit" => client.disconnect(),
                    Ok(Some(_)) if !view.is_connected() || !client.is_connected() => {
                        warn!("Not connected, input ignored");
                    }
                    Ok(Some(line)) => {
                        let sent = match parse_input(&line) {
                            Some(Input::Chat(text)) => client.send(&text),
                            Some(Input::Whisper { to, text }) => client.send_whisper(&to, &text),
                            None => Ok(()),
                        };
                        // 网络任务退出后会收到 Disconnected，这里只记录
                        if let Err(e) = sent {
                            warn!("Failed to send: {}", e);
                        }
                    }
                    Ok(None) | Err(_) => {
                        stdin_open = false;
                        client.disconnect();
                    }
                }
            }
        }
    }

    Ok(())
}
