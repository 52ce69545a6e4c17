//! 帧编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────────────────────────────────┬──────┐
//! │        Payload (UTF-8, 无换行)        │  \n  │
//! │      最多 MAX_LINE_LEN 字节            │      │
//! └──────────────────────────────────────┴──────┘
//! ```
//!
//! 只发送 `\n`；接收时去掉行尾可能存在的 `\r`。

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::message::Frame;
use crate::{LINE_DELIMITER, MAX_LINE_LEN};

/// 帧读取器
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self::with_max_len(reader, MAX_LINE_LEN)
    }

    /// 指定单行上限创建帧读取器
    pub fn with_max_len(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(256),
            max_len,
        }
    }

    /// 读取一行，去掉行尾的 `\n` 和 `\r`
    ///
    /// 可以安全地放在 `tokio::select!` 中：唯一的等待点是 `fill_buf`，已经读到的
    /// 半行留在内部缓冲里，下次调用从断点继续，不会丢字节。
    ///
    /// 超过上限的行返回 `FrameTooLarge`，此时流已处于行中间，调用方应关闭连接。
    /// 对端关闭且没有剩余数据时返回 `ConnectionClosed`。
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buffer.is_empty() {
                    return Err(ProtocolError::ConnectionClosed);
                }
                // 最后一行没有换行符，按完整一行处理
                break;
            }

            let (chunk, consumed, done) = match available.iter().position(|&b| b == LINE_DELIMITER)
            {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            // 多留 1 字节给可能存在的 `\r`
            if self.buffer.len() + chunk.len() > self.max_len + 1 {
                self.reader.consume(consumed);
                self.buffer.clear();
                warn!("Inbound line exceeds {} bytes, rejecting", self.max_len);
                return Err(ProtocolError::FrameTooLarge { max: self.max_len });
            }
            self.buffer.extend_from_slice(chunk);
            self.reader.consume(consumed);

            if done {
                break;
            }
        }

        self.take_line()
    }

    /// 取出缓冲中的完整一行并清空缓冲
    fn take_line(&mut self) -> Result<String> {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let too_long = self.buffer.len() > self.max_len;
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();

        if too_long {
            return Err(ProtocolError::FrameTooLarge { max: self.max_len });
        }
        Ok(line)
    }

    /// 读取并解码一帧消息
    pub async fn read_frame<M: Frame>(&mut self) -> Result<M> {
        let line = self.read_line().await?;
        Ok(M::decode(&line))
    }

    /// 接收消息（read_frame 的别名）
    pub async fn recv<M: Frame>(&mut self) -> Result<M> {
        self.read_frame().await
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一行（调用方保证不含换行）并刷新
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(LINE_DELIMITER);

        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// 编码并写入一帧消息
    pub async fn write_frame<M: Frame>(&mut self, msg: &M) -> Result<()> {
        self.write_line(&msg.encode()).await
    }

    /// 发送消息（write_frame 的别名）
    pub async fn send<M: Frame>(&mut self, msg: &M) -> Result<()> {
        self.write_frame(msg).await
    }

    /// 关闭写入方向
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage};
    use std::io::Cursor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        // 创建一个内存缓冲区
        let mut buffer = Vec::new();

        {
            let mut writer = FrameWriter::new(&mut buffer);
            let msg = ClientMessage::SetName {
                name: "test_user".to_string(),
            };
            writer.write_frame(&msg).await.unwrap();
        }
        assert_eq!(buffer, b"SETNAME|test_user\n");

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let msg: ClientMessage = reader.read_frame().await.unwrap();
        assert_eq!(
            msg,
            ClientMessage::SetName {
                name: "test_user".to_string()
            }
        );
        assert!(matches!(
            reader.read_line().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_crlf_is_tolerated() {
        let data = b"MSG|Alice|hi\r\nSYS|Bob joined.\n".to_vec();
        let mut reader = FrameReader::new(Cursor::new(data));

        let first: ServerMessage = reader.read_frame().await.unwrap();
        assert_eq!(
            first,
            ServerMessage::Chat {
                from: "Alice".into(),
                text: "hi".into()
            }
        );
        let second: ServerMessage = reader.read_frame().await.unwrap();
        assert_eq!(second, ServerMessage::system("Bob joined."));
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let mut reader = FrameReader::new(Cursor::new(b"MSG|bye".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), "MSG|bye");
        assert!(matches!(
            reader.read_line().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let mut data = vec![b'a'; 64];
        data.push(b'\n');
        let mut reader = FrameReader::with_max_len(Cursor::new(data), 16);
        assert!(matches!(
            reader.read_line().await,
            Err(ProtocolError::FrameTooLarge { max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_line_at_limit_with_crlf() {
        let mut data = vec![b'a'; 16];
        data.extend_from_slice(b"\r\n");
        let mut reader = FrameReader::with_max_len(Cursor::new(data), 16);
        assert_eq!(reader.read_line().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            tx.write_all(b"TYPING|Al").await.unwrap();
            tx.write_all(b"ice|1\nUSERLIST|\n").await.unwrap();
        });

        let mut reader = FrameReader::new(rx);
        let typing: ServerMessage = reader.recv().await.unwrap();
        assert_eq!(
            typing,
            ServerMessage::Typing {
                user: "Alice".into(),
                typing: true
            }
        );
        let list: ServerMessage = reader.recv().await.unwrap();
        assert_eq!(list, ServerMessage::UserList { users: vec![] });
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_read_resumes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);

        tx.write_all(b"MSG|Bob|hel").await.unwrap();
        // 半行时被取消
        assert!(
            tokio::time::timeout(Duration::from_millis(50), reader.read_line())
                .await
                .is_err()
        );

        tx.write_all(b"lo\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), "MSG|Bob|hello");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let mut reader = FrameReader::new(Cursor::new(b"MSG|\xff\n".to_vec()));
        let line = reader.read_line().await.unwrap();
        assert_eq!(line, "MSG|\u{fffd}");
    }
}
