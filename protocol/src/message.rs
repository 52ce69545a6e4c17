//! 消息类型定义
//!
//! 每条消息对应一行以 `|` 分隔的 UTF-8 文本，第一个字段是区分大小写的类型标签。
//! 客户端发送的是不带发送者的形式，服务端补全发送者后再转发：
//!
//! ```text
//! 客户端 -> 服务端                服务端 -> 客户端
//! SETNAME|<name>
//! MSG|<text>                     MSG|<from>|<text>
//! WHISPER|<to>|<text>            WHISPER|<from>|<to>|<text>
//! TYPING|<0|1>                   TYPING|<user>|<0|1>
//!                                SYS|<text>
//!                                USERLIST|<a,b,c>
//! ```
//!
//! 文本字段本身可以包含 `|`，解析时只切分前 N-1 个分隔符。
//! 无法识别的行（包括字段缺失的已知标签）解析为 `Unknown`，不视为错误。

use crate::error::{ProtocolError, Result};
use crate::{FIELD_SEPARATOR, MAX_MESSAGE_LEN, USER_LIST_SEPARATOR};

const TAG_SETNAME: &str = "SETNAME";
const TAG_SYS: &str = "SYS";
const TAG_USERLIST: &str = "USERLIST";
const TAG_MSG: &str = "MSG";
const TAG_WHISPER: &str = "WHISPER";
const TAG_TYPING: &str = "TYPING";

/// 一行文本与一条消息之间的双向映射
pub trait Frame: Sized {
    /// 编码为一行文本（不含换行符）
    fn encode(&self) -> String;

    /// 从一行文本（已去掉行尾）解码，永不失败
    fn decode(line: &str) -> Self;
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// 握手，设置显示名（原始文本，由服务端校验）
    SetName { name: String },
    /// 群聊消息
    Chat { text: String },
    /// 私聊消息
    Whisper { to: String, text: String },
    /// 正在输入状态
    Typing { typing: bool },
    /// 无法识别的行
    Unknown { raw: String },
}

impl ClientMessage {
    /// 校验消息内容是否符合约束
    pub fn validate(&self) -> Result<()> {
        match self {
            ClientMessage::Chat { text } | ClientMessage::Whisper { text, .. } => {
                if text.len() > MAX_MESSAGE_LEN {
                    return Err(ProtocolError::MessageTooLong {
                        len: text.len(),
                        max: MAX_MESSAGE_LEN,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Frame for ClientMessage {
    fn encode(&self) -> String {
        match self {
            ClientMessage::SetName { name } => join(&[TAG_SETNAME, name]),
            ClientMessage::Chat { text } => join(&[TAG_MSG, text]),
            ClientMessage::Whisper { to, text } => join(&[TAG_WHISPER, to, text]),
            ClientMessage::Typing { typing } => join(&[TAG_TYPING, flag(*typing)]),
            ClientMessage::Unknown { raw } => single_line(raw),
        }
    }

    fn decode(line: &str) -> Self {
        let unknown = || ClientMessage::Unknown {
            raw: line.to_string(),
        };
        let Some((tag, rest)) = line.split_once(FIELD_SEPARATOR) else {
            return unknown();
        };

        match tag {
            TAG_SETNAME => ClientMessage::SetName {
                name: rest.to_string(),
            },
            TAG_MSG => ClientMessage::Chat {
                text: rest.to_string(),
            },
            TAG_WHISPER => match rest.split_once(FIELD_SEPARATOR) {
                Some((to, text)) if !to.is_empty() => ClientMessage::Whisper {
                    to: to.to_string(),
                    text: text.to_string(),
                },
                _ => unknown(),
            },
            TAG_TYPING => match parse_flag(rest) {
                Some(typing) => ClientMessage::Typing { typing },
                None => unknown(),
            },
            _ => unknown(),
        }
    }
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// 系统通知
    System { text: String },
    /// 在线用户列表（已排序）
    UserList { users: Vec<String> },
    /// 群聊消息广播
    Chat { from: String, text: String },
    /// 私聊消息，同时发给发送者和接收者
    Whisper {
        from: String,
        to: String,
        text: String,
    },
    /// 某用户的输入状态
    Typing { user: String, typing: bool },
    /// 无法识别的行
    Unknown { raw: String },
}

impl ServerMessage {
    /// 构造系统通知
    pub fn system(text: impl Into<String>) -> Self {
        ServerMessage::System { text: text.into() }
    }
}

impl Frame for ServerMessage {
    fn encode(&self) -> String {
        match self {
            ServerMessage::System { text } => join(&[TAG_SYS, text]),
            ServerMessage::UserList { users } => {
                let csv = users.join(&USER_LIST_SEPARATOR.to_string());
                join(&[TAG_USERLIST, &csv])
            }
            ServerMessage::Chat { from, text } => join(&[TAG_MSG, from, text]),
            ServerMessage::Whisper { from, to, text } => join(&[TAG_WHISPER, from, to, text]),
            ServerMessage::Typing { user, typing } => join(&[TAG_TYPING, user, flag(*typing)]),
            ServerMessage::Unknown { raw } => single_line(raw),
        }
    }

    fn decode(line: &str) -> Self {
        let unknown = || ServerMessage::Unknown {
            raw: line.to_string(),
        };
        let Some((tag, rest)) = line.split_once(FIELD_SEPARATOR) else {
            return unknown();
        };

        match tag {
            TAG_SYS => ServerMessage::System {
                text: rest.to_string(),
            },
            TAG_USERLIST => ServerMessage::UserList {
                users: rest
                    .split(USER_LIST_SEPARATOR)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            TAG_MSG => match rest.split_once(FIELD_SEPARATOR) {
                Some((from, text)) if !from.is_empty() => ServerMessage::Chat {
                    from: from.to_string(),
                    text: text.to_string(),
                },
                _ => unknown(),
            },
            TAG_WHISPER => {
                let mut parts = rest.splitn(3, FIELD_SEPARATOR);
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(from), Some(to), Some(text)) if !from.is_empty() && !to.is_empty() => {
                        ServerMessage::Whisper {
                            from: from.to_string(),
                            to: to.to_string(),
                            text: text.to_string(),
                        }
                    }
                    _ => unknown(),
                }
            }
            TAG_TYPING => match rest.rsplit_once(FIELD_SEPARATOR) {
                Some((user, raw_flag)) if !user.is_empty() => match parse_flag(raw_flag) {
                    Some(typing) => ServerMessage::Typing {
                        user: user.to_string(),
                        typing,
                    },
                    None => unknown(),
                },
                _ => unknown(),
            },
            _ => unknown(),
        }
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// 拼接字段，并保证结果中不含换行
fn join(fields: &[&str]) -> String {
    let line = fields.join(&FIELD_SEPARATOR.to_string());
    single_line(&line)
}

/// 把 CR/LF 替换为空格，一个事件只能产生一行
fn single_line(text: &str) -> String {
    if text.contains(['\r', '\n']) {
        text.replace("\r\n", " ").replace(['\r', '\n'], " ")
    } else {
        text.to_string()
    }
}
