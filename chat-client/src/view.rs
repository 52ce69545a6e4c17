//! 客户端本地视图状态
//!
//! 与具体界面无关：消息历史、在线用户、正在输入的用户。任何断开路径
//! 都会把视图收敛到同一个“已断开”状态。

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Local};

use crate::client::ClientEvent;

/// 消息历史上限
const MAX_MESSAGES: usize = 1000;

/// 正在输入的用户名后缀
const TYPING_SUFFIX: &str = " (typing…)";

/// 连接状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { name: String },
}

/// 一行聊天记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    System,
    Chat { from: String },
    Whisper { from: String, to: String },
    Unknown,
}

/// 聊天记录
#[derive(Debug, Clone)]
pub struct ChatLine {
    pub timestamp: DateTime<Local>,
    pub kind: LineKind,
    pub text: String,
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.timestamp.format("%H:%M:%S"))?;
        match &self.kind {
            LineKind::System => write!(f, "[sys] {}", self.text),
            LineKind::Chat { from } => write!(f, "[{}] {}", from, self.text),
            LineKind::Whisper { from, to } => write!(f, "(PM {}→{}) {}", from, to, self.text),
            LineKind::Unknown => write!(f, "[?] {}", self.text),
        }
    }
}

/// 正在输入的用户集合，大小写无关
///
/// 只是展示用的提示状态，由 `TYPING` 事件重建。
#[derive(Debug, Default, Clone)]
pub struct TypingSet {
    users: BTreeMap<String, String>,
}

impl TypingSet {
    pub fn set(&mut self, user: &str, typing: bool) {
        let key = user.to_lowercase();
        if typing {
            self.users.insert(key, user.to_string());
        } else {
            self.users.remove(&key);
        }
    }

    pub fn contains(&self, user: &str) -> bool {
        self.users.contains_key(&user.to_lowercase())
    }

    /// 只保留仍然在线的用户
    pub fn retain_online(&mut self, online: &[String]) {
        self.users
            .retain(|key, _| online.iter().any(|u| u.to_lowercase() == *key));
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.users.values().map(String::as_str)
    }
}

/// 聊天视图
#[derive(Debug)]
pub struct ChatView {
    pub state: ConnectionState,
    /// 聊天消息历史（使用 VecDeque 提高删除效率）
    pub messages: VecDeque<ChatLine>,
    /// 在线用户列表，顺序与服务端一致
    pub users: Vec<String>,
    pub typing: TypingSet,
}

impl ChatView {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            messages: VecDeque::new(),
            users: Vec::new(),
            typing: TypingSet::default(),
        }
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn connected(&mut self, name: &str) -> Option<&ChatLine> {
        self.state = ConnectionState::Connected {
            name: name.to_string(),
        };
        self.add_line(LineKind::System, format!("已连接，用户名 {name}"))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// 应用一个网络事件，产生新聊天记录时返回它
    pub fn apply(&mut self, event: ClientEvent) -> Option<&ChatLine> {
        match event {
            ClientEvent::System { text } => self.add_line(LineKind::System, text),
            ClientEvent::Chat { from, text } => self.add_line(LineKind::Chat { from }, text),
            ClientEvent::Whisper { from, to, text } => {
                self.add_line(LineKind::Whisper { from, to }, text)
            }
            ClientEvent::Unknown { raw } => self.add_line(LineKind::Unknown, raw),
            ClientEvent::UserList { users } => {
                self.typing.retain_online(&users);
                self.users = users;
                None
            }
            ClientEvent::Typing { user, typing } => {
                self.typing.set(&user, typing);
                None
            }
            ClientEvent::Disconnected { reason } => {
                self.state = ConnectionState::Disconnected;
                self.users.clear();
                self.typing.clear();
                self.add_line(LineKind::System, format!("已断开连接: {reason}"))
            }
        }
    }

    /// 用户列表的展示文本，正在输入的用户带后缀
    pub fn user_labels(&self) -> Vec<String> {
        self.users
            .iter()
            .map(|user| {
                if self.typing.contains(user) {
                    format!("{user}{TYPING_SUFFIX}")
                } else {
                    user.clone()
                }
            })
            .collect()
    }

    fn add_line(&mut self, kind: LineKind, text: String) -> Option<&ChatLine> {
        // 限制消息历史数量（VecDeque::pop_front 是 O(1)）
        if self.messages.len() >= MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(ChatLine {
            timestamp: Local::now(),
            kind,
            text,
        });
        self.messages.back()
    }
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

/// 输入框内容解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Whisper { to: String, text: String },
}

/// 解析输入：`/w <user> <text>` 为私聊，空白输入忽略，其余为群聊
pub fn parse_input(input: &str) -> Option<Input> {
    if input.trim().is_empty() {
        return None;
    }

    if let Some(rest) = input.strip_prefix("/w ") {
        if let Some((to, text)) = rest.trim().split_once(' ') {
            if !to.is_empty() && !text.trim().is_empty() {
                return Some(Input::Whisper {
                    to: to.to_string(),
                    text: text.to_string(),
                });
            }
        }
    }

    Some(Input::Chat(input.to_string()))
}
