//! 用户显示名
//!
//! 比较、哈希与排序都不区分大小写，展示时保留用户输入的原始写法。

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{ProtocolError, Result};
use crate::{FIELD_SEPARATOR, MAX_USERNAME_LEN, USER_LIST_SEPARATOR};

/// 经过校验的显示名
#[derive(Clone, Debug)]
pub struct DisplayName {
    name: String,
    key: String,
}

impl DisplayName {
    /// 解析握手中的原始用户名（去除首尾空白后校验）
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }

        let len = name.chars().count();
        if len > MAX_USERNAME_LEN {
            return Err(ProtocolError::NameTooLong {
                len,
                max: MAX_USERNAME_LEN,
            });
        }

        // `|` 和 `,` 会破坏 MSG/WHISPER/USERLIST 帧的解析
        if let Some(ch) = name
            .chars()
            .find(|&c| c == FIELD_SEPARATOR || c == USER_LIST_SEPARATOR || c.is_control())
        {
            return Err(ProtocolError::InvalidNameChar { ch });
        }

        Ok(Self {
            name: name.to_string(),
            key: name.to_lowercase(),
        })
    }

    /// 原始写法
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// 大小写无关的查找键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 与任意字符串做大小写无关比较
    pub fn matches(&self, other: &str) -> bool {
        self.key == other.to_lowercase()
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialEq for DisplayName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DisplayName {}

impl Hash for DisplayName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for DisplayName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DisplayName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}
