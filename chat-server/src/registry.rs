//! 会话注册表
//!
//! 显示名（大小写无关）到会话的映射，是所有路由循环之间唯一共享的可变状态。
//! 插入、删除和快照都在同一把读写锁下完成，快照永远看不到插入或删除到一半的条目。
//! 以小写键存放在有序映射里，快照天然按大小写无关的字典序排列。

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use protocol::{DisplayName, ServerMessage};
use tokio::sync::RwLock;
use tracing::debug;

use crate::session::ClientSession;

/// 在线会话注册表
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名字未被占用时插入，成功返回 true
    ///
    /// 成功时在同一把写锁内给新会话投递第一帧 `USERLIST`，任何广播都只能
    /// 排在这份快照之后。
    pub async fn try_register(&self, session: Arc<ClientSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.name().key().to_string()) {
            Entry::Vacant(entry) => {
                debug!("Registered {} (session {})", session.name(), session.id());
                entry.insert(Arc::clone(&session));
                session.send(&user_list(&sessions));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// 移除会话，返回是否真的移除了
    ///
    /// 只有注册表中同名条目正是这个会话时才移除，重复调用或名字已被新会话
    /// 复用时都是空操作。
    pub async fn unregister(&self, session: &ClientSession) -> bool {
        let mut sessions = self.sessions.write().await;
        let key = session.name().key();
        let owned = sessions
            .get(key)
            .is_some_and(|current| current.id() == session.id());
        if !owned {
            return false;
        }

        sessions.remove(key);
        debug!("Unregistered {} (session {})", session.name(), session.id());
        true
    }

    /// 当前用户列表消息
    pub async fn user_list(&self) -> ServerMessage {
        user_list(&*self.sessions.read().await)
    }

    /// 在线用户名，按大小写无关的字典序
    pub async fn snapshot(&self) -> Vec<DisplayName> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.name().clone()).collect()
    }

    /// 大小写无关地查找会话
    pub async fn lookup(&self, name: &str) -> Option<Arc<ClientSession>> {
        let key = name.trim().to_lowercase();
        let sessions = self.sessions.read().await;
        sessions.get(&key).cloned()
    }

    /// 所有在线会话，用于广播
    pub async fn sessions(&self) -> Vec<Arc<ClientSession>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// 在线会话数
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn user_list(sessions: &BTreeMap<String, Arc<ClientSession>>) -> ServerMessage {
    ServerMessage::UserList {
        users: sessions.values().map(|s| s.name().to_string()).collect(),
    }
}
