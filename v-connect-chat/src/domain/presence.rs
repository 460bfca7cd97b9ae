use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ConnectionId, ConversationId, UserId};

/// 写入在线状态存储的持久状态 / Durable state written to the presence store
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub online: bool,
    pub last_seen: i64,
}

/// 用户在线记录：online 由连接集合推导 / Presence record; online derives from the connection set
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub connections: BTreeSet<ConnectionId>,
    pub last_seen: i64,
    /// 正在输入的会话（短暂状态）/ Conversations the user is typing in (ephemeral)
    pub typing: BTreeSet<ConversationId>,
    /// 显式 presence:offline（隐身）/ Explicit presence:offline (invisible)
    pub hidden: bool,
}

impl PresenceRecord {
    pub fn new(user_id: impl Into<String>, now: i64) -> Self {
        Self { user_id: user_id.into(), connections: BTreeSet::new(), last_seen: now, typing: BTreeSet::new(), hidden: false }
    }

    /// 至少一条连接存活 / At least one live connection
    pub fn online(&self) -> bool {
        !self.connections.is_empty()
    }

    /// 对外公布的在线状态（隐身时为离线）/ Advertised state; offline while hidden
    pub fn advertised_online(&self) -> bool {
        self.online() && !self.hidden
    }

    pub fn state(&self) -> PresenceState {
        PresenceState { online: self.advertised_online(), last_seen: self.last_seen }
    }
}
