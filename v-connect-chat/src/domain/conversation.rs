use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ConversationId, UserId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// 会话列表渲染用的最后一条消息摘要 / Last-message summary for list rendering
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    pub preview: String,
    pub sender_id: UserId,
    pub timestamp: i64,
}

/// 会话：成员在创建后不可变 / Conversation; membership is immutable after creation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub members: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageSummary>,
}

impl Conversation {
    pub fn new<I, S>(id: impl Into<String>, kind: ConversationKind, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { id: id.into(), kind, members: members.into_iter().map(Into::into).collect(), last_message: None }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// 除发送者外的成员 / Members other than the given sender
    pub fn recipients<'a>(&'a self, sender_id: &'a str) -> impl Iterator<Item = &'a UserId> + 'a {
        self.members.iter().filter(move |m| m.as_str() != sender_id)
    }
}
