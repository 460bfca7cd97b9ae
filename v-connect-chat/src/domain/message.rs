use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{ConversationId, MessageId, UserId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Voice,
}

/// 按消息类型携带的附加信息 / Kind-specific metadata
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// 入站 `message:send` 负载，也是离线队列缓存的内容
/// Inbound `message:send` payload; also what the offline queue buffers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub conversation_id: ConversationId,
    pub kind: MessageKind,
    /// 已加密的不透明内容 / Opaque, already-encrypted content
    pub content: String,
    /// 加密随机数，同时作为幂等键 / Encryption nonce, doubles as the idempotency key
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl SendMessage {
    pub fn text(conversation_id: impl Into<String>, content: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: MessageKind::Text,
            content: content.into(),
            nonce: nonce.into(),
            reply_to: None,
            metadata: None,
        }
    }
}

/// 待持久化的消息（尚无ID）/ Message awaiting persistence (no id yet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub body: SendMessage,
}

/// 已持久化的消息 / Persisted message
///
/// 内容不可变；只有 delivered_to / read_by 随回执增长，且
/// `sender_id ∈ delivered_to`、`read_by ⊆ delivered_to` 恒成立。
/// Content is immutable; only delivered_to / read_by grow with acks, and
/// `sender_id ∈ delivered_to` and `read_by ⊆ delivered_to` always hold.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub created_at: i64,
    pub delivered_to: BTreeSet<UserId>,
    pub read_by: BTreeSet<UserId>,
}

/// 单个接收者视角的投递状态，只能前进 / Per-recipient delivery state, forward-only
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl Message {
    /// 持久化时构建，发送者隐式视为已送达 / Built on persist; the sender counts as delivered
    pub fn persisted(id: impl Into<String>, new: NewMessage, created_at: i64) -> Self {
        let NewMessage { sender_id, body } = new;
        let mut delivered_to = BTreeSet::new();
        delivered_to.insert(sender_id.clone());
        Self {
            id: id.into(),
            conversation_id: body.conversation_id,
            sender_id,
            kind: body.kind,
            content: body.content,
            nonce: body.nonce,
            reply_to: body.reply_to,
            metadata: body.metadata,
            created_at,
            delivered_to,
            read_by: BTreeSet::new(),
        }
    }

    pub fn state_for(&self, user_id: &str) -> DeliveryState {
        if self.read_by.contains(user_id) {
            DeliveryState::Read
        } else if self.delivered_to.contains(user_id) {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        }
    }

    /// 记录送达，返回是否为新状态 / Record delivery; true if it was new
    pub fn record_delivered(&mut self, user_id: &str) -> bool {
        self.delivered_to.insert(user_id.to_string())
    }

    /// 记录已读（已读蕴含送达），返回是否为新状态
    /// Record read (read implies delivered); true if it was new
    pub fn record_read(&mut self, user_id: &str) -> bool {
        self.delivered_to.insert(user_id.to_string());
        self.read_by.insert(user_id.to_string())
    }

    /// 会话列表预览 / Preview for the conversation list
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Text => self.content.chars().take(64).collect(),
            MessageKind::Image => "[image]".to_string(),
            MessageKind::File => match self.metadata.as_ref().and_then(|m| m.file_name.as_ref()) {
                Some(name) => format!("[file] {}", name),
                None => "[file]".to_string(),
            },
            MessageKind::Voice => "[voice]".to_string(),
        }
    }
}
