//! 存储模块 / Storage module
//!
//! 消息、会话与在线状态的持久化由外部协作者负责，这里只定义接口
//! 并提供一个内存实现，用于单机运行与测试。
//! Durable storage belongs to external collaborators; this module defines their
//! interfaces and ships an in-memory implementation for standalone runs and tests.

pub mod traits;

pub use traits::{ConversationStore, PresenceStore, StoreError, StoreResult};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::conversation::{Conversation, ConversationKind, LastMessageSummary};
use crate::domain::message::{Message, NewMessage};
use crate::domain::presence::PresenceState;
use crate::domain::now_ms;

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Message>,
    /// 会话内按持久化顺序排列的消息ID / Message ids per conversation in persistence order
    timeline: HashMap<String, Vec<String>>,
    presence: HashMap<String, PresenceState>,
}

/// 内存存储 / In-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建会话（覆盖同ID会话）/ Create a conversation (replaces one with the same id)
    pub fn create_conversation<I, S>(&self, id: &str, kind: ConversationKind, members: I) -> Conversation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let conv = Conversation::new(id, kind, members);
        self.state.write().conversations.insert(id.to_string(), conv.clone());
        conv
    }

    /// 客户端重连补拉 / Pull-based catch-up after reconnect
    pub fn list_messages(&self, conversation_id: &str) -> Vec<Message> {
        let state = self.state.read();
        state
            .timeline
            .get(conversation_id)
            .map(|ids| ids.iter().filter_map(|id| state.messages.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn presence_of(&self, user_id: &str) -> Option<PresenceState> {
        self.state.read().presence.get(user_id).copied()
    }

    pub fn conversation_count(&self) -> usize {
        self.state.read().conversations.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.state.read().conversations.get(id).cloned())
    }

    async fn save_message(&self, conversation_id: &str, message: NewMessage) -> StoreResult<Message> {
        let mut state = self.state.write();
        if !state.conversations.contains_key(conversation_id) {
            return Err(StoreError::NotFound(format!("conversation {}", conversation_id)));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::persisted(id.clone(), message, now_ms());
        let summary = LastMessageSummary { preview: msg.preview(), sender_id: msg.sender_id.clone(), timestamp: msg.created_at };
        if let Some(conv) = state.conversations.get_mut(conversation_id) {
            conv.last_message = Some(summary);
        }
        state.timeline.entry(conversation_id.to_string()).or_default().push(id.clone());
        state.messages.insert(id, msg.clone());
        Ok(msg)
    }

    async fn get_message(&self, id: &str) -> StoreResult<Option<Message>> {
        Ok(self.state.read().messages.get(id).cloned())
    }

    async fn find_by_nonce(&self, conversation_id: &str, sender_id: &str, nonce: &str) -> StoreResult<Option<Message>> {
        let state = self.state.read();
        let found = state.timeline.get(conversation_id).and_then(|ids| {
            ids.iter()
                .rev()
                .filter_map(|id| state.messages.get(id))
                .find(|m| m.sender_id == sender_id && m.nonce == nonce)
                .cloned()
        });
        Ok(found)
    }

    async fn mark_delivered(&self, message_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        let msg = state.messages.get_mut(message_id).ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
        Ok(msg.record_delivered(user_id))
    }

    async fn mark_read(&self, message_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        let msg = state.messages.get_mut(message_id).ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
        Ok(msg.record_read(user_id))
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn set_presence(&self, user_id: &str, state: PresenceState) -> StoreResult<()> {
        self.state.write().presence.insert(user_id.to_string(), state);
        Ok(())
    }
}
