use async_trait::async_trait;
use thiserror::Error;

use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, NewMessage};
use crate::domain::presence::PresenceState;
use crate::error::ChatError;

/// 外部存储协作者错误 / Storage collaborator error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::PersistenceFailure(err.to_string())
    }
}

/// 会话与消息存储：消息内容的唯一事实来源
/// Conversation and message storage: the single source of truth for message content
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>>;

    /// 分配ID与时间戳并更新会话摘要 / Assigns id and timestamp, updates the conversation summary
    async fn save_message(&self, conversation_id: &str, message: NewMessage) -> StoreResult<Message>;

    async fn get_message(&self, id: &str) -> StoreResult<Option<Message>>;

    /// 幂等键查找 / Idempotency-key lookup
    async fn find_by_nonce(&self, conversation_id: &str, sender_id: &str, nonce: &str) -> StoreResult<Option<Message>>;

    /// 返回是否为新送达 / Returns whether the delivery is new
    async fn mark_delivered(&self, message_id: &str, user_id: &str) -> StoreResult<bool>;

    /// 返回是否为新已读 / Returns whether the read is new
    async fn mark_read(&self, message_id: &str, user_id: &str) -> StoreResult<bool>;
}

/// 在线状态持久化 / Presence persistence
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_presence(&self, user_id: &str, state: PresenceState) -> StoreResult<()>;
}
