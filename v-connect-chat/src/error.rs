use thiserror::Error;

/// 实时核心的统一错误类型 / Unified error type of the real-time core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("user {user_id} is not a member of conversation {conversation_id}")]
    MembershipViolation { user_id: String, conversation_id: String },

    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("unknown message {0}")]
    UnknownMessage(String),

    #[error("persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("connection {0} is closed")]
    ConnectionClosed(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn membership(user_id: &str, conversation_id: &str) -> Self {
        Self::MembershipViolation { user_id: user_id.to_string(), conversation_id: conversation_id.to_string() }
    }

    /// 出站 `error` 事件中的稳定错误码 / Stable code carried by the outbound `error` event
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::AuthFailure(_) => "auth_failure",
            ChatError::MembershipViolation { .. } => "membership_violation",
            ChatError::ConversationNotFound(_) => "conversation_not_found",
            ChatError::UnknownMessage(_) => "unknown_message",
            ChatError::PersistenceFailure(_) => "persistence_failure",
            ChatError::InvalidEvent(_) => "invalid_event",
            ChatError::ConnectionClosed(_) => "connection_closed",
        }
    }

    /// 是否属于瞬时故障（可由离线队列重试）/ Transient failure the offline queue may retry
    pub fn retryable(&self) -> bool {
        Self::code_is_retryable(self.code())
    }

    /// 按错误码判断（客户端只拿得到错误码）/ Decide by code, which is all a client sees
    pub fn code_is_retryable(code: &str) -> bool {
        matches!(code, "persistence_failure" | "connection_closed")
    }
}
