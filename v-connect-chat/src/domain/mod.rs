//! 领域模型 / Domain model
//!
//! 会话、消息、在线状态与连接事件协议
//! Conversations, messages, presence and the connection event protocol

pub mod context;
pub mod conversation;
pub mod event;
pub mod message;
pub mod presence;

pub type UserId = String;
pub type ConversationId = String;
pub type MessageId = String;
pub type ConnectionId = String;

/// 当前毫秒时间戳 / Current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
