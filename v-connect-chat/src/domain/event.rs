//! 连接事件协议：每个 WebSocket 文本帧一个 `{"type": ..., "data": ...}` 事件
//! Connection event protocol: one `{"type": ..., "data": ...}` event per WebSocket text frame

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_tungstenite::tungstenite::Message as WsFrame;

use super::message::{Message, SendMessage};
use super::{ConnectionId, ConversationId, MessageId, UserId};
use crate::error::{ChatError, ChatResult};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredAck {
    pub message_id: MessageId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadAck {
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

/// 客户端 -> 服务端 / Client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "auth")]
    Auth(AuthRequest),
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "message:send")]
    MessageSend(SendMessage),
    #[serde(rename = "message:delivered")]
    MessageDelivered(DeliveredAck),
    #[serde(rename = "message:read")]
    MessageRead(ReadAck),
    #[serde(rename = "conversation:join")]
    ConversationJoin(ConversationRef),
    #[serde(rename = "conversation:leave")]
    ConversationLeave(ConversationRef),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationRef),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationRef),
    #[serde(rename = "presence:online")]
    PresenceOnline,
    #[serde(rename = "presence:offline")]
    PresenceOffline,
}

impl ClientEvent {
    pub fn parse(text: &str) -> ChatResult<Self> {
        serde_json::from_str(text).map_err(|e| ChatError::InvalidEvent(e.to_string()))
    }

    pub fn to_frame(&self) -> ChatResult<WsFrame> {
        serde_json::to_string(self).map(WsFrame::Text).map_err(|e| ChatError::InvalidEvent(e.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthOk {
    pub user_id: UserId,
    pub tier: String,
    pub connection_id: ConnectionId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message_id: MessageId,
    pub timestamp: i64,
    /// 回显客户端随机数，便于关联请求 / Echoed nonce so the client can correlate
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredNotice {
    pub message_id: MessageId,
    pub user_id: UserId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
    pub user_id: UserId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub typing: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    pub code: String,
}

impl From<&ChatError> for ErrorEvent {
    fn from(err: &ChatError) -> Self {
        Self { message: err.to_string(), code: err.code().to_string() }
    }
}

/// 服务端 -> 客户端 / Server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "auth:ok")]
    AuthOk(AuthOk),
    #[serde(rename = "pong")]
    Pong(Pong),
    #[serde(rename = "message:sent")]
    MessageSent(MessageSent),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "message:delivered")]
    MessageDelivered(DeliveredNotice),
    #[serde(rename = "message:read")]
    MessageRead(ReadNotice),
    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),
    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdate),
    #[serde(rename = "error")]
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error(ErrorEvent::from(err))
    }

    pub fn encode(&self) -> ChatResult<String> {
        serde_json::to_string(self).map_err(|e| ChatError::InvalidEvent(e.to_string()))
    }

    pub fn parse(text: &str) -> ChatResult<Self> {
        serde_json::from_str(text).map_err(|e| ChatError::InvalidEvent(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AuthOk(_) => "auth:ok",
            ServerEvent::Pong(_) => "pong",
            ServerEvent::MessageSent(_) => "message:sent",
            ServerEvent::MessageNew(_) => "message:new",
            ServerEvent::MessageDelivered(_) => "message:delivered",
            ServerEvent::MessageRead(_) => "message:read",
            ServerEvent::TypingUpdate(_) => "typing:update",
            ServerEvent::PresenceUpdate(_) => "presence:update",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// 广播作用域 / Broadcast scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(UserId),
    Tier(String),
    Conversation(ConversationId),
}

impl Room {
    pub fn user(id: impl Into<String>) -> Self {
        Room::User(id.into())
    }

    pub fn conversation(id: impl Into<String>) -> Self {
        Room::Conversation(id.into())
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{}", id),
            Room::Tier(tier) => write!(f, "tier:{}", tier),
            Room::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}
