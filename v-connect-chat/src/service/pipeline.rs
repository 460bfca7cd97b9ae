use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::context::ConnectionContext;
use crate::domain::conversation::Conversation;
use crate::domain::event::{DeliveredNotice, ReadNotice, Room, ServerEvent};
use crate::domain::message::{Message, NewMessage, SendMessage};
use crate::domain::{ConversationId, MessageId};
use crate::error::{ChatError, ChatResult};
use crate::server::RoomHub;
use crate::storage::ConversationStore;

/// 发送结果，网关据此回复 `message:sent`
/// Send outcome; the gateway answers `message:sent` from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub timestamp: i64,
    pub nonce: String,
    /// 重复提交（同一幂等键）未再次持久化 / Replayed submission that was not persisted again
    pub duplicate: bool,
    /// 收到 `message:new` 的连接数 / Connections that received `message:new`
    pub fanned_out: usize,
}

/// 消息管道：校验成员、持久化、扇出、回执
/// Message pipeline: membership check, persistence, fan-out, acknowledgements
pub struct MessagePipeline {
    hub: Arc<RoomHub>,
    store: Arc<dyn ConversationStore>,
    conversation_locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl MessagePipeline {
    pub fn new(hub: Arc<RoomHub>, store: Arc<dyn ConversationStore>) -> Self {
        Self { hub, store, conversation_locks: DashMap::new() }
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.conversation_locks.entry(conversation_id.to_string()).or_default().value().clone()
    }

    /// 无人持有时移除会话锁 / Drop the conversation lock once nobody else holds it
    fn release_lock(&self, conversation_id: &str) {
        self.conversation_locks.remove_if(conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// 当前缓存的会话锁数量 / Number of conversation locks currently held in the table
    pub fn tracked_locks(&self) -> usize {
        self.conversation_locks.len()
    }

    async fn member_conversation(&self, conversation_id: &str, user_id: &str) -> ChatResult<Conversation> {
        let conv = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        if !conv.is_member(user_id) {
            return Err(ChatError::membership(user_id, conversation_id));
        }
        Ok(conv)
    }

    /// 会话成员校验（输入状态等旁路事件使用）/ Membership check for side-channel events such as typing
    pub async fn authorize_member(&self, ctx: &ConnectionContext, conversation_id: &str) -> ChatResult<()> {
        self.member_conversation(conversation_id, ctx.user_id()).await.map(|_| ())
    }

    async fn load_message(&self, message_id: &str) -> ChatResult<Message> {
        self.store.get_message(message_id).await?.ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))
    }

    /// 发送：校验 -> 持久化 -> 扇出到 `user:{id}` 房间
    /// Send: validate -> persist -> fan out to `user:{id}` rooms
    ///
    /// 同一会话内的持久化串行执行，持久化顺序即 Sent 顺序；持久化失败时不扇出。
    /// Persistence is serialized per conversation so its order defines Sent order;
    /// nothing is fanned out when persistence fails.
    pub async fn send(&self, ctx: &ConnectionContext, request: SendMessage) -> ChatResult<SendReceipt> {
        if request.nonce.trim().is_empty() {
            return Err(ChatError::InvalidEvent("nonce is required".to_string()));
        }
        if request.content.is_empty() {
            return Err(ChatError::InvalidEvent("content is required".to_string()));
        }
        let sender_id = ctx.user_id();
        let conv = match self.member_conversation(&request.conversation_id, sender_id).await {
            Ok(conv) => conv,
            Err(e) => {
                warn!("reject send from {} to {}: {}", sender_id, request.conversation_id, e);
                return Err(e);
            }
        };

        let lock = self.conversation_lock(&conv.id);
        let outcome = {
            let _guard = lock.lock().await;
            self.persist_and_fan_out(&conv, sender_id, request).await
        };
        drop(lock);
        self.release_lock(&conv.id);
        outcome
    }

    async fn persist_and_fan_out(&self, conv: &Conversation, sender_id: &str, request: SendMessage) -> ChatResult<SendReceipt> {
        if let Some(existing) = self.store.find_by_nonce(&conv.id, sender_id, &request.nonce).await? {
            info!("duplicate send nonce={} from {} -> existing {}", request.nonce, sender_id, existing.id);
            return Ok(SendReceipt { message_id: existing.id, timestamp: existing.created_at, nonce: existing.nonce, duplicate: true, fanned_out: 0 });
        }
        if let Some(reply_to) = request.reply_to.as_deref() {
            let parent = self.load_message(reply_to).await?;
            if parent.conversation_id != conv.id {
                return Err(ChatError::UnknownMessage(reply_to.to_string()));
            }
        }

        let new = NewMessage { sender_id: sender_id.to_string(), body: request };
        let message = match self.store.save_message(&conv.id, new).await {
            Ok(m) => m,
            Err(e) => {
                error!("persist failed in {} from {}: {}", conv.id, sender_id, e);
                return Err(e.into());
            }
        };
        debug_assert!(message.delivered_to.contains(sender_id));

        let text = ServerEvent::MessageNew(message.clone()).encode()?;
        let mut fanned_out = 0usize;
        for member in conv.recipients(sender_id) {
            fanned_out += self.hub.send_text_to_room(&Room::user(member.as_str()), &text, None);
        }
        debug!("message {} in {} fanned out to {} connections", message.id, conv.id, fanned_out);

        Ok(SendReceipt { message_id: message.id, timestamp: message.created_at, nonce: message.nonce, duplicate: false, fanned_out })
    }

    /// 送达回执：记录并通知发送者 / Delivered ack: record it and notify the sender
    ///
    /// 返回是否为新回执；重复回执不再通知。
    /// Returns whether the ack was new; repeats notify nobody.
    pub async fn acknowledge_delivered(&self, ctx: &ConnectionContext, message_id: &str) -> ChatResult<bool> {
        let message = self.load_message(message_id).await?;
        self.member_conversation(&message.conversation_id, ctx.user_id()).await?;
        self.record_delivered(&message, ctx.user_id()).await
    }

    async fn record_delivered(&self, message: &Message, user_id: &str) -> ChatResult<bool> {
        if message.delivered_to.contains(user_id) {
            return Ok(false);
        }
        let fresh = self.store.mark_delivered(&message.id, user_id).await?;
        if fresh {
            let notice = ServerEvent::MessageDelivered(DeliveredNotice { message_id: message.id.clone(), user_id: user_id.to_string() });
            self.hub.send_to_room(&Room::user(message.sender_id.as_str()), &notice, None)?;
            debug!("message {} delivered to {}", message.id, user_id);
        }
        Ok(fresh)
    }

    /// 批量已读：整批先校验，再逐条记录（已读蕴含送达），最后向会话房间发一次通知
    /// Batched read: validate the whole batch, record each (read implies delivered),
    /// then notify the conversation room once
    pub async fn acknowledge_read(&self, ctx: &ConnectionContext, conversation_id: &str, message_ids: &[MessageId]) -> ChatResult<Vec<MessageId>> {
        let user_id = ctx.user_id();
        self.member_conversation(conversation_id, user_id).await?;

        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(message_ids.len());
        for id in message_ids.iter().filter(|id| seen.insert(id.as_str())) {
            let message = self.load_message(id).await?;
            if message.conversation_id != conversation_id {
                return Err(ChatError::UnknownMessage(id.clone()));
            }
            batch.push(message);
        }

        let mut applied = Vec::new();
        for message in batch.iter().filter(|m| m.sender_id != user_id) {
            self.record_delivered(message, user_id).await?;
            if self.store.mark_read(&message.id, user_id).await? {
                applied.push(message.id.clone());
            }
        }
        if !applied.is_empty() {
            let notice = ServerEvent::MessageRead(ReadNotice { conversation_id: conversation_id.to_string(), message_ids: applied.clone(), user_id: user_id.to_string() });
            self.hub.send_to_room(&Room::conversation(conversation_id), &notice, None)?;
        }
        Ok(applied)
    }
}
