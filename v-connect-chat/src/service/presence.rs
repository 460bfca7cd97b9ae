use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::domain::event::{PresenceUpdate, Room, ServerEvent, TypingUpdate};
use crate::domain::presence::{PresenceRecord, PresenceState};
use crate::domain::{now_ms, UserId};
use crate::error::{ChatError, ChatResult};
use crate::server::{DisconnectReason, RoomHub};
use crate::storage::PresenceStore;

/// 在线状态跟踪器 / Presence tracker
///
/// 每个用户一把锁，连接集合的增删与持久化写入在锁内串行，
/// 多设备场景下只有集合空/非空切换才产生上下线事件。
/// One lock per user; set mutation and the durable write are serialized under it,
/// and only empty/non-empty transitions of the set produce presence events.
pub struct PresenceTracker {
    records: DashMap<UserId, Arc<Mutex<PresenceRecord>>>,
    hub: Arc<RoomHub>,
    store: Arc<dyn PresenceStore>,
}

impl PresenceTracker {
    pub fn new(hub: Arc<RoomHub>, store: Arc<dyn PresenceStore>) -> Self {
        Self { records: DashMap::new(), hub, store }
    }

    fn slot(&self, user_id: &str) -> Arc<Mutex<PresenceRecord>> {
        self.records
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PresenceRecord::new(user_id, now_ms()))))
            .value()
            .clone()
    }

    /// 连接建立；返回是否发生上线切换 / Connection opened; returns whether the user came online
    pub async fn connect(&self, user_id: &str, conn_id: &str) -> ChatResult<bool> {
        let slot = self.slot(user_id);
        let mut rec = slot.lock().await;
        let was_online = rec.advertised_online();
        let first = rec.connections.is_empty();
        rec.connections.insert(conn_id.to_string());
        if first {
            rec.last_seen = now_ms();
        }
        if was_online == rec.advertised_online() {
            debug!("user {} +conn {} ({} live)", user_id, conn_id, rec.connections.len());
            return Ok(false);
        }
        let state = rec.state();
        let persisted = self.store.set_presence(user_id, state).await;
        self.announce(user_id, state, Some(conn_id));
        info!("🟢 user {} online via {}", user_id, conn_id);
        drop(rec);
        persisted.map_err(ChatError::from)?;
        Ok(true)
    }

    /// 连接断开；返回是否发生离线切换 / Connection closed; returns whether the user went offline
    pub async fn disconnect(&self, user_id: &str, conn_id: &str, reason: DisconnectReason) -> ChatResult<bool> {
        let slot = self.slot(user_id);
        let mut rec = slot.lock().await;
        let was_online = rec.advertised_online();
        if !rec.connections.remove(conn_id) {
            return Ok(false);
        }
        if rec.online() {
            debug!("user {} -conn {} reason={} ({} live)", user_id, conn_id, reason, rec.connections.len());
            return Ok(false);
        }
        rec.last_seen = now_ms();
        let typing = std::mem::take(&mut rec.typing);
        for conversation_id in typing {
            self.announce_typing(user_id, &conversation_id, false, None);
        }
        let state = rec.state();
        let persisted = self.store.set_presence(user_id, state).await;
        if was_online {
            self.announce(user_id, state, None);
        }
        info!("🔴 user {} offline (last conn {} reason={})", user_id, conn_id, reason);
        drop(rec);
        persisted.map_err(ChatError::from)?;
        Ok(true)
    }

    /// 显式 presence:online / presence:offline，不改变连接集合
    /// Explicit presence:online / presence:offline; leaves the connection set untouched
    pub async fn set_explicit(&self, user_id: &str, online: bool, origin: Option<&str>) -> ChatResult<PresenceState> {
        let slot = self.slot(user_id);
        let mut rec = slot.lock().await;
        rec.hidden = !online;
        rec.last_seen = now_ms();
        let state = rec.state();
        let persisted = self.store.set_presence(user_id, state).await;
        self.announce(user_id, state, origin);
        drop(rec);
        persisted.map_err(ChatError::from)?;
        Ok(state)
    }

    /// 输入状态只广播到会话房间；返回是否变化
    /// Typing is broadcast to the conversation room only; returns whether it changed
    pub async fn set_typing(&self, user_id: &str, conversation_id: &str, typing: bool, origin: Option<&str>) -> bool {
        let slot = self.slot(user_id);
        let mut rec = slot.lock().await;
        let changed = if typing { rec.typing.insert(conversation_id.to_string()) } else { rec.typing.remove(conversation_id) };
        drop(rec);
        if changed {
            self.announce_typing(user_id, conversation_id, typing, origin);
        }
        changed
    }

    pub async fn snapshot(&self, user_id: &str) -> Option<PresenceRecord> {
        let slot = self.records.get(user_id).map(|s| s.value().clone())?;
        let rec = slot.lock().await;
        Some(rec.clone())
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.snapshot(user_id).await.map(|r| r.online()).unwrap_or(false)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        let slots: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        let mut users = Vec::new();
        for slot in slots {
            let rec = slot.lock().await;
            if rec.online() {
                users.push(rec.user_id.clone());
            }
        }
        users.sort();
        users
    }

    fn announce(&self, user_id: &str, state: PresenceState, except: Option<&str>) {
        let event = ServerEvent::PresenceUpdate(PresenceUpdate { user_id: user_id.to_string(), online: state.online, last_seen: state.last_seen });
        match self.hub.broadcast(&event, except) {
            Ok(reached) => debug!("presence:update user={} online={} reached={}", user_id, state.online, reached),
            Err(e) => error!("presence broadcast failed for {}: {}", user_id, e),
        }
    }

    fn announce_typing(&self, user_id: &str, conversation_id: &str, typing: bool, except: Option<&str>) {
        let event = ServerEvent::TypingUpdate(TypingUpdate { conversation_id: conversation_id.to_string(), user_id: user_id.to_string(), typing });
        if let Err(e) = self.hub.send_to_room(&Room::conversation(conversation_id), &event, except) {
            error!("typing broadcast failed for {}: {}", user_id, e);
        }
    }
}
