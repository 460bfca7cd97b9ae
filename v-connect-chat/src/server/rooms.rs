use dashmap::{DashMap, DashSet};
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tracing::{debug, warn};

use super::{Connection, DisconnectReason};
use crate::domain::context::ConnectionContext;
use crate::domain::event::{Room, ServerEvent};
use crate::domain::ConnectionId;
use crate::error::{ChatError, ChatResult};

/// 房间路由表：连接 -> 发送器，房间 -> 连接集合
/// Room routing table: connection -> sender, room -> connection set
///
/// 房间只是路由标签，加入房间不做任何授权。
/// Rooms are routing labels only; joining one is never authorized here.
#[derive(Default)]
pub struct RoomHub {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<String, DashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, DashSet<String>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册已鉴权连接并加入初始房间 / Register an authenticated connection and join its initial rooms
    pub fn register(&self, connection: Connection, initial_rooms: &[Room]) {
        let conn_id = connection.ctx.connection_id().to_string();
        self.connections.insert(conn_id.clone(), connection);
        for room in initial_rooms {
            self.join(&conn_id, room);
        }
        debug!("registered connection {} rooms={:?}", conn_id, self.rooms_of(&conn_id));
    }

    /// 移除连接并退出所有房间 / Remove a connection and leave every room it joined
    pub fn unregister(&self, conn_id: &str) -> Option<Connection> {
        if let Some((_, joined)) = self.memberships.remove(conn_id) {
            for key in joined.iter() {
                self.remove_from_room(key.key(), conn_id);
            }
        }
        self.connections.remove(conn_id).map(|(_, c)| c)
    }

    pub fn join(&self, conn_id: &str, room: &Room) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }
        let key = room.key();
        self.rooms.entry(key.clone()).or_default().insert(conn_id.to_string());
        self.memberships.entry(conn_id.to_string()).or_default().insert(key)
    }

    pub fn leave(&self, conn_id: &str, room: &Room) -> bool {
        let key = room.key();
        let was_member = self.memberships.get(conn_id).map(|set| set.remove(&key).is_some()).unwrap_or(false);
        self.remove_from_room(&key, conn_id);
        was_member
    }

    fn remove_from_room(&self, key: &str, conn_id: &str) {
        if let Some(set) = self.rooms.get(key) {
            set.remove(conn_id);
        }
        self.rooms.remove_if(key, |_, set| set.is_empty());
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.connections.contains_key(conn_id)
    }

    pub fn context(&self, conn_id: &str) -> Option<ConnectionContext> {
        self.connections.get(conn_id).map(|c| c.ctx.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_members(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms.get(&room.key()).map(|set| set.iter().map(|id| id.key().clone()).collect()).unwrap_or_default()
    }

    pub fn rooms_of(&self, conn_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self.memberships.get(conn_id).map(|set| set.iter().map(|k| k.key().clone()).collect()).unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// 向单个连接发送事件 / Send an event to one connection
    pub fn send_event(&self, conn_id: &str, event: &ServerEvent) -> ChatResult<()> {
        let text = event.encode()?;
        self.send_text(conn_id, text)
    }

    pub fn send_text(&self, conn_id: &str, text: String) -> ChatResult<()> {
        let conn = self.connections.get(conn_id).ok_or_else(|| ChatError::ConnectionClosed(conn_id.to_string()))?;
        conn.sender.send(WsFrame::Text(text)).map_err(|_| ChatError::ConnectionClosed(conn_id.to_string()))
    }

    /// 房间广播（尽力而为，至多一次），返回送达连接数
    /// Room broadcast (best effort, at most once); returns the number of connections reached
    pub fn send_to_room(&self, room: &Room, event: &ServerEvent, except: Option<&str>) -> ChatResult<usize> {
        let text = event.encode()?;
        Ok(self.send_text_to_room(room, &text, except))
    }

    pub fn send_text_to_room(&self, room: &Room, text: &str, except: Option<&str>) -> usize {
        let targets = self.room_members(room);
        let mut reached = 0usize;
        for conn_id in targets.iter().filter(|id| Some(id.as_str()) != except) {
            match self.send_text(conn_id, text.to_string()) {
                Ok(()) => reached += 1,
                Err(e) => debug!("skip {} in {}: {}", conn_id, room, e),
            }
        }
        reached
    }

    /// 全局广播 / Global broadcast
    pub fn broadcast(&self, event: &ServerEvent, except: Option<&str>) -> ChatResult<usize> {
        let text = event.encode()?;
        let targets: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        let mut reached = 0usize;
        for conn_id in targets.iter().filter(|id| Some(id.as_str()) != except) {
            if self.send_text(conn_id, text.clone()).is_ok() {
                reached += 1;
            }
        }
        Ok(reached)
    }

    /// 更新心跳时间 / Refresh heartbeat
    pub fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.connections.get(conn_id) {
            *conn.last_heartbeat.lock() = Instant::now();
        }
    }

    /// 超过时限未心跳的连接 / Connections silent for longer than `timeout`
    pub fn stale_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|e| e.value().last_heartbeat.lock().elapsed() > timeout)
            .map(|e| e.key().clone())
            .collect()
    }

    /// 请求关闭连接，由连接任务执行断开流程 / Ask the connection task to shut down
    pub fn close(&self, conn_id: &str, reason: DisconnectReason) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => {
                conn.request_close(reason);
                true
            }
            None => {
                warn!("close requested for unknown connection {}", conn_id);
                false
            }
        }
    }

    pub fn close_all(&self, reason: DisconnectReason) {
        for entry in self.connections.iter() {
            entry.value().request_close(reason);
        }
    }
}
