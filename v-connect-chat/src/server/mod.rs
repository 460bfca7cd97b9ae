pub mod rooms;

use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message as WsFrame;

use crate::config::ChatConfig;
use crate::domain::context::ConnectionContext;
use crate::service::auth::AuthProvider;
use crate::service::pipeline::MessagePipeline;
use crate::service::presence::PresenceTracker;
use crate::storage::{ConversationStore, PresenceStore};
pub use rooms::RoomHub;

/// 断开原因 / Disconnect reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    ServerShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::ServerShutdown => "server_shutdown",
        };
        f.write_str(s)
    }
}

/// 服务端主动关闭信号 / Server-initiated close signal
#[derive(Default)]
pub struct CloseSignal {
    notify: Notify,
    reason: Mutex<Option<DisconnectReason>>,
}

impl CloseSignal {
    pub async fn wait(&self) -> DisconnectReason {
        self.notify.notified().await;
        let reason = *self.reason.lock();
        reason.unwrap_or(DisconnectReason::ServerShutdown)
    }
}

/// 已鉴权的客户端连接 / Authenticated client connection
#[derive(Clone)]
pub struct Connection {
    pub ctx: ConnectionContext,                             // 连接上下文 / Connection context
    pub addr: Option<SocketAddr>,                           // 客户端地址 / Client address
    pub sender: mpsc::UnboundedSender<WsFrame>,             // 消息发送器 / Frame sender
    pub last_heartbeat: Arc<Mutex<Instant>>,                // 最后心跳时间 / Last heartbeat time
    pub connected_at: i64,                                  // 建立时间 / Connected at (ms)
    pub close_signal: Arc<CloseSignal>,                     // 关闭信号 / Close signal
}

impl Connection {
    pub fn new(ctx: ConnectionContext, addr: Option<SocketAddr>, sender: mpsc::UnboundedSender<WsFrame>) -> Self {
        Self {
            ctx,
            addr,
            sender,
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
            connected_at: crate::domain::now_ms(),
            close_signal: Arc::new(CloseSignal::default()),
        }
    }

    pub fn request_close(&self, reason: DisconnectReason) {
        let mut slot = self.close_signal.reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.close_signal.notify.notify_one();
    }
}

/// 服务端全局状态：启动时构建一次，通过克隆共享
/// Server state: built once at startup, shared by cloning
#[derive(Clone)]
pub struct ChatServer {
    pub config: Arc<ChatConfig>,                 // 配置 / Configuration
    pub hub: Arc<RoomHub>,                       // 房间路由 / Room routing
    pub presence: Arc<PresenceTracker>,          // 在线状态 / Presence tracker
    pub pipeline: Arc<MessagePipeline>,          // 消息管道 / Message pipeline
    pub auth: Arc<dyn AuthProvider>,             // 鉴权协作者 / Auth collaborator
    pub started_at: i64,                         // 启动时间 / Start time (ms)
}

impl ChatServer {
    pub fn new(
        config: ChatConfig,
        auth: Arc<dyn AuthProvider>,
        conversations: Arc<dyn ConversationStore>,
        presence_store: Arc<dyn PresenceStore>,
    ) -> Self {
        let hub = Arc::new(RoomHub::new());
        let presence = Arc::new(PresenceTracker::new(hub.clone(), presence_store));
        let pipeline = Arc::new(MessagePipeline::new(hub.clone(), conversations));
        Self { config: Arc::new(config), hub, presence, pipeline, auth, started_at: crate::domain::now_ms() }
    }
}
