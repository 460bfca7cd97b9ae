#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;

use v_connect_chat::config::ChatConfig;
use v_connect_chat::domain::context::{ConnectionContext, Identity};
use v_connect_chat::domain::conversation::ConversationKind;
use v_connect_chat::domain::event::{Room, ServerEvent};
use v_connect_chat::server::{ChatServer, Connection};
use v_connect_chat::service::auth::StaticAuthProvider;
use v_connect_chat::storage::{ConversationStore, MemoryStore};

pub struct Harness {
    pub server: ChatServer,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    harness_with(|store| store.clone() as Arc<dyn ConversationStore>)
}

/// 可替换会话存储（例如注入故障）/ Lets a test wrap the conversation store (e.g. to inject failures)
pub fn harness_with(wrap: impl FnOnce(&Arc<MemoryStore>) -> Arc<dyn ConversationStore>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.create_conversation("dm", ConversationKind::Direct, ["alice", "bob"]);
    store.create_conversation("team", ConversationKind::Group, ["alice", "bob", "carol"]);
    store.create_conversation("other", ConversationKind::Direct, ["carol", "dave"]);
    let auth = StaticAuthProvider::new()
        .with_token("token-alice", "alice", "gold")
        .with_token("token-bob", "bob", "basic")
        .with_token("token-carol", "carol", "basic");
    let conversations = wrap(&store);
    let server = ChatServer::new(ChatConfig::default(), Arc::new(auth), conversations, store.clone());
    Harness { server, store }
}

/// 以 mpsc 通道模拟的连接 / Connection faked with an mpsc channel
pub struct FakeClient {
    pub ctx: ConnectionContext,
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl FakeClient {
    pub fn conn_id(&self) -> &str {
        self.ctx.connection_id()
    }

    /// 取出目前收到的全部事件 / Drain every event received so far
    pub fn events(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let WsFrame::Text(text) = frame {
                out.push(ServerEvent::parse(&text).expect("server sent an unparsable event"));
            }
        }
        out
    }

    pub fn events_named(&mut self, name: &str) -> Vec<ServerEvent> {
        self.events().into_iter().filter(|e| e.name() == name).collect()
    }
}

/// 注册连接（指定房间），不经过在线状态 / Register a connection in the given rooms, bypassing presence
pub fn attach(server: &ChatServer, user: &str, conn_id: &str, rooms: &[Room]) -> FakeClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = ConnectionContext::new(Identity { user_id: user.to_string(), tier: "basic".to_string() }, conn_id);
    server.hub.register(Connection::new(ctx.clone(), None, tx), rooms);
    FakeClient { ctx, rx }
}

/// 与网关鉴权成功后的效果一致 / Same effect as a successful gateway authentication
pub async fn connect(server: &ChatServer, user: &str, conn_id: &str) -> FakeClient {
    let client = attach(server, user, conn_id, &[Room::user(user), Room::Tier("basic".to_string())]);
    server.presence.connect(user, conn_id).await.expect("presence connect");
    client
}
