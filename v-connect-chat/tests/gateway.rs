use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use v_connect_chat::config::ChatConfig;
use v_connect_chat::domain::conversation::ConversationKind;
use v_connect_chat::domain::event::{ClientEvent, ConversationRef, DeliveredAck, ServerEvent};
use v_connect_chat::domain::message::SendMessage;
use v_connect_chat::offline::{MemoryQueueStore, MessageTransport, OfflineQueue, QueueEvent, WsTransport};
use v_connect_chat::server::ChatServer;
use v_connect_chat::service::auth::StaticAuthProvider;
use v_connect_chat::storage::MemoryStore;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (SocketAddr, ChatServer, Arc<MemoryStore>) {
    start_with(|_| {}).await
}

async fn start_with(adjust: impl FnOnce(&mut ChatConfig)) -> (SocketAddr, ChatServer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.create_conversation("dm", ConversationKind::Direct, ["alice", "bob"]);
    let auth = StaticAuthProvider::new().with_token("token-alice", "alice", "gold").with_token("token-bob", "bob", "basic");
    let mut config = ChatConfig::default();
    config.auth.deadline_ms = 300;
    adjust(&mut config);
    let server = ChatServer::new(config, Arc::new(auth), store.clone(), store.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (addr, server, store)
}

async fn open(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/{}", addr, query)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, event: ClientEvent) {
    ws.send(event.to_frame().unwrap()).await.unwrap();
}

/// 下一个事件；连接关闭时为 None / Next event, or None once the socket closes
async fn next_event(ws: &mut Client) -> Option<ServerEvent> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), ws.next()).await.expect("timed out waiting for a frame");
        match frame {
            Some(Ok(WsFrame::Text(text))) => return Some(ServerEvent::parse(&text).unwrap()),
            Some(Ok(WsFrame::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn expect_event(ws: &mut Client, name: &str) -> ServerEvent {
    loop {
        match next_event(ws).await {
            Some(event) if event.name() == name => return event,
            Some(_) => continue,
            None => panic!("connection closed while waiting for {}", name),
        }
    }
}

#[tokio::test]
async fn query_token_and_auth_frame_both_authenticate() {
    let (addr, server, _) = start().await;

    let mut alice = open(addr, "?token=token-alice").await;
    match expect_event(&mut alice, "auth:ok").await {
        ServerEvent::AuthOk(ok) => {
            assert_eq!(ok.user_id, "alice");
            assert_eq!(ok.tier, "gold");
        }
        other => panic!("unexpected {:?}", other),
    }

    let mut bob = open(addr, "").await;
    send(&mut bob, ClientEvent::Auth(v_connect_chat::domain::event::AuthRequest { token: "token-bob".to_string() })).await;
    expect_event(&mut bob, "auth:ok").await;

    send(&mut bob, ClientEvent::Ping).await;
    expect_event(&mut bob, "pong").await;
    assert_eq!(server.hub.connection_count(), 2);
}

#[tokio::test]
async fn bad_or_missing_credentials_fail_closed() {
    let (addr, server, _) = start().await;

    let mut intruder = open(addr, "?token=forged").await;
    match next_event(&mut intruder).await {
        Some(ServerEvent::Error(err)) => assert_eq!(err.code, "auth_failure"),
        other => panic!("expected auth error, got {:?}", other),
    }
    assert!(next_event(&mut intruder).await.is_none());

    // 不发送任何凭证，超过时限后被关闭 / Silent socket is closed after the deadline
    let mut silent = open(addr, "").await;
    match next_event(&mut silent).await {
        Some(ServerEvent::Error(err)) => assert_eq!(err.code, "auth_failure"),
        other => panic!("expected auth error, got {:?}", other),
    }
    assert_eq!(server.hub.connection_count(), 0);
}

#[tokio::test]
async fn message_round_trip_with_delivery_ack() {
    let (addr, _server, store) = start().await;
    let mut alice = open(addr, "?token=token-alice").await;
    expect_event(&mut alice, "auth:ok").await;
    let mut bob = open(addr, "?token=token-bob").await;
    expect_event(&mut bob, "auth:ok").await;

    send(&mut alice, ClientEvent::MessageSend(SendMessage::text("dm", "c2VjcmV0", "n-1"))).await;
    let sent = match expect_event(&mut alice, "message:sent").await {
        ServerEvent::MessageSent(sent) => sent,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(sent.nonce, "n-1");
    match expect_event(&mut bob, "message:new").await {
        ServerEvent::MessageNew(m) => assert_eq!(m.id, sent.message_id),
        other => panic!("unexpected {:?}", other),
    }

    send(&mut bob, ClientEvent::MessageDelivered(DeliveredAck { message_id: sent.message_id.clone() })).await;
    match expect_event(&mut alice, "message:delivered").await {
        ServerEvent::MessageDelivered(d) => {
            assert_eq!(d.message_id, sent.message_id);
            assert_eq!(d.user_id, "bob");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(store.list_messages("dm")[0].delivered_to.contains("bob"));
}

#[tokio::test]
async fn rejected_events_surface_as_error_events() {
    let (addr, _server, _) = start().await;
    let mut bob = open(addr, "?token=token-bob").await;
    expect_event(&mut bob, "auth:ok").await;

    bob.send(WsFrame::Text("{\"type\":\"nope\"}".to_string())).await.unwrap();
    match expect_event(&mut bob, "error").await {
        ServerEvent::Error(err) => assert_eq!(err.code, "invalid_event"),
        other => panic!("unexpected {:?}", other),
    }

    send(&mut bob, ClientEvent::MessageSend(SendMessage::text("ghost", "x", "n-2"))).await;
    match expect_event(&mut bob, "error").await {
        ServerEvent::Error(err) => assert_eq!(err.code, "conversation_not_found"),
        other => panic!("unexpected {:?}", other),
    }

    // 加入房间不做授权，连接保持可用 / Room joins are not authorized and the socket stays usable
    send(&mut bob, ClientEvent::ConversationJoin(ConversationRef { conversation_id: "ghost".to_string() })).await;
    send(&mut bob, ClientEvent::Ping).await;
    expect_event(&mut bob, "pong").await;
}

#[tokio::test]
async fn closing_last_socket_broadcasts_offline() {
    let (addr, server, store) = start().await;
    let mut alice = open(addr, "?token=token-alice").await;
    expect_event(&mut alice, "auth:ok").await;
    let mut bob = open(addr, "?token=token-bob").await;
    expect_event(&mut bob, "auth:ok").await;

    bob.close(None).await.unwrap();

    loop {
        if let ServerEvent::PresenceUpdate(u) = expect_event(&mut alice, "presence:update").await {
            if u.user_id == "bob" && !u.online {
                break;
            }
        }
    }
    assert!(!server.presence.is_online("bob").await);
    assert_eq!(store.presence_of("bob").map(|p| p.online), Some(false));
}

#[tokio::test]
async fn offline_queue_delivers_through_the_gateway() {
    let (addr, _server, store) = start().await;
    let transport = Arc::new(WsTransport::new(format!("ws://{}/", addr), "token-alice"));
    let queue = OfflineQueue::open(Default::default(), Arc::new(MemoryQueueStore::new()), transport).await.unwrap();
    let mut events = queue.subscribe();

    let id = queue.enqueue(SendMessage::text("dm", "queued", "n-q")).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
            QueueEvent::Sent { id: sent, .. } => {
                assert_eq!(sent, id);
                break;
            }
            QueueEvent::Failed { error, .. } => panic!("queue failed: {}", error),
            _ => {}
        }
    }
    assert_eq!(store.list_messages("dm").len(), 1);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn heartbeat_sweep_closes_silent_sockets() {
    let (addr, server, _) = start().await;
    let mut alice = open(addr, "?token=token-alice").await;
    expect_event(&mut alice, "auth:ok").await;
    let mut bob = open(addr, "?token=token-bob").await;
    expect_event(&mut bob, "auth:ok").await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    send(&mut alice, ClientEvent::Ping).await;
    expect_event(&mut alice, "pong").await;

    // 只有 bob 超时 / Only bob has gone quiet long enough
    assert_eq!(v_connect_chat::tasks::heartbeat::sweep(&server, Duration::from_millis(50)), 1);

    // 服务端关闭后读到流结束 / The server-side close ends bob's stream
    while next_event(&mut bob).await.is_some() {}
    loop {
        if let ServerEvent::PresenceUpdate(u) = expect_event(&mut alice, "presence:update").await {
            if u.user_id == "bob" && !u.online {
                break;
            }
        }
    }
    assert_eq!(server.hub.connection_count(), 1);
}

#[tokio::test]
async fn transport_recovers_after_idle_socket_is_reaped() {
    let (addr, server, store) = start_with(|config| config.server.timeout_ms = 200).await;
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    v_connect_chat::tasks::heartbeat::spawn_cleanup_task(server.clone(), 200, shutdown_rx);
    let transport = WsTransport::new(format!("ws://{}/", addr), "token-alice");

    transport.send(&SendMessage::text("dm", "first", "n-idle-1")).await.unwrap();
    // 空闲超过心跳超时，网关已关闭该连接 / Idle past the heartbeat timeout, so the gateway has closed the socket
    tokio::time::sleep(Duration::from_millis(800)).await;
    let ack = transport.send(&SendMessage::text("dm", "second", "n-idle-2")).await.unwrap();

    assert_eq!(ack.nonce, "n-idle-2");
    assert_eq!(store.list_messages("dm").len(), 2);
}
