use anyhow::Result;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::event::{AuthOk, ClientEvent, Room, ServerEvent};
use crate::error::ChatError;
use crate::server::{ChatServer, Connection, DisconnectReason};
use crate::service::auth::authenticate;

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// 从升级请求的查询串中取出 `token` / Extract `token` from the upgrade request query string
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "token")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: Cow::Borrowed(reason) }))
}

/// 等待首个 `auth` 帧；超时或收到其他事件即放弃
/// Wait for the first `auth` frame; gives up on timeout or any other event
async fn await_auth_frame(reader: &mut WsReader, deadline: Duration) -> Option<String> {
    let wait = async {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return match ClientEvent::parse(&text) {
                        Ok(ClientEvent::Auth(req)) => Some(req.token),
                        _ => None,
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                _ => return None,
            }
        }
        None
    };
    tokio::time::timeout(deadline, wait).await.unwrap_or(None)
}

/// 处理新连接：鉴权 -> 注册房间 -> 读循环 -> 断开
/// Handle a new connection: authenticate -> join rooms -> read loop -> disconnect
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, server: ChatServer) -> Result<()> {
    debug!("📨 New connection from: {}", peer_addr);

    let mut query_token: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query_token = token_from_query(req.uri().query());
        Ok(resp)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = Uuid::new_v4().to_string();

    let writer_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send frame to {}: {}", writer_id, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let token = match query_token {
        Some(token) => Some(token),
        None => await_auth_frame(&mut ws_receiver, Duration::from_millis(server.config.auth.deadline_ms)).await,
    };
    let ctx = match authenticate(server.auth.as_ref(), token.as_deref(), &conn_id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!("🚫 rejecting connection from {}: {}", peer_addr, e);
            if let Ok(text) = ServerEvent::error(&e).encode() {
                let _ = tx.send(Message::Text(text));
            }
            let _ = tx.send(close_frame(CloseCode::Policy, "authentication failed"));
            drop(tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), send_task).await;
            return Ok(());
        }
    };

    let connection = Connection::new(ctx.clone(), Some(peer_addr), tx.clone());
    let close_signal = connection.close_signal.clone();
    server.hub.register(connection, &[Room::user(ctx.user_id()), Room::Tier(ctx.tier().to_string())]);
    info!("✅ user {} connected conn={} from {}", ctx.user_id(), conn_id, peer_addr);

    if let Err(e) = server.presence.connect(ctx.user_id(), &conn_id).await {
        error!("presence connect failed for {}: {}", ctx.user_id(), e);
    }
    let auth_ok = AuthOk { user_id: ctx.user_id().to_string(), tier: ctx.tier().to_string(), connection_id: conn_id.clone() };
    if let Err(e) = server.hub.send_event(&conn_id, &ServerEvent::AuthOk(auth_ok)) {
        debug!("auth:ok not delivered to {}: {}", conn_id, e);
    }

    let reason = loop {
        tokio::select! {
            reason = close_signal.wait() => break reason,
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => crate::ws::handler::handle_text(&server, &ctx, &text).await,
                Some(Ok(Message::Ping(payload))) => {
                    server.hub.touch(&conn_id);
                    let _ = tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = ChatError::InvalidEvent("binary frames are not supported".to_string());
                    let _ = server.hub.send_event(&conn_id, &ServerEvent::error(&err));
                }
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", conn_id, e);
                    break DisconnectReason::TransportError;
                }
            }
        }
    };

    server.hub.unregister(&conn_id);
    if matches!(reason, DisconnectReason::HeartbeatTimeout | DisconnectReason::ServerShutdown) {
        let _ = tx.send(close_frame(CloseCode::Away, "connection closed by server"));
    }
    drop(tx);
    if let Err(e) = server.presence.disconnect(ctx.user_id(), &conn_id, reason).await {
        error!("presence disconnect failed for {}: {}", ctx.user_id(), e);
    }
    info!("👋 user {} disconnected conn={} reason={}", ctx.user_id(), conn_id, reason);

    let abort = send_task.abort_handle();
    if tokio::time::timeout(Duration::from_secs(1), send_task).await.is_err() {
        abort.abort();
    }
    Ok(())
}
