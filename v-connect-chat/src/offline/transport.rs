use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::domain::event::{AuthRequest, ClientEvent, MessageSent, ServerEvent};
use crate::domain::message::SendMessage;
use crate::error::ChatError;

/// 发送尝试失败原因 / Why a send attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
    #[error("rejected by gateway ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl TransportError {
    /// 策略性拒绝（鉴权、成员）不重试 / Policy rejections (auth, membership) are never retried
    pub fn retryable(&self) -> bool {
        match self {
            TransportError::Rejected { code, .. } => ChatError::code_is_retryable(code),
            _ => true,
        }
    }

    fn unavailable(err: impl std::fmt::Display) -> Self {
        TransportError::Unavailable(err.to_string())
    }
}

/// 队列的发送通道 / The queue's way to reach the gateway
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &SendMessage) -> Result<MessageSent, TransportError>;
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket 客户端传输：复用一条已鉴权连接，出错即丢弃
/// WebSocket client transport: reuses one authenticated connection, dropped on any error
pub struct WsTransport {
    url: String,
    token: String,
    stream: Mutex<Option<ClientStream>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { url: url.into(), token: token.into(), stream: Mutex::new(None) }
    }

    async fn connect(&self) -> Result<ClientStream, TransportError> {
        let (mut ws, _) = connect_async(self.url.as_str()).await.map_err(TransportError::unavailable)?;
        let auth = ClientEvent::Auth(AuthRequest { token: self.token.clone() }).to_frame().map_err(TransportError::unavailable)?;
        ws.send(auth).await.map_err(TransportError::unavailable)?;
        loop {
            match next_event(&mut ws).await? {
                ServerEvent::AuthOk(ok) => {
                    debug!("offline transport authenticated as {} conn={}", ok.user_id, ok.connection_id);
                    return Ok(ws);
                }
                ServerEvent::Error(err) => return Err(TransportError::Rejected { code: err.code, message: err.message }),
                _ => continue,
            }
        }
    }

    async fn exchange(ws: &mut ClientStream, message: &SendMessage) -> Result<MessageSent, TransportError> {
        let frame = ClientEvent::MessageSend(message.clone()).to_frame().map_err(TransportError::unavailable)?;
        ws.send(frame).await.map_err(TransportError::unavailable)?;
        loop {
            match next_event(ws).await? {
                ServerEvent::MessageSent(ack) if ack.nonce == message.nonce => return Ok(ack),
                ServerEvent::Error(err) => return Err(TransportError::Rejected { code: err.code, message: err.message }),
                other => debug!("offline transport ignoring {}", other.name()),
            }
        }
    }
}

async fn next_event(ws: &mut ClientStream) -> Result<ServerEvent, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(WsFrame::Text(text))) => match ServerEvent::parse(&text) {
                Ok(event) => return Ok(event),
                Err(e) => debug!("offline transport skipping frame: {}", e),
            },
            Some(Ok(WsFrame::Close(_))) | None => return Err(TransportError::Unavailable("connection closed".to_string())),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::unavailable(e)),
        }
    }
}

#[async_trait]
impl MessageTransport for WsTransport {
    async fn send(&self, message: &SendMessage) -> Result<MessageSent, TransportError> {
        let mut slot = self.stream.lock().await;
        let (mut ws, reused) = match slot.take() {
            Some(ws) => (ws, true),
            None => (self.connect().await?, false),
        };
        let mut result = Self::exchange(&mut ws, message).await;
        // 空闲连接可能已被网关心跳清理关闭，重连一次 / An idle socket may have been reaped by the gateway heartbeat; reconnect once
        if reused && matches!(result, Err(TransportError::Unavailable(_))) {
            debug!("offline transport reconnecting after stale socket");
            ws = self.connect().await?;
            result = Self::exchange(&mut ws, message).await;
        }
        if matches!(result, Ok(_) | Err(TransportError::Rejected { .. })) {
            *slot = Some(ws);
        }
        result
    }
}
