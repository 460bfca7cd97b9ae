use tracing::{debug, warn};

use crate::domain::context::ConnectionContext;
use crate::domain::event::{ClientEvent, MessageSent, Pong, Room, ServerEvent};
use crate::domain::now_ms;
use crate::error::{ChatError, ChatResult};
use crate::server::ChatServer;

/// 处理已鉴权连接上的一个文本帧，失败时回写 `error` 事件
/// Handle one text frame on an authenticated connection; failures go back as an `error` event
pub async fn handle_text(server: &ChatServer, ctx: &ConnectionContext, text: &str) {
    debug!("📨 Received text from {}: {}", ctx.connection_id(), text);
    let outcome = match ClientEvent::parse(text) {
        Ok(event) => dispatch(server, ctx, event).await,
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!("⚠️  rejected event from user={} conn={}: {}", ctx.user_id(), ctx.connection_id(), e);
        if let Err(send_err) = server.hub.send_event(ctx.connection_id(), &ServerEvent::error(&e)) {
            debug!("error event not delivered to {}: {}", ctx.connection_id(), send_err);
        }
    }
}

/// 入站事件路由到在线状态或消息管道 / Route an inbound event to presence or the pipeline
pub async fn dispatch(server: &ChatServer, ctx: &ConnectionContext, event: ClientEvent) -> ChatResult<()> {
    let conn_id = ctx.connection_id();
    match event {
        ClientEvent::Auth(_) => Err(ChatError::InvalidEvent("connection is already authenticated".to_string())),
        ClientEvent::Ping => {
            server.hub.touch(conn_id);
            server.hub.send_event(conn_id, &ServerEvent::Pong(Pong { timestamp: now_ms() }))
        }
        ClientEvent::MessageSend(request) => {
            let receipt = server.pipeline.send(ctx, request).await?;
            let ack = MessageSent { message_id: receipt.message_id, timestamp: receipt.timestamp, nonce: receipt.nonce };
            server.hub.send_event(conn_id, &ServerEvent::MessageSent(ack))
        }
        ClientEvent::MessageDelivered(ack) => server.pipeline.acknowledge_delivered(ctx, &ack.message_id).await.map(|_| ()),
        ClientEvent::MessageRead(ack) => server.pipeline.acknowledge_read(ctx, &ack.conversation_id, &ack.message_ids).await.map(|_| ()),
        ClientEvent::ConversationJoin(r) => {
            // 房间只是路由标签，成员校验在发送时进行 / Routing label only; membership is checked per message
            server.hub.join(conn_id, &Room::conversation(r.conversation_id));
            Ok(())
        }
        ClientEvent::ConversationLeave(r) => {
            server.hub.leave(conn_id, &Room::conversation(r.conversation_id));
            Ok(())
        }
        ClientEvent::TypingStart(r) => {
            server.pipeline.authorize_member(ctx, &r.conversation_id).await?;
            server.presence.set_typing(ctx.user_id(), &r.conversation_id, true, Some(conn_id)).await;
            Ok(())
        }
        ClientEvent::TypingStop(r) => {
            server.pipeline.authorize_member(ctx, &r.conversation_id).await?;
            server.presence.set_typing(ctx.user_id(), &r.conversation_id, false, Some(conn_id)).await;
            Ok(())
        }
        ClientEvent::PresenceOnline => server.presence.set_explicit(ctx.user_id(), true, Some(conn_id)).await.map(|_| ()),
        ClientEvent::PresenceOffline => server.presence.set_explicit(ctx.user_id(), false, Some(conn_id)).await.map(|_| ()),
    }
}
