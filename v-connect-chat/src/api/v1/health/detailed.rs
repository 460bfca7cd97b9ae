use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use v::response::respond_any;
use v::HealthCheck;

use crate::server::ChatServer;

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_detailed_handle)));
}

// 详细健康检查
// Detailed health check
pub async fn health_detailed_handle(server: web::Data<ChatServer>) -> impl Responder {
    let status = server.check_health().await;
    let now = chrono::Utc::now().timestamp_millis();
    let payload = serde_json::json!({
        "status": status,
        "service": "v-connect-chat",
        "timestamp": now,
        "details": {
            "connections": server.hub.connection_count(),
            "rooms": server.hub.room_count(),
            "online_users": server.presence.online_users().await.len(),
            "websocket_port": server.config.server.ws_port,
            "http_port": server.config.server.http_port,
            "uptime_seconds": (now - server.started_at).max(0) / 1000,
            "version": env!("CARGO_PKG_VERSION")
        }
    });
    respond_any(StatusCode::OK, payload)
}
