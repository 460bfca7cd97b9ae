use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use v::response::respond_any;
use v::HealthCheck;

use crate::server::ChatServer;

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_ready_handle)));
}

// 就绪检查：连接数未超软上限
// Readiness check: connection count below the soft cap
pub async fn health_ready_handle(server: web::Data<ChatServer>) -> impl Responder {
    let status = server.check_health().await;
    let payload = serde_json::json!({
        "ready": status.healthy,
        "service": "v-connect-chat",
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "connections": server.hub.connection_count(),
    });
    let code = if status.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    respond_any(code, payload)
}
