use actix_web::http::StatusCode;
use actix_web::{web, Responder};
use serde::Serialize;
use v::response::{respond_any, respond_error};

use crate::server::ChatServer;

/// 对外公布的在线视图（隐身用户显示为离线）
/// Advertised presence view; hidden users read as offline
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub user_id: String,
    pub online: bool,
    pub last_seen: i64,
    pub devices: usize,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(presence_get_handle)));
}

// 查询用户在线状态
// Query a user's presence
pub async fn presence_get_handle(server: web::Data<ChatServer>, user_id: web::Path<String>) -> impl Responder {
    match server.presence.snapshot(&user_id).await {
        Some(rec) => {
            let advertised = rec.advertised_online();
            let view = PresenceView {
                user_id: rec.user_id,
                online: advertised,
                last_seen: rec.last_seen,
                devices: if advertised { rec.connections.len() } else { 0 },
            };
            respond_any(StatusCode::OK, view)
        }
        None => respond_error(StatusCode::NOT_FOUND, format!("no presence record for {}", user_id.as_str())),
    }
}
