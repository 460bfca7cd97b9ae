use actix_web::web;

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    crate::api::v1::health::basic::register(cfg, "/v1/health");
    crate::api::v1::health::live::register(cfg, "/v1/health/live");
    crate::api::v1::health::ready::register(cfg, "/v1/health/ready");
    crate::api::v1::health::detailed::register(cfg, "/v1/health/detailed");
    crate::api::v1::presence::get::register(cfg, "/v1/presence/{user_id}");
}
