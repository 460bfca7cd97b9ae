// v 库主入口：配置、日志、健康检查
// v library entry: config, tracing, health checks

pub mod comm;
pub use crate::comm::config::*;
pub use crate::comm::tracing::init_tracing;

#[cfg(feature = "web_actix")]
pub mod response;

// 重新导出 tracing 宏 / Re-export tracing macros
pub use tracing::{debug, error, info, trace, warn};

use async_trait::async_trait;

/// 健康状态结构体：用于表示组件当前健康状况
/// Health status struct: represents the current health of a component
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    /// 组件名称（如 chat_gateway、offline_queue）
    /// Component name (e.g., chat_gateway, offline_queue)
    pub component: String,
    /// 是否健康 / Whether healthy
    pub healthy: bool,
    /// 附加消息 / Additional message
    pub message: Option<String>,
    /// 采样时间戳（UTC）/ Sample timestamp (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn new(component: impl Into<String>, healthy: bool, message: Option<String>) -> Self {
        Self { component: component.into(), healthy, message, timestamp: chrono::Utc::now() }
    }
}

/// 健康检查通用接口 / Generic health check interface
#[async_trait]
pub trait HealthCheck {
    async fn check_health(&self) -> HealthStatus;
}
