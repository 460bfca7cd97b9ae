use async_trait::async_trait;
use v::{HealthCheck, HealthStatus};

use crate::server::ChatServer;

/// 单实例连接数软上限 / Soft cap on connections per instance
const MAX_HEALTHY_CONNECTIONS: usize = 10_000;

// 为聊天网关实现统一健康检查接口
// Implement unified HealthCheck for the chat gateway
#[async_trait]
impl HealthCheck for ChatServer {
    /// 连接数、房间数、在线用户数 / Connection count, room count, online users
    async fn check_health(&self) -> HealthStatus {
        let connections = self.hub.connection_count();
        let online = self.presence.online_users().await.len();
        let healthy = connections < MAX_HEALTHY_CONNECTIONS;
        let msg = format!("connections={} rooms={} online_users={}", connections, self.hub.room_count(), online);
        HealthStatus::new("chat_gateway", healthy, Some(msg))
    }
}
