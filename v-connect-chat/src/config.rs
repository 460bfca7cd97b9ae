use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use v::ConfigManager;

use crate::domain::context::Identity;
use crate::domain::conversation::ConversationKind;

#[derive(Debug, Clone)]
pub struct ServerConfig { pub host: String, pub ws_port: u16, pub http_port: u16, pub timeout_ms: u64 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Static,
    Http,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub center_url: String,
    pub timeout_ms: u64,
    pub deadline_ms: u64,                       // 首帧鉴权时限 / Deadline for the first `auth` frame
    pub tokens: HashMap<String, Identity>,      // static 模式令牌表 / Token table for static mode
}

/// 离线发送队列参数 / Offline send queue parameters
#[derive(Debug, Clone)]
pub struct OfflineQueueConfig {
    pub base_delay: Duration,
    pub max_retry_attempts: u32,
    pub send_timeout: Duration,
    pub failed_retention: Duration,
    pub path: Option<String>,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5_000),
            max_retry_attempts: 3,
            send_timeout: Duration::from_millis(10_000),
            failed_retention: Duration::from_millis(60_000),
            path: None,
        }
    }
}

/// 预置会话（内存存储）/ Seed conversation for the in-memory store
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConversation {
    pub id: String,
    pub kind: ConversationKind,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub offline_queue: OfflineQueueConfig,
    pub conversations: Vec<SeedConversation>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "127.0.0.1".to_string(), ws_port: 5200, http_port: 8080, timeout_ms: 30_000 },
            auth: AuthConfig {
                mode: AuthMode::Static,
                center_url: "http://127.0.0.1:8090".to_string(),
                timeout_ms: 1_000,
                deadline_ms: 3_000,
                tokens: HashMap::new(),
            },
            offline_queue: OfflineQueueConfig::default(),
            conversations: Vec::new(),
        }
    }
}

/// 整数配置项，越界报错而不是截断 / Integer key; out-of-range values are an error, never truncated
fn ranged<T: TryFrom<i64>>(cm: &ConfigManager, key: &str, default: i64) -> Result<T> {
    let raw: i64 = cm.get_or(key, default);
    T::try_from(raw).map_err(|_| anyhow::anyhow!("config key '{}' = {} is out of range", key, raw))
}

/// 从配置管理器读取类型化配置 / Read typed configuration from the manager
pub fn load(cm: &ConfigManager) -> Result<ChatConfig> {
    let d = ChatConfig::default();
    let server = ServerConfig {
        host: cm.get_or("server.host", d.server.host),
        ws_port: ranged(cm, "server.ws_port", d.server.ws_port.into())?,
        http_port: ranged(cm, "server.http_port", d.server.http_port.into())?,
        timeout_ms: ranged(cm, "server.timeout_ms", d.server.timeout_ms as i64)?,
    };
    let mode = match cm.get_or("auth.mode", "static".to_string()).to_ascii_lowercase().as_str() {
        "static" => AuthMode::Static,
        "http" => AuthMode::Http,
        other => anyhow::bail!("unsupported auth.mode '{}' (expected static|http)", other),
    };
    let auth = AuthConfig {
        mode,
        center_url: cm.get_or("auth.center_url", d.auth.center_url),
        timeout_ms: ranged(cm, "auth.timeout_ms", d.auth.timeout_ms as i64)?,
        deadline_ms: ranged(cm, "auth.deadline_ms", d.auth.deadline_ms as i64)?,
        tokens: cm.get_or("auth.tokens", HashMap::new()),
    };
    let q = d.offline_queue;
    let millis = |key: &str, default: Duration| ranged::<u64>(cm, key, default.as_millis() as i64).map(Duration::from_millis);
    let offline_queue = OfflineQueueConfig {
        base_delay: millis("offline_queue.base_delay_ms", q.base_delay)?,
        max_retry_attempts: ranged(cm, "offline_queue.max_retry_attempts", q.max_retry_attempts.into())?,
        send_timeout: millis("offline_queue.send_timeout_ms", q.send_timeout)?,
        failed_retention: millis("offline_queue.failed_retention_ms", q.failed_retention)?,
        path: cm.get::<String>("offline_queue.path").ok(),
    };
    let conversations = cm.get_or("conversations", Vec::new());
    Ok(ChatConfig { server, auth, offline_queue, conversations })
}
