use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AuthConfig, AuthMode};
use crate::domain::context::{ConnectionContext, Identity};
use crate::error::{ChatError, ChatResult};

/// 鉴权协作者：用不透明凭证换取已验证身份
/// Auth collaborator: exchanges an opaque credential for a verified identity
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn verify_credential(&self, token: &str) -> ChatResult<Identity>;
}

/// 静态令牌表（单机运行与测试）/ Static token table (standalone runs and tests)
#[derive(Default)]
pub struct StaticAuthProvider {
    tokens: DashMap<String, Identity>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: &str, user_id: &str, tier: &str) -> Self {
        self.insert(token, Identity { user_id: user_id.to_string(), tier: tier.to_string() });
        self
    }

    pub fn insert(&self, token: &str, identity: Identity) {
        self.tokens.insert(token.to_string(), identity);
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn verify_credential(&self, token: &str) -> ChatResult<Identity> {
        self.tokens.get(token).map(|i| i.clone()).ok_or_else(|| ChatError::AuthFailure("unknown token".to_string()))
    }
}

/// 鉴权中心 HTTP 客户端 / Auth center HTTP client
pub struct HttpAuthProvider {
    client: reqwest::Client,
    center_url: String,
}

impl HttpAuthProvider {
    pub fn new(center_url: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?;
        Ok(Self { client, center_url: center_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn verify_credential(&self, token: &str) -> ChatResult<Identity> {
        let resp = self
            .client
            .get(format!("{}/v1/sso/verify", self.center_url))
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                warn!("auth center unreachable: {}", e);
                ChatError::AuthFailure("auth center unreachable".to_string())
            })?;
        if !resp.status().is_success() {
            return Err(ChatError::AuthFailure(format!("auth center rejected credential ({})", resp.status())));
        }
        resp.json::<Identity>().await.map_err(|e| ChatError::AuthFailure(format!("malformed auth response: {}", e)))
    }
}

/// 按配置构建鉴权协作者 / Build the auth collaborator from config
pub fn build_provider(cfg: &AuthConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    match cfg.mode {
        AuthMode::Http => Ok(Arc::new(HttpAuthProvider::new(&cfg.center_url, cfg.timeout_ms)?)),
        AuthMode::Static => {
            let provider = StaticAuthProvider::new();
            for (token, identity) in cfg.tokens.iter() {
                provider.insert(token, identity.clone());
            }
            Ok(Arc::new(provider))
        }
    }
}

/// 校验凭证并创建连接上下文；缺失或无效即拒绝
/// Verify the credential and create the connection context; missing or invalid fails closed
pub async fn authenticate(provider: &dyn AuthProvider, token: Option<&str>, connection_id: &str) -> ChatResult<ConnectionContext> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or_else(|| ChatError::AuthFailure("missing credential".to_string()))?;
    let identity = provider.verify_credential(token).await?;
    if identity.user_id.is_empty() {
        return Err(ChatError::AuthFailure("credential resolved to an empty user id".to_string()));
    }
    debug!("authenticated user={} tier={} conn={}", identity.user_id, identity.tier, connection_id);
    Ok(ConnectionContext::new(identity, connection_id))
}
