use serde::{Deserialize, Serialize};

use super::{ConnectionId, UserId};

/// 鉴权中心返回的身份 / Identity issued by the auth collaborator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(alias = "user_id")]
    pub user_id: UserId,
    pub tier: String,
}

/// 连接上下文：鉴权成功时创建一次，之后只读
/// Connection context: created once on successful auth, read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    user_id: UserId,
    tier: String,
    connection_id: ConnectionId,
}

impl ConnectionContext {
    pub fn new(identity: Identity, connection_id: impl Into<String>) -> Self {
        Self { user_id: identity.user_id, tier: identity.tier, connection_id: connection_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tier(&self) -> &str {
        &self.tier
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}
