use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::message::SendMessage;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Sending,
    Failed,
}

/// 队列条目 / Queue item
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub payload: SendMessage,
    pub retry_count: u32,
    pub queued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<i64>,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    pub fn new(id: impl Into<String>, payload: SendMessage, queued_at: i64) -> Self {
        Self {
            id: id.into(),
            payload,
            retry_count: 0,
            queued_at,
            last_retry_at: None,
            status: QueueStatus::Sending,
            failed_at: None,
            last_error: None,
        }
    }
}

/// 本地持久队列：每次变更写入完整快照
/// Durable local queue; every change writes a full snapshot
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn load(&self) -> Result<Vec<QueuedMessage>>;
    async fn save(&self, items: &[QueuedMessage]) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryQueueStore {
    items: Mutex<Vec<QueuedMessage>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<QueuedMessage>) -> Self {
        Self { items: Mutex::new(items) }
    }

    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<QueuedMessage>> {
        Ok(self.snapshot())
    }

    async fn save(&self, items: &[QueuedMessage]) -> Result<()> {
        *self.items.lock() = items.to_vec();
        Ok(())
    }
}

/// JSON 文件队列（先写临时文件再原子替换）
/// JSON file queue (write a temp file, then rename over the target)
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<QueuedMessage>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&self.path).await.with_context(|| format!("read queue file {}", self.path.display()))?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("parse queue file {}", self.path.display()))
    }

    async fn save(&self, items: &[QueuedMessage]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(items)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.with_context(|| format!("write queue file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
