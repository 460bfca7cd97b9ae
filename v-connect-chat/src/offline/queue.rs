use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::store::{FileQueueStore, MemoryQueueStore, QueueStatus, QueueStore, QueuedMessage};
use super::transport::{MessageTransport, TransportError};
use crate::config::OfflineQueueConfig;
use crate::domain::event::MessageSent;
use crate::domain::message::SendMessage;
use crate::domain::now_ms;

/// 队列事件，供界面订阅 / Queue events for the UI to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Queued { id: String },
    Sent { id: String, message_id: String, retry_count: u32 },
    RetryScheduled { id: String, retry_count: u32, delay: Duration, error: String },
    Failed { id: String, retry_count: u32, error: String },
    Purged { id: String },
}

#[derive(Default)]
struct QueueState {
    items: Vec<QueuedMessage>,
    /// sending 条目的下次尝试时间；不在表中表示正在发送
    /// Next attempt for `sending` items; absent while an attempt is in flight
    due: HashMap<String, Instant>,
    /// failed 条目的清除时间 / Purge deadline of `failed` items
    purge_at: HashMap<String, Instant>,
}

impl QueueState {
    fn next_wakeup(&self) -> Option<Instant> {
        self.due.values().chain(self.purge_at.values()).min().copied()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    /// 按入队顺序取下一个到期条目；同一会话中较早的待发条目会挡住后面的条目
    /// Next due item in enqueue order; an earlier pending item holds back later ones
    /// of the same conversation. Also returns the next wakeup for what stays queued.
    fn take_next(&mut self, now: Instant) -> (Option<QueuedMessage>, Option<Instant>) {
        let mut held: HashSet<&str> = HashSet::new();
        let mut wakeup = self.purge_at.values().min().copied();
        let mut picked = None;
        for item in self.items.iter().filter(|i| i.status == QueueStatus::Sending) {
            let conversation = item.payload.conversation_id.as_str();
            if !held.insert(conversation) {
                continue;
            }
            match self.due.get(&item.id) {
                Some(at) if *at <= now => {
                    picked = Some(item.clone());
                    break;
                }
                Some(at) => wakeup = Some(wakeup.map_or(*at, |w| w.min(*at))),
                None => {}
            }
        }
        if let Some(item) = picked.as_ref() {
            self.due.remove(&item.id);
        }
        (picked, wakeup)
    }
}

struct Inner {
    config: OfflineQueueConfig,
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn MessageTransport>,
    state: Mutex<QueueState>,
    draining: AtomicBool,
    wake: Notify,
    events: broadcast::Sender<QueueEvent>,
}

/// 离线发送队列 / Offline send queue
///
/// 同一时刻只有一个排空任务；并发触发只会唤醒它。
/// At most one drain task runs; concurrent triggers only wake it.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<Inner>,
}

/// 第 n 次重试前的等待：base * 2^(n-1) / Wait before retry n: base * 2^(n-1)
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

impl OfflineQueue {
    /// 加载持久队列并恢复未完成条目 / Load the durable queue and resume unfinished items
    pub async fn open(config: OfflineQueueConfig, store: Arc<dyn QueueStore>, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        let items = store.load().await?;
        let now = Instant::now();
        let now_wall = now_ms();
        let mut state = QueueState::default();
        for item in items {
            match item.status {
                QueueStatus::Sending => {
                    state.due.insert(item.id.clone(), now);
                }
                QueueStatus::Failed => {
                    let age = Duration::from_millis((now_wall - item.failed_at.unwrap_or(now_wall)).max(0) as u64);
                    state.purge_at.insert(item.id.clone(), now + config.failed_retention.saturating_sub(age));
                }
            }
            state.items.push(item);
        }
        let resumed = state.items.len();
        let (events, _) = broadcast::channel(256);
        let queue = Self {
            inner: Arc::new(Inner {
                config,
                store,
                transport,
                state: Mutex::new(state),
                draining: AtomicBool::new(false),
                wake: Notify::new(),
                events,
            }),
        };
        if resumed > 0 {
            info!("📦 offline queue resumed {} items", resumed);
            queue.trigger();
        }
        Ok(queue)
    }

    /// 按配置选择存储：有 `path` 用 JSON 文件，否则内存
    /// Pick the store from config: a JSON file when `path` is set, memory otherwise
    pub async fn from_config(config: OfflineQueueConfig, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        let store: Arc<dyn QueueStore> = match config.path.as_deref() {
            Some(path) => {
                info!("📦 offline queue persisted at {}", path);
                Arc::new(FileQueueStore::new(path))
            }
            None => Arc::new(MemoryQueueStore::new()),
        };
        Self::open(config, store, transport).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// 入队：先持久化，再触发发送 / Enqueue: persist first, then trigger sending
    pub async fn enqueue(&self, mut payload: SendMessage) -> Result<String> {
        if payload.nonce.is_empty() {
            payload.nonce = uuid::Uuid::new_v4().to_string();
        }
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state.lock().await;
            state.items.push(QueuedMessage::new(id.clone(), payload, now_ms()));
            if let Err(e) = self.inner.store.save(&state.items).await {
                state.items.pop();
                return Err(e.context("persist offline queue"));
            }
            state.due.insert(id.clone(), Instant::now());
        }
        debug!("queued {}", id);
        self.inner.emit(QueueEvent::Queued { id: id.clone() });
        self.trigger();
        Ok(id)
    }

    /// 连接恢复：所有待发条目立即到期 / Connectivity restored: every pending item is due now
    pub async fn notify_connectivity_restored(&self) {
        {
            let mut state = self.inner.state.lock().await;
            let now = Instant::now();
            for due in state.due.values_mut() {
                *due = now;
            }
        }
        self.trigger();
    }

    /// 手动重试 failed 条目（计数清零）/ Manually requeue a `failed` item (counter reset)
    pub async fn retry_failed(&self, id: &str) -> Result<bool> {
        {
            let mut state = self.inner.state.lock().await;
            let Some(pos) = state.position(id) else { return Ok(false) };
            if state.items[pos].status != QueueStatus::Failed {
                return Ok(false);
            }
            let item = &mut state.items[pos];
            item.status = QueueStatus::Sending;
            item.retry_count = 0;
            item.failed_at = None;
            item.last_error = None;
            state.purge_at.remove(id);
            state.due.insert(id.to_string(), Instant::now());
            self.inner.persist(&state).await;
        }
        self.inner.emit(QueueEvent::Queued { id: id.to_string() });
        self.trigger();
        Ok(true)
    }

    pub async fn items(&self) -> Vec<QueuedMessage> {
        self.inner.state.lock().await.items.clone()
    }

    pub async fn get(&self, id: &str) -> Option<QueuedMessage> {
        let state = self.inner.state.lock().await;
        state.position(id).map(|pos| state.items[pos].clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 清除保留期已过的 failed 条目 / Purge `failed` items whose retention has elapsed
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        self.inner.purge_expired(&mut state, Instant::now()).await
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    fn trigger(&self) {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            self.inner.wake.notify_one();
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drain().await });
    }
}

impl Inner {
    fn emit(&self, event: QueueEvent) {
        // 没有订阅者时发送失败，忽略 / Fails only when nobody subscribes
        let _ = self.events.send(event);
    }

    async fn persist(&self, state: &QueueState) {
        if let Err(e) = self.store.save(&state.items).await {
            error!("failed to persist offline queue: {:#}", e);
        }
    }

    /// 一次只发一条：入队顺序即服务端持久化顺序
    /// One attempt at a time so enqueue order is the order the gateway persists in
    async fn drain(self: Arc<Self>) {
        debug!("offline queue drain started");
        loop {
            let (next_item, wakeup) = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.purge_expired(&mut state, now).await;
                state.take_next(now)
            };
            if let Some(item) = next_item {
                let (id, result) = self.attempt(item).await;
                self.settle(&id, result).await;
                continue;
            }

            let Some(deadline) = wakeup else {
                self.draining.store(false, Ordering::Release);
                let pending = self.state.lock().await.next_wakeup().is_some();
                if pending && !self.draining.swap(true, Ordering::AcqRel) {
                    continue;
                }
                debug!("offline queue drain finished");
                return;
            };
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// 只做网络调用，不碰队列状态 / Network call only; never touches queue state
    async fn attempt(&self, item: QueuedMessage) -> (String, Result<MessageSent, TransportError>) {
        let result = match timeout(self.config.send_timeout, self.transport.send(&item.payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
        };
        (item.id, result)
    }

    async fn settle(&self, id: &str, result: Result<MessageSent, TransportError>) {
        let mut state = self.state.lock().await;
        let Some(pos) = state.position(id) else { return };
        let event = match result {
            Ok(ack) => {
                let item = state.items.remove(pos);
                info!("✅ queued message {} sent as {} after {} retries", id, ack.message_id, item.retry_count);
                QueueEvent::Sent { id: id.to_string(), message_id: ack.message_id, retry_count: item.retry_count }
            }
            Err(err) => {
                let max = self.config.max_retry_attempts;
                let retention = self.config.failed_retention;
                let item = &mut state.items[pos];
                item.last_error = Some(err.to_string());
                if !err.retryable() || item.retry_count >= max {
                    item.status = QueueStatus::Failed;
                    item.failed_at = Some(now_ms());
                    let retry_count = item.retry_count;
                    state.purge_at.insert(id.to_string(), Instant::now() + retention);
                    warn!("❌ queued message {} failed after {} retries: {}", id, retry_count, err);
                    QueueEvent::Failed { id: id.to_string(), retry_count, error: err.to_string() }
                } else {
                    item.retry_count += 1;
                    item.last_retry_at = Some(now_ms());
                    let retry_count = item.retry_count;
                    let delay = backoff_delay(self.config.base_delay, retry_count);
                    state.due.insert(id.to_string(), Instant::now() + delay);
                    debug!("queued message {} retry #{} in {:?}: {}", id, retry_count, delay, err);
                    QueueEvent::RetryScheduled { id: id.to_string(), retry_count, delay, error: err.to_string() }
                }
            }
        };
        self.persist(&state).await;
        drop(state);
        self.emit(event);
    }

    async fn purge_expired(&self, state: &mut QueueState, now: Instant) -> usize {
        let expired: Vec<String> = state.purge_at.iter().filter(|(_, at)| **at <= now).map(|(id, _)| id.clone()).collect();
        if expired.is_empty() {
            return 0;
        }
        for id in expired.iter() {
            state.purge_at.remove(id);
            state.items.retain(|i| &i.id != id);
        }
        self.persist(state).await;
        for id in expired.iter() {
            debug!("purged failed item {}", id);
            self.emit(QueueEvent::Purged { id: id.clone() });
        }
        expired.len()
    }
}
