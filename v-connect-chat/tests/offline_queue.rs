use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use v_connect_chat::config::OfflineQueueConfig;
use v_connect_chat::domain::event::MessageSent;
use v_connect_chat::domain::message::SendMessage;
use v_connect_chat::domain::now_ms;
use v_connect_chat::offline::{FileQueueStore, MemoryQueueStore, MessageTransport, OfflineQueue, QueueEvent, QueueStatus, QueueStore, QueuedMessage, TransportError};

#[derive(Clone)]
enum Step {
    Ack,
    Fail(TransportError),
    Hang,
    Slow(Duration),
}

/// 按脚本应答并记录每次尝试时间 / Answers from a script and records when each attempt happened
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    otherwise: Step,
    attempts: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Step>, otherwise: Step) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), otherwise, attempts: Mutex::new(Vec::new()) })
    }

    fn offsets_secs(&self, start: Instant) -> Vec<u64> {
        self.attempts.lock().iter().map(|(at, _)| at.duration_since(start).as_secs()).collect()
    }

    fn nonces(&self) -> Vec<String> {
        self.attempts.lock().iter().map(|(_, n)| n.clone()).collect()
    }

    fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn send(&self, message: &SendMessage) -> Result<MessageSent, TransportError> {
        self.attempts.lock().push((Instant::now(), message.nonce.clone()));
        let step = self.script.lock().pop_front().unwrap_or_else(|| self.otherwise.clone());
        match step {
            Step::Ack => Ok(MessageSent { message_id: format!("m-{}", message.nonce), timestamp: now_ms(), nonce: message.nonce.clone() }),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
            Step::Slow(took) => {
                tokio::time::sleep(took).await;
                Ok(MessageSent { message_id: format!("m-{}", message.nonce), timestamp: now_ms(), nonce: message.nonce.clone() })
            }
        }
    }
}

fn config() -> OfflineQueueConfig {
    OfflineQueueConfig {
        base_delay: Duration::from_secs(5),
        max_retry_attempts: 3,
        send_timeout: Duration::from_secs(10),
        failed_retention: Duration::from_secs(60),
        path: None,
    }
}

fn down() -> TransportError {
    TransportError::Unavailable("connection refused".to_string())
}

async fn wait_for(events: &mut broadcast::Receiver<QueueEvent>, pred: impl Fn(&QueueEvent) -> bool) -> QueueEvent {
    loop {
        let event = events.recv().await.expect("queue event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_then_terminal_failure_then_purge() {
    let transport = ScriptedTransport::new(vec![], Step::Fail(down()));
    let store = Arc::new(MemoryQueueStore::new());
    let queue = OfflineQueue::open(config(), store.clone(), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();
    let start = Instant::now();

    let id = queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    let failed = wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
    assert_eq!(failed, QueueEvent::Failed { id: id.clone(), retry_count: 3, error: down().to_string() });
    assert_eq!(transport.offsets_secs(start), vec![0, 5, 15, 35]);
    let item = queue.get(&id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Failed);
    assert!(item.failed_at.is_some());
    assert_eq!(store.snapshot()[0].status, QueueStatus::Failed);

    wait_for(&mut events, |e| matches!(e, QueueEvent::Purged { .. })).await;
    let purged_after = start.elapsed();
    assert!(purged_after >= Duration::from_secs(95) && purged_after < Duration::from_secs(96), "purged at {:?}", purged_after);
    assert!(queue.is_empty().await);
    assert!(store.snapshot().is_empty());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.attempt_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn retry_events_report_growing_delays() {
    let transport = ScriptedTransport::new(vec![], Step::Fail(down()));
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::new()), transport).await.unwrap();
    let mut events = queue.subscribe();
    queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    let mut delays = Vec::new();
    while delays.len() < 3 {
        if let QueueEvent::RetryScheduled { delay, .. } = wait_for(&mut events, |e| matches!(e, QueueEvent::RetryScheduled { .. })).await {
            delays.push(delay.as_secs());
        }
    }
    assert_eq!(delays, vec![5, 10, 20]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_attempt_times_out_and_is_retried() {
    let transport = ScriptedTransport::new(vec![Step::Hang], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::new()), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();
    let start = Instant::now();

    let id = queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    let retry = wait_for(&mut events, |e| matches!(e, QueueEvent::RetryScheduled { .. })).await;
    match retry {
        QueueEvent::RetryScheduled { error, retry_count, .. } => {
            assert_eq!(retry_count, 1);
            assert!(error.contains("no acknowledgement"));
        }
        other => panic!("unexpected {:?}", other),
    }
    let sent = wait_for(&mut events, |e| matches!(e, QueueEvent::Sent { .. })).await;
    assert_eq!(sent, QueueEvent::Sent { id, message_id: "m-n1".to_string(), retry_count: 1 });
    assert_eq!(transport.offsets_secs(start), vec![0, 15]);
    assert!(queue.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn policy_rejection_fails_without_retry() {
    let rejected = TransportError::Rejected { code: "membership_violation".to_string(), message: "not a member".to_string() };
    let transport = ScriptedTransport::new(vec![Step::Fail(rejected)], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::new()), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();

    let id = queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    match wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. } | QueueEvent::RetryScheduled { .. })).await {
        QueueEvent::Failed { retry_count, .. } => assert_eq!(retry_count, 0),
        other => panic!("expected terminal failure, got {:?}", other),
    }
    assert_eq!(transport.attempt_count(), 1);

    // 手动重试：计数清零，再次发送 / Manual retry resets the counter and sends again
    assert!(queue.retry_failed(&id).await.unwrap());
    let sent = wait_for(&mut events, |e| matches!(e, QueueEvent::Sent { .. })).await;
    assert_eq!(sent, QueueEvent::Sent { id: id.clone(), message_id: "m-n1".to_string(), retry_count: 0 });
    assert!(!queue.retry_failed(&id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn connectivity_restored_skips_remaining_backoff() {
    let transport = ScriptedTransport::new(vec![Step::Fail(down())], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::new()), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();
    let start = Instant::now();

    queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();
    wait_for(&mut events, |e| matches!(e, QueueEvent::RetryScheduled { .. })).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.notify_connectivity_restored().await;

    wait_for(&mut events, |e| matches!(e, QueueEvent::Sent { .. })).await;
    assert_eq!(transport.offsets_secs(start), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn item_is_durable_before_the_first_attempt() {
    let transport = ScriptedTransport::new(vec![], Step::Hang);
    let store = Arc::new(MemoryQueueStore::new());
    let queue = OfflineQueue::open(config(), store.clone(), transport).await.unwrap();

    let id = queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    let persisted = store.snapshot();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, id);
    assert_eq!(persisted[0].status, QueueStatus::Sending);
}

#[tokio::test(start_paused = true)]
async fn reopened_queue_resumes_and_purges_stale_failures() {
    let pending = QueuedMessage::new("q-pending", SendMessage::text("dm", "hi", "n1"), now_ms());
    let mut stale = QueuedMessage::new("q-stale", SendMessage::text("dm", "old", "n0"), now_ms() - 120_000);
    stale.status = QueueStatus::Failed;
    stale.failed_at = Some(now_ms() - 90_000);
    let store = Arc::new(MemoryQueueStore::with_items(vec![stale, pending]));
    let transport = ScriptedTransport::new(vec![], Step::Ack);

    let queue = OfflineQueue::open(config(), store.clone(), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match events.recv().await.unwrap() {
            QueueEvent::Sent { id, .. } => seen.push(format!("sent:{}", id)),
            QueueEvent::Purged { id } => seen.push(format!("purged:{}", id)),
            _ => {}
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["purged:q-stale".to_string(), "sent:q-pending".to_string()]);
    assert!(store.snapshot().is_empty());
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_enqueues_share_one_drain() {
    let transport = ScriptedTransport::new(vec![], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::new()), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();

    let (a, b, c) = tokio::join!(
        queue.enqueue(SendMessage::text("dm", "1", "n1")),
        queue.enqueue(SendMessage::text("dm", "2", "n2")),
        queue.enqueue(SendMessage::text("dm", "3", "n3")),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let mut sent = 0;
    while sent < 3 {
        if let QueueEvent::Sent { .. } = events.recv().await.unwrap() {
            sent += 1;
        }
    }
    let mut nonces = transport.nonces();
    nonces.sort();
    assert_eq!(nonces, vec!["n1", "n2", "n3"]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!queue.is_draining());
}

fn pending(id: &str, conversation: &str, nonce: &str) -> QueuedMessage {
    QueuedMessage::new(id, SendMessage::text(conversation, nonce, nonce), now_ms())
}

async fn wait_sent(events: &mut broadcast::Receiver<QueueEvent>, count: usize) {
    let mut sent = 0;
    while sent < count {
        if let QueueEvent::Sent { .. } = wait_for(events, |e| matches!(e, QueueEvent::Sent { .. })).await {
            sent += 1;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn resumed_items_are_sent_in_enqueue_order() {
    let items: Vec<QueuedMessage> = (0..10).map(|i| pending(&format!("q{}", i), "dm", &format!("n{}", i))).collect();
    let transport = ScriptedTransport::new(vec![], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::with_items(items)), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();

    wait_sent(&mut events, 10).await;
    let expected: Vec<String> = (0..10).map(|i| format!("n{}", i)).collect();
    assert_eq!(transport.nonces(), expected);
}

#[tokio::test(start_paused = true)]
async fn failing_item_holds_back_its_conversation_only() {
    let items = vec![pending("q-a1", "dm", "a1"), pending("q-a2", "dm", "a2"), pending("q-b1", "team", "b1")];
    let transport = ScriptedTransport::new(vec![Step::Fail(down())], Step::Ack);
    let queue = OfflineQueue::open(config(), Arc::new(MemoryQueueStore::with_items(items)), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();
    let start = Instant::now();

    wait_sent(&mut events, 3).await;
    assert_eq!(transport.nonces(), vec!["a1", "b1", "a1", "a2"]);
    assert_eq!(transport.offsets_secs(start), vec![0, 0, 5, 5]);
}

#[tokio::test(start_paused = true)]
async fn waiting_behind_another_send_does_not_count_against_the_timeout() {
    let cfg = OfflineQueueConfig { send_timeout: Duration::from_secs(1), ..config() };
    let items = vec![pending("q-a", "dm", "a"), pending("q-b", "team", "b")];
    let slow = Step::Slow(Duration::from_millis(600));
    let transport = ScriptedTransport::new(vec![], slow);
    let queue = OfflineQueue::open(cfg, Arc::new(MemoryQueueStore::with_items(items)), transport.clone()).await.unwrap();
    let mut events = queue.subscribe();

    let mut retries = 0;
    let mut sent = 0;
    while sent < 2 {
        match events.recv().await.unwrap() {
            QueueEvent::Sent { retry_count, .. } => {
                assert_eq!(retry_count, 0);
                sent += 1;
            }
            QueueEvent::RetryScheduled { .. } => retries += 1,
            _ => {}
        }
    }
    assert_eq!(retries, 0);
    assert_eq!(transport.attempt_count(), 2);
}

#[tokio::test]
async fn configured_path_selects_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.json");
    let cfg = OfflineQueueConfig { path: Some(path.to_string_lossy().to_string()), ..config() };
    let transport = ScriptedTransport::new(vec![], Step::Hang);

    let queue = OfflineQueue::from_config(cfg.clone(), transport.clone()).await.unwrap();
    let id = queue.enqueue(SendMessage::text("dm", "hi", "n1")).await.unwrap();

    let on_disk = FileQueueStore::new(&path).load().await.unwrap();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].id, id);

    // 重新打开后从文件恢复 / Reopening restores from the file
    let reopened = OfflineQueue::from_config(cfg, transport).await.unwrap();
    assert_eq!(reopened.get(&id).await.map(|i| i.payload.nonce), Some("n1".to_string()));
}
