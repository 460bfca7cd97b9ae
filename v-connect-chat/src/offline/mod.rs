//! 离线发送队列（客户端组件）/ Offline send queue (client-side component)
//!
//! 每条待发消息先落盘再尝试发送；失败按条目独立退避重试，
//! 超过上限转为终态 failed，保留一段时间后清除。
//! Every outgoing message is persisted before any network attempt; failures back off
//! per item, items past the retry cap turn terminally `failed` and are purged after a
//! retention window.

pub mod queue;
pub mod store;
pub mod transport;

pub use queue::{OfflineQueue, QueueEvent};
pub use store::{FileQueueStore, MemoryQueueStore, QueueStatus, QueueStore, QueuedMessage};
pub use transport::{MessageTransport, TransportError, WsTransport};
