//! v-connect-chat：聊天实时投递核心
//! v-connect-chat: real-time delivery core of the chat subsystem
//!
//! - 连接网关 / Connection gateway (`ws`, `server`)
//! - 在线状态 / Presence tracker (`service::presence`)
//! - 消息管道 / Message pipeline (`service::pipeline`)
//! - 离线发送队列 / Offline send queue (`offline`)

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod offline;
pub mod router;
pub mod server;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod ws;

pub use error::{ChatError, ChatResult};
pub use server::ChatServer;
