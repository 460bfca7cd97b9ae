use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use v_connect_chat::config::{self, ChatConfig};
use v_connect_chat::domain::message::SendMessage;
use v_connect_chat::offline::{OfflineQueue, QueueEvent, WsTransport};
use v_connect_chat::server::{ChatServer, DisconnectReason};
use v_connect_chat::service::auth::build_provider;
use v_connect_chat::storage::MemoryStore;
use v_connect_chat::{router, tasks};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-connect-chat WebSocket & HTTP Server", long_about = None)]
pub struct Args {
    /// 额外配置文件（优先级高于 config/*.toml）
    /// Extra config file (overrides config/*.toml)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 经离线队列发送一条文本消息（客户端）/ Send one text message through the offline queue (client side)
    Send {
        /// 网关地址 / Gateway URL
        #[arg(long, default_value = "ws://127.0.0.1:5200/")]
        url: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        conversation: String,
        text: String,
    },
}

/// 入队并等待终态（已发送或失败）/ Enqueue and wait for a terminal outcome (sent or failed)
async fn send_queued(cfg: ChatConfig, url: String, token: String, conversation: String, text: String) -> Result<()> {
    let transport = Arc::new(WsTransport::new(url, token));
    let queue = OfflineQueue::from_config(cfg.offline_queue, transport).await?;
    let mut events = queue.subscribe();
    let id = queue.enqueue(SendMessage::text(conversation, text, "")).await?;
    info!("📤 queued {}", id);
    loop {
        match events.recv().await? {
            QueueEvent::Sent { id: sent, message_id, retry_count } if sent == id => {
                info!("✅ sent as {} after {} retries", message_id, retry_count);
                return Ok(());
            }
            QueueEvent::RetryScheduled { id: item, retry_count, delay, error } if item == id => {
                info!("🔁 retry #{} in {:?}: {}", retry_count, delay, error);
            }
            QueueEvent::Failed { id: item, error, .. } if item == id => anyhow::bail!("send failed: {}", error),
            _ => {}
        }
    }
}

fn seeded_store(cfg: &ChatConfig) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for seed in cfg.conversations.iter() {
        store.create_conversation(&seed.id, seed.kind, seed.members.iter().cloned());
    }
    info!("💾 in-memory store seeded with {} conversations", store.conversation_count());
    store
}

async fn start_http_server(server: ChatServer, host: String, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("🌐 HTTP Server starting on http://{}", addr);
    HttpServer::new(move || {
        App::new()
            .wrap(
                actix_web::middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Headers", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, OPTIONS")),
            )
            .app_data(web::Data::new(server.clone()))
            .configure(router::configure)
    })
    .bind(addr)?
    .disable_signals()
    .run()
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 先装配置再装日志，日志级别来自配置 / Config first; the log level comes from it
    // 未指定时回退到本服务自带的默认配置 / Fall back to the service's bundled default config
    let bundled = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
    let extra = args.config.or_else(|| std::path::Path::new(bundled).exists().then(|| bundled.to_string()));
    let cm = v::init_global_config_manager(extra.as_deref())?;
    v::init_tracing()?;
    info!("🎯 Starting v-connect-chat (WebSocket + HTTP)...");
    cm.log_sources();

    let cfg = config::load(&cm)?;
    if let Some(Command::Send { url, token, conversation, text }) = args.command {
        return send_queued(cfg, url, token, conversation, text).await;
    }
    let store = seeded_store(&cfg);
    let auth = build_provider(&cfg.auth)?;
    info!("🔐 auth mode: {:?}", cfg.auth.mode);

    let host = cfg.server.host.clone();
    let (ws_port, http_port, timeout_ms) = (cfg.server.ws_port, cfg.server.http_port, cfg.server.timeout_ms);
    let server = ChatServer::new(cfg, auth, store.clone(), store);

    // 启动心跳清理任务 / Start heartbeat cleanup task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tasks::heartbeat::spawn_cleanup_task(server.clone(), timeout_ms, shutdown_rx);

    let ws_server = server.clone();
    let ws_host = host.clone();
    let ws_future = async move {
        if let Err(e) = ws_server.run(&ws_host, ws_port).await {
            error!("❌ WebSocket server error: {}", e);
        }
    };
    let http_future = start_http_server(server.clone(), host, http_port);

    tokio::select! {
        _ = ws_future => info!("WebSocket server stopped"),
        res = http_future => {
            if let Err(e) = res {
                error!("❌ HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("🛑 Ctrl-C received, shutting down"),
    }

    let _ = shutdown_tx.send(true);
    server.hub.close_all(DisconnectReason::ServerShutdown);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("✅ Server shutdown successfully");
    Ok(())
}
