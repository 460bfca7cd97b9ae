use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::server::{ChatServer, DisconnectReason};

/// 清理周期随超时缩放 / Sweep interval scales with the timeout
fn sweep_interval_ms(timeout_ms: u64) -> u64 {
    if timeout_ms <= 1000 {
        (timeout_ms / 2).max(1)
    } else if timeout_ms <= 10000 {
        1000
    } else {
        5000
    }
}

/// 关闭超时连接一次，返回关闭数量 / Close stale connections once; returns how many
pub fn sweep(server: &ChatServer, timeout: Duration) -> usize {
    let stale = server.hub.stale_connections(timeout);
    for conn_id in stale.iter() {
        warn!("💔 heartbeat timeout conn={}", conn_id);
        server.hub.close(conn_id, DisconnectReason::HeartbeatTimeout);
    }
    stale.len()
}

pub fn spawn_cleanup_task(server: ChatServer, timeout_ms: u64, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let every = sweep_interval_ms(timeout_ms);
        info!("⏰ Cleanup interval set to {}ms for timeout {}ms", every, timeout_ms);
        let mut ticker = interval(Duration::from_millis(every));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = sweep(&server, Duration::from_millis(timeout_ms));
                    if closed > 0 {
                        debug!("closed {} stale connections", closed);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
