use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::server::ChatServer;

/// 启动WS监听 / Start WS listener
impl ChatServer {
    pub async fn run(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 v-connect-chat WebSocket Server starting on {}", addr);
        self.serve(listener).await
    }

    /// 在已绑定的监听器上接受连接 / Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("📡 Waiting for connections on {}...", listener.local_addr()?);
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await {
                    error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
