//! Agent listener
//!
//! Accepts incoming agent connections and spawns a handler for each.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::handler::{handle_connection, ServerContext};

/// Framed TCP server agents dial into
pub struct AgentServer {
    /// State handed to every connection
    ctx: ServerContext,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
    /// Connection handler tasks
    tracker: TaskTracker,
}

impl AgentServer {
    /// Create a new agent server
    pub fn new(ctx: ServerContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Agent server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Agent server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        let ctx = self.ctx.clone();
        let cancel = self.cancel.clone();
        let _ = socket.set_nodelay(true);

        self.tracker.spawn(async move {
            match handle_connection(ctx, socket, peer_addr, cancel).await {
                Ok(()) => tracing::debug!("Connection from {} closed", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {:#}", peer_addr, e),
            }
        });
    }

    /// Wait for connection handlers to finish after cancellation
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
