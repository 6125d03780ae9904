//! TCP accept loop.

use crate::session::serve;
use broker_core::Broker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Accepts and serves connections on `addr` until `cancel` fires. Each
/// connection gets its own child cancellation token, so one session
/// erroring out never tears down its siblings, and a `Semaphore` bounds the
/// number of live connections.
pub async fn run(
    broker: Arc<Broker>,
    addr: std::net::SocketAddr,
    max_connections: usize,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for broker connections");

    let connection_limit = Arc::new(Semaphore::new(max_connections));

    loop {
        tokio::select! {
            accept = listener.accept() => {
                let (socket, peer_addr) = match accept {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                let _ = socket.set_nodelay(true);

                let Ok(permit) = connection_limit.clone().try_acquire_owned() else {
                    tracing::warn!(%peer_addr, "connection limit reached, rejecting");
                    continue;
                };

                let broker = broker.clone();
                let task_cancellation = cancel.child_token();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = serve(broker, socket, peer_addr, idle_timeout, task_cancellation).await {
                        tracing::warn!(%peer_addr, error = %e, "connection closed");
                    }
                });
            }
            _ = cancel.cancelled() => {
                tracing::info!("listener received shutdown signal");
                return Ok(());
            }
        }
    }
}
