//! TCP listener for client location/vitals updates
//!
//! The ingestion collaborator pushes newline-delimited JSON, one update per
//! line (see `UpdateMessage`). Updates are forwarded to the monitor via
//! try_send so a slow consumer never blocks a connection handler - drops are
//! counted in metrics.

use crate::domain::types::{epoch_ms, ParsedUpdate, UpdateMessage};
use crate::infra::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Update listener configuration
#[derive(Debug, Clone)]
pub struct UpdateListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for UpdateListenerConfig {
    fn default() -> Self {
        Self { port: 27600, enabled: true }
    }
}

/// Start the update TCP listener
///
/// Accepts connections from ingestion gateways and forwards parsed updates
/// to the monitor.
pub async fn start_update_listener(
    config: UpdateListenerConfig,
    update_tx: mpsc::Sender<ParsedUpdate>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("update_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "update_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("update_listener_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let tx = update_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, tx, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "update_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    update_tx: mpsc::Sender<ParsedUpdate>,
    metrics: Arc<Metrics>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "update_connection_accepted");

    let reader = BufReader::new(socket);
    let mut lines = reader.lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: UpdateMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, error = %e, "update_parse_failed");
                continue;
            }
        };

        let Some(update) = message.into_parsed(epoch_ms()) else {
            warn!(peer = %peer, "update_missing_fields");
            continue;
        };

        metrics.record_ingest_received();
        match update_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.record_ingest_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(peer = %peer, "update_dropped: channel full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(peer = %peer, "update_channel_closed");
                break;
            }
        }
    }

    debug!(peer = %peer, "update_connection_closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UpdateKind;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn start_on_free_port(
        update_tx: mpsc::Sender<ParsedUpdate>,
        metrics: Arc<Metrics>,
    ) -> (u16, watch::Sender<bool>) {
        // Bind port 0 manually to find a free port, then hand it to the listener
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = UpdateListenerConfig { port, enabled: true };
        tokio::spawn(async move {
            let _ = start_update_listener(config, update_tx, metrics, shutdown_rx).await;
        });
        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(50)).await;
        (port, shutdown_tx)
    }

    #[tokio::test]
    async fn test_listener_forwards_parsed_updates() {
        let (tx, mut rx) = mpsc::channel(16);
        let metrics = Arc::new(Metrics::new());
        let (port, _shutdown) = start_on_free_port(tx, metrics.clone()).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(
                b"{\"id\":\"t1\",\"type\":\"location\",\"lat\":40.0,\"lon\":-73.0,\"ts\":1000}\n",
            )
            .await
            .unwrap();
        stream.write_all(b"not json\n").await.unwrap();
        stream.write_all(b"{\"id\":\"t1\",\"type\":\"panic\"}\n").await.unwrap();
        stream.flush().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.kind, UpdateKind::Location { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, UpdateKind::Panic);

        // The unparsable line was skipped, not forwarded
        assert_eq!(metrics.report().ingest_received, 2);
    }

    #[tokio::test]
    async fn test_disabled_listener_returns_immediately() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = start_update_listener(
            UpdateListenerConfig { port: 0, enabled: false },
            tx,
            metrics,
            shutdown_rx,
        )
        .await;
        assert!(result.is_ok());
    }
}
