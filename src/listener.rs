//! `LISTEN pgcov` on a dedicated connection.
//!
//! `LISTEN` registration is per-connection, so this can never share the
//! pool: each [`Listener`] opens and owns exactly one `tokio-postgres`
//! connection for the lifetime of one test. Notifications are pushed onto
//! a bounded channel; a full channel soft-drops the newest signal and
//! reports the drop on a side error channel rather than blocking or
//! failing the test.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{PgcovError, Result};
use crate::model::CoverageSignal;

const SIGNAL_BUFFER: usize = 1000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PGCOV_CHANNEL: &str = "pgcov";

/// A dedicated `LISTEN pgcov` connection and its background pump task.
pub struct Listener {
    client: Option<tokio_postgres::Client>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    signals: mpsc::Receiver<CoverageSignal>,
    errors: mpsc::UnboundedReceiver<String>,
}

impl Listener {
    /// Open a connection to `connection_string`, issue `LISTEN pgcov`, and
    /// start the background notification pump.
    pub async fn connect(config: tokio_postgres::Config) -> Result<Self> {
        let (client, mut connection) = config.connect(NoTls).await.map_err(PgcovError::Database)?;

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                if task_cancel.is_cancelled() {
                    break;
                }
                match tokio::time::timeout(POLL_INTERVAL, connection.next()).await {
                    Ok(Some(Ok(AsyncMessage::Notification(n)))) => {
                        if n.channel() == PGCOV_CHANNEL {
                            let signal = CoverageSignal {
                                signal_id: n.payload().to_string(),
                                timestamp: chrono::Utc::now(),
                            };
                            if signal_tx.try_send(signal).is_err() {
                                let _ = error_tx.send(format!("signal buffer full ({SIGNAL_BUFFER}), dropped a notification"));
                            }
                        }
                    }
                    Ok(Some(Ok(_))) => {} // other async messages (notices, etc.) are ignored
                    Ok(Some(Err(e))) => {
                        let _ = error_tx.send(e.to_string());
                    }
                    Ok(None) => break, // connection closed
                    Err(_elapsed) => continue,
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN {PGCOV_CHANNEL}"))
            .await
            .map_err(PgcovError::Database)?;

        Ok(Listener {
            client: Some(client),
            cancel,
            task: Some(task),
            signals: signal_rx,
            errors: error_rx,
        })
    }

    /// Drain accumulated signals until the channel closes, `timeout`
    /// elapses, or `cancel` fires.
    pub async fn collect_signals(&mut self, timeout: Duration, cancel: &CancellationToken) -> Vec<CoverageSignal> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(remaining) => break,
                maybe = self.signals.recv() => {
                    match maybe {
                        Some(sig) => out.push(sig),
                        None => break,
                    }
                }
            }
        }
        out
    }

    /// Non-blocking drain of any reported (non-fatal) errors, e.g. dropped
    /// signals or connection hiccups.
    pub fn drain_errors(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(e) = self.errors.try_recv() {
            out.push(e);
        }
        out
    }

    /// Stop the pump task, best-effort `UNLISTEN`, and close the connection.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(client) = self.client.take() {
            if let Err(e) = client.batch_execute(&format!("UNLISTEN {PGCOV_CHANNEL}")).await {
                warn!(error = %e, "UNLISTEN failed during listener close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_and_poll_constants_have_the_expected_values() {
        assert_eq!(SIGNAL_BUFFER, 1000);
        assert_eq!(POLL_INTERVAL, Duration::from_millis(100));
    }
}
