use crate::connection::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Background task that keeps the zone cache warm
///
/// Every `poll_interval` it asks the connection manager to query all zones.
/// Failures are logged and the loop carries on; a failed sweep is also what
/// drives lazy reconnection while the bridge is away.
///
/// # Example
///
/// ```no_run
/// use monozone::{BridgeConfig, Connection, Poller};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let connection = Arc::new(Connection::new(BridgeConfig::new("192.168.1.100", 4999)));
///     let mut poller = Poller::new(connection.clone());
///     poller.start();
///
///     tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
///     println!("{:?}", connection.zone_states());
///
///     poller.stop().await;
/// }
/// ```
pub struct Poller {
    connection: Arc<Connection>,
    interval: Duration,
    enabled: bool,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Poller {
    /// Create a poller using the connection's configured interval
    pub fn new(connection: Arc<Connection>) -> Self {
        let interval = connection.config().poll_interval;
        let enabled = connection.config().poll_enabled;
        Self {
            connection,
            interval,
            enabled,
            stop_tx: None,
            task_handle: None,
        }
    }

    /// Override the poll interval; takes effect on the next `start`
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start polling. Restarts the loop if it is already running.
    ///
    /// Does nothing when polling is disabled in the configuration.
    pub fn start(&mut self) {
        self.halt();

        if !self.enabled {
            tracing::info!("Zone polling disabled");
            return;
        }

        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        self.stop_tx = Some(stop_tx);

        let connection = self.connection.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            tracing::info!("Polling zones every {:?}", interval);

            loop {
                let states = connection.query_all().await;
                if states.is_empty() {
                    let error = connection.state().last_error;
                    tracing::warn!(
                        "Poll error: no zone answered ({})",
                        error.as_deref().unwrap_or("unknown")
                    );
                } else {
                    tracing::debug!("Polled {} zones", states.len());
                }

                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Zone polling stopped");
                        break;
                    }
                    _ = sleep(interval) => {}
                }
            }
        });

        self.task_handle = Some(handle);
    }

    /// Stop polling and wait briefly for an in-flight sweep to finish
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.task_handle.take() {
            // a sweep is bounded by six exchange timeouts
            let grace = self.connection.config().timeout * 6 + Duration::from_millis(500);
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!("Poll task did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    fn halt(&mut self) {
        self.stop_tx = None;
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.halt();
    }
}
