use crate::error::{MonozoneError, Result};
use crate::types::ZoneState;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Event published by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// A zone was queried and its cached state replaced
    Zone(ZoneState),

    /// The bridge connection came up (`true`) or went down (`false`)
    Connection(bool),
}

/// Stream of zone and connectivity events
///
/// Events are hints: the zone cache on the connection is authoritative, so a
/// subscriber that falls behind skips the events it missed and carries on
/// with the newest ones instead of failing. Re-read the cache after a gap
/// if every zone matters.
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Wait for the next event
    ///
    /// Fails with `ConnectionClosed` once the connection manager is dropped.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Ok(update),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Subscriber fell behind, skipped {} events", missed)
                }
                Err(RecvError::Closed) => return Err(MonozoneError::ConnectionClosed),
            }
        }
    }

    /// Next queued event, or `None` when nothing is pending
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Ok(Some(update)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::debug!("Subscriber fell behind, skipped {} events", missed)
                }
                Err(TryRecvError::Closed) => return Err(MonozoneError::ConnectionClosed),
            }
        }
    }
}
