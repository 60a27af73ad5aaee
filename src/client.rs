use crate::config::BridgeConfig;
use crate::connection::Connection;
use crate::error::{MonozoneError, Result};
use crate::poller::Poller;
use crate::subscription::StateReceiver;
use crate::types::{resolve_units, ConnectionState, UnitId, ZoneAction, ZoneSnapshot, ZoneState, ZoneTarget};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Client for controlling a Monoprice 6-zone amplifier
///
/// `MonozoneClient` is the typed front of the connection manager. Unit ids
/// are checked before any I/O (`InvalidUnit` for anything outside 1-6) and
/// bounded values are clamped into range rather than rejected, the same as
/// the amplifier firmware does with out-of-range writes.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct MonozoneClient {
    connection: Arc<Connection>,
}

impl MonozoneClient {
    /// Create a client. The bridge is not contacted until `connect` or the
    /// first command.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use monozone::{BridgeConfig, MonozoneClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = MonozoneClient::new(BridgeConfig::new("192.168.1.100", 4999));
    ///     client.connect().await?;
    ///     client.set_power(1, true).await?;
    ///     client.set_volume(1, 20).await?;
    ///     println!("{:?}", client.query_unit(1).await?);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_connection(Arc::new(Connection::new(config)))
    }

    /// Wrap an existing connection manager
    pub fn with_connection(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// The underlying connection manager
    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Cached zone states from the most recent successful queries
    pub fn zone_states(&self) -> BTreeMap<u8, ZoneState> {
        self.connection.zone_states()
    }

    /// Cached state of one zone, if it has been queried
    pub fn zone_state(&self, unit: u8) -> Result<Option<ZoneState>> {
        Ok(self.connection.zone_state(UnitId::new(unit)?))
    }

    /// Subscribe to zone state and connectivity events
    pub fn subscribe(&self) -> StateReceiver {
        self.connection.subscribe()
    }

    /// Create a background poller for this client's connection
    pub fn poller(&self) -> Poller {
        Poller::new(self.connection.clone())
    }

    /// Query one zone from the amplifier
    pub async fn query_unit(&self, unit: u8) -> Result<ZoneState> {
        self.connection.query_unit(UnitId::new(unit)?).await
    }

    /// Query all zones; zones that did not answer are absent from the map
    pub async fn query_all(&self) -> BTreeMap<u8, ZoneState> {
        self.connection.query_all().await
    }

    pub async fn set_power(&self, unit: u8, on: bool) -> Result<()> {
        self.connection.set_power(UnitId::new(unit)?, on).await
    }

    /// Set volume, clamped to 0-38
    pub async fn set_volume(&self, unit: u8, volume: i32) -> Result<()> {
        self.connection.set_volume(UnitId::new(unit)?, volume).await
    }

    /// Select a source, clamped to 1-6
    pub async fn set_source(&self, unit: u8, source: i32) -> Result<()> {
        self.connection.set_source(UnitId::new(unit)?, source).await
    }

    pub async fn set_mute(&self, unit: u8, muted: bool) -> Result<()> {
        self.connection.set_mute(UnitId::new(unit)?, muted).await
    }

    /// Set bass, clamped to 0-14 (7 is neutral)
    pub async fn set_bass(&self, unit: u8, bass: i32) -> Result<()> {
        self.connection.set_bass(UnitId::new(unit)?, bass).await
    }

    /// Set treble, clamped to 0-14 (7 is neutral)
    pub async fn set_treble(&self, unit: u8, treble: i32) -> Result<()> {
        self.connection.set_treble(UnitId::new(unit)?, treble).await
    }

    /// Set balance, clamped to 0-20 (10 is centered)
    pub async fn set_balance(&self, unit: u8, balance: i32) -> Result<()> {
        self.connection.set_balance(UnitId::new(unit)?, balance).await
    }

    /// Set power on the given units, or on every unit when `units` is `None`
    ///
    /// Units are switched in ascending order with a short pause in between.
    /// Every unit is attempted even after a failure; the result is an error
    /// listing the failed units if any of them failed.
    pub async fn set_power_for_units(&self, units: Option<&[u8]>, on: bool) -> Result<()> {
        let units = match units {
            Some(ids) => resolve_units(ids)?,
            None => UnitId::all().collect(),
        };

        let connection: &Connection = &self.connection;
        self.for_each_unit(&units, move |unit| connection.set_power(unit, on))
            .await
    }

    /// Run a scheduled action against its target zones
    pub async fn execute_action(&self, action: ZoneAction, target: &ZoneTarget) -> Result<()> {
        let units = target.resolve()?;
        tracing::info!("Executing {:?} on {} zones", action, units.len());

        let connection: &Connection = &self.connection;
        self.for_each_unit(&units, move |unit| async move {
            match action {
                ZoneAction::PowerOn => connection.set_power(unit, true).await,
                ZoneAction::PowerOff => connection.set_power(unit, false).await,
                ZoneAction::SetSource(source) => connection.set_source(unit, source as i32).await,
                ZoneAction::SetVolume(volume) => connection.set_volume(unit, volume as i32).await,
            }
        })
        .await
    }

    /// Bring one zone to the settings in `snapshot`
    ///
    /// Power is set first. The remaining settings are only written when the
    /// snapshot has the zone powered on; all of them are attempted.
    pub async fn apply_snapshot(&self, snapshot: &ZoneSnapshot) -> Result<()> {
        let unit = UnitId::new(snapshot.unit)?;
        let connection = &self.connection;

        let mut ok = record(unit, connection.set_power(unit, snapshot.power).await);
        if snapshot.power {
            ok &= record(unit, connection.set_source(unit, snapshot.source as i32).await);
            ok &= record(unit, connection.set_volume(unit, snapshot.volume as i32).await);
            ok &= record(unit, connection.set_mute(unit, snapshot.mute).await);
            ok &= record(unit, connection.set_bass(unit, snapshot.bass as i32).await);
            ok &= record(unit, connection.set_treble(unit, snapshot.treble as i32).await);
            ok &= record(unit, connection.set_balance(unit, snapshot.balance as i32).await);
        }

        if ok {
            Ok(())
        } else {
            Err(MonozoneError::PartialFailure {
                failed: vec![unit.get()],
            })
        }
    }

    /// Apply several snapshots in order, e.g. a stored preset
    pub async fn apply_snapshots(&self, snapshots: &[ZoneSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            UnitId::new(snapshot.unit)?;
        }

        let mut failed = Vec::new();
        for (i, snapshot) in snapshots.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.connection.config().inter_request_delay).await;
            }
            if self.apply_snapshot(snapshot).await.is_err() && !failed.contains(&snapshot.unit) {
                failed.push(snapshot.unit);
            }
        }

        finish(failed)
    }

    async fn for_each_unit<'a, F, Fut>(&'a self, units: &[UnitId], op: F) -> Result<()>
    where
        F: Fn(UnitId) -> Fut,
        Fut: Future<Output = Result<()>> + 'a,
    {
        let mut failed = Vec::new();

        for (i, &unit) in units.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.connection.config().inter_request_delay).await;
            }
            if !record(unit, op(unit).await) {
                failed.push(unit.get());
            }
        }

        finish(failed)
    }
}

fn record(unit: UnitId, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Command for {} failed: {}", unit, e);
            false
        }
    }
}

fn finish(mut failed: Vec<u8>) -> Result<()> {
    if failed.is_empty() {
        Ok(())
    } else {
        failed.sort_unstable();
        Err(MonozoneError::PartialFailure { failed })
    }
}
