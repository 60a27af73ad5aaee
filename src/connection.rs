use crate::config::BridgeConfig;
use crate::error::{MonozoneError, Result};
use crate::protocol;
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{ConnectionState, Control, LinkPhase, UnitId, ZoneState};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::{Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

const READ_CHUNK: usize = 256;
const EVENT_CAPACITY: usize = 100;

/// Transport half, only touched while the exchange lock is held
struct Link {
    stream: Option<TcpStream>,
    /// Time of the last failed connect, for on-demand reconnect backoff
    failed_at: Option<Instant>,
}

/// Marks the link down when an exchange future is dropped before it finishes
struct CancelGuard<'a> {
    connection: &'a Connection,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Exchange cancelled, dropping connection");
            self.connection
                .mark_disconnected(Some("Exchange cancelled".to_string()));
        }
    }
}

/// Connectivity fields readable without waiting on an exchange
struct Status {
    phase: LinkPhase,
    last_error: Option<String>,
}

/// Connection manager for the iTach bridge
///
/// Owns the single TCP stream to the bridge and serializes every
/// command/response exchange on it: the amplifier is strictly half-duplex,
/// so the lock spans the whole write-then-read cycle. Reconnection is lazy;
/// the next exchange after a failure re-opens the stream.
///
/// The zone cache is written only under the exchange lock, right after a
/// successful decode, and each entry is replaced wholesale.
pub struct Connection {
    config: BridgeConfig,
    link: Mutex<Link>,
    status: StdMutex<Status>,
    zones: RwLock<BTreeMap<u8, ZoneState>>,
    /// Broadcast channel for state and connectivity events
    events_tx: broadcast::Sender<StateUpdate>,
}

impl Connection {
    /// Create a disconnected manager; nothing is opened until first use
    pub fn new(config: BridgeConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            link: Mutex::new(Link {
                stream: None,
                failed_at: None,
            }),
            status: StdMutex::new(Status {
                phase: LinkPhase::Disconnected,
                last_error: None,
            }),
            zones: RwLock::new(BTreeMap::new()),
            events_tx,
        }
    }

    /// Settings this manager was built with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().unwrap().phase == LinkPhase::Connected
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        let status = self.status.lock().unwrap();
        ConnectionState {
            host: self.config.host.clone(),
            port: self.config.port,
            connected: status.phase == LinkPhase::Connected,
            phase: status.phase,
            last_error: status.last_error.clone(),
        }
    }

    /// Copy of the cached zone states, keyed by unit id
    pub fn zone_states(&self) -> BTreeMap<u8, ZoneState> {
        self.zones.read().unwrap().clone()
    }

    /// Last observed state of one zone
    pub fn zone_state(&self, unit: UnitId) -> Option<ZoneState> {
        self.zones.read().unwrap().get(&unit.get()).copied()
    }

    /// Subscribe to zone state and connectivity events
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.events_tx.subscribe())
    }

    /// Open the bridge connection. No-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        self.open(&mut link).await
    }

    /// Close the bridge connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;

        if let Some(mut stream) = link.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Error closing connection: {}", e);
            }
            tracing::info!("Disconnected from bridge");
        }

        self.mark_disconnected(None);
    }

    /// Send one frame and wait for the status line that answers it
    ///
    /// Reconnects first if needed. Returns the status line starting at the
    /// `>` marker, terminator included; echoed command fragments are skipped.
    pub async fn send_receive(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut link = self.link.lock().await;
        self.exchange(&mut link, frame).await
    }

    /// Query one zone and refresh its cache entry
    pub async fn query_unit(&self, unit: UnitId) -> Result<ZoneState> {
        let mut link = self.link.lock().await;
        self.query_locked(&mut link, unit).await
    }

    /// Query all six zones one after another
    ///
    /// Zones that fail are left out of the result; their cache entries keep
    /// the previous value.
    pub async fn query_all(&self) -> BTreeMap<u8, ZoneState> {
        let mut results = BTreeMap::new();

        for (i, unit) in UnitId::all().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }
            match self.query_unit(unit).await {
                Ok(state) => {
                    results.insert(unit.get(), state);
                }
                Err(e) => tracing::debug!("Query of {} failed: {}", unit, e),
            }
        }

        results
    }

    /// Write a control value, then re-query the zone so the cache holds
    /// whatever the amplifier actually applied
    pub async fn set_control(&self, unit: UnitId, control: Control, value: i32) -> Result<()> {
        let frame = protocol::encode_control(control, unit, value);
        let mut link = self.link.lock().await;

        self.exchange(&mut link, &frame).await?;

        if let Err(e) = self.query_locked(&mut link, unit).await {
            tracing::warn!("Refresh of {} after {:?} failed: {}", unit, control, e);
        }

        Ok(())
    }

    pub async fn set_power(&self, unit: UnitId, on: bool) -> Result<()> {
        self.set_control(unit, Control::Power, on as i32).await
    }

    pub async fn set_volume(&self, unit: UnitId, volume: i32) -> Result<()> {
        self.set_control(unit, Control::Volume, volume).await
    }

    pub async fn set_source(&self, unit: UnitId, source: i32) -> Result<()> {
        self.set_control(unit, Control::Source, source).await
    }

    pub async fn set_mute(&self, unit: UnitId, muted: bool) -> Result<()> {
        self.set_control(unit, Control::Mute, muted as i32).await
    }

    pub async fn set_bass(&self, unit: UnitId, bass: i32) -> Result<()> {
        self.set_control(unit, Control::Bass, bass).await
    }

    pub async fn set_treble(&self, unit: UnitId, treble: i32) -> Result<()> {
        self.set_control(unit, Control::Treble, treble).await
    }

    pub async fn set_balance(&self, unit: UnitId, balance: i32) -> Result<()> {
        self.set_control(unit, Control::Balance, balance).await
    }

    async fn query_locked(&self, link: &mut Link, unit: UnitId) -> Result<ZoneState> {
        let frame = protocol::query_frame(unit);
        let response = self.exchange(link, &frame).await?;

        let state = match protocol::decode(&response) {
            Some(state) if state.unit == unit.get() => state,
            Some(state) => {
                return Err(self.malformed(format!(
                    "expected zone {}, got zone {}",
                    unit.get(),
                    state.unit
                )));
            }
            None => {
                let text = String::from_utf8_lossy(&response);
                return Err(self.malformed(text.trim().to_string()));
            }
        };

        self.zones.write().unwrap().insert(unit.get(), state);
        let _ = self.events_tx.send(StateUpdate::Zone(state));

        Ok(state)
    }

    async fn exchange(&self, link: &mut Link, frame: &[u8]) -> Result<Vec<u8>> {
        self.ensure_connected(link).await?;

        // The stream is owned by this future until the exchange completes:
        // a caller that drops it mid-read also drops the socket, so a late
        // reply can never be read as the answer to the next command.
        let Some(mut stream) = link.stream.take() else {
            return Err(MonozoneError::ConnectionClosed);
        };
        let mut guard = CancelGuard {
            connection: self,
            armed: true,
        };
        let result = Self::transact(&mut stream, frame, self.config.timeout).await;
        guard.armed = false;

        match &result {
            Ok(_) => link.stream = Some(stream),
            Err(e) => self.teardown(e),
        }

        result
    }

    async fn transact(stream: &mut TcpStream, frame: &[u8], limit: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + limit;
        let mut chunk = [0u8; READ_CHUNK];

        // Bytes left over from an earlier exchange must not answer this one
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) => return Err(MonozoneError::ConnectionClosed),
                Ok(n) => tracing::debug!("Discarding {} stale bytes", n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!("Sending: {:?}", String::from_utf8_lossy(frame));
        timeout_at(deadline, stream.write_all(frame))
            .await
            .map_err(|_| MonozoneError::ResponseTimeout)??;

        // The bridge echoes the command before the status line; keep reading
        // until a terminated line carries the status marker.
        let mut buffer = Vec::new();
        loop {
            let n = timeout_at(deadline, stream.read(&mut chunk))
                .await
                .map_err(|_| MonozoneError::ResponseTimeout)??;
            if n == 0 {
                return Err(MonozoneError::ConnectionClosed);
            }

            buffer.extend_from_slice(&chunk[..n]);
            if let Some(line) = protocol::find_status_line(&buffer) {
                tracing::debug!("Received: {:?}", String::from_utf8_lossy(&line));
                return Ok(line);
            }
        }
    }

    async fn ensure_connected(&self, link: &mut Link) -> Result<()> {
        if link.stream.is_some() {
            return Ok(());
        }

        // a connect or exchange was cancelled without updating the phase
        if self.status.lock().unwrap().phase != LinkPhase::Disconnected {
            self.mark_disconnected(None);
        }

        if let Some(failed_at) = link.failed_at {
            if failed_at.elapsed() < self.config.reconnect_delay {
                let last = self.status.lock().unwrap().last_error.clone();
                return Err(MonozoneError::ConnectionFailure(format!(
                    "waiting to reconnect ({})",
                    last.as_deref().unwrap_or("previous attempt failed")
                )));
            }
        }

        self.open(link).await
    }

    async fn open(&self, link: &mut Link) -> Result<()> {
        if link.stream.is_some() {
            return Ok(());
        }

        self.status.lock().unwrap().phase = LinkPhase::Connecting;
        tracing::info!("Connecting to bridge at {}:{}", self.config.host, self.config.port);

        let address = (self.config.host.as_str(), self.config.port);
        let message = match timeout(self.config.timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Could not set TCP_NODELAY: {}", e);
                }
                link.stream = Some(stream);
                link.failed_at = None;
                self.mark_connected();
                tracing::info!("Connected to bridge");
                return Ok(());
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                "Connection refused".to_string()
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "Connection timeout".to_string(),
        };

        tracing::warn!(
            "Connection to {}:{} failed: {}",
            self.config.host,
            self.config.port,
            message
        );
        link.failed_at = Some(Instant::now());
        self.mark_disconnected(Some(message.clone()));

        Err(MonozoneError::ConnectionFailure(message))
    }

    /// Record a failed exchange; its stream has already been dropped
    fn teardown(&self, error: &MonozoneError) {
        tracing::warn!("Connection lost: {}", error);
        self.mark_disconnected(Some(error.to_string()));
    }

    fn malformed(&self, detail: String) -> MonozoneError {
        tracing::warn!("Malformed response: {}", detail);
        let error = MonozoneError::MalformedResponse(detail);
        self.status.lock().unwrap().last_error = Some(error.to_string());
        error
    }

    fn mark_connected(&self) {
        let was_connected = {
            let mut status = self.status.lock().unwrap();
            let was = status.phase == LinkPhase::Connected;
            status.phase = LinkPhase::Connected;
            status.last_error = None;
            was
        };

        if !was_connected {
            let _ = self.events_tx.send(StateUpdate::Connection(true));
        }
    }

    /// Only a Connected -> Disconnected change is announced, so repeated
    /// failed attempts do not produce duplicate `false` events
    fn mark_disconnected(&self, error: Option<String>) {
        let was_connected = {
            let mut status = self.status.lock().unwrap();
            let was = status.phase == LinkPhase::Connected;
            status.phase = LinkPhase::Disconnected;
            if error.is_some() {
                status.last_error = error;
            }
            was
        };

        if was_connected {
            let _ = self.events_tx.send(StateUpdate::Connection(false));
        }
    }
}
