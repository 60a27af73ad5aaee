//! In-process stand-in for the iTach bridge and the amplifier behind it.

#![allow(dead_code)]

use monozone::{BridgeConfig, ZoneState};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock answers frames
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Echo the command (with the bridge's `\r\n#` prompt) before the status line
    pub echo: bool,
    /// Deliver the status line in two writes
    pub split: bool,
    /// Never answer anything
    pub silent: bool,
    /// Never answer frames addressed to these units
    pub silent_units: Vec<u8>,
    /// Answer these units with an undecodable status line
    pub garbage_units: Vec<u8>,
    /// Close the socket as soon as a frame arrives
    pub close: bool,
    /// Wait this long before answering
    pub delay: Duration,
    /// Answer every frame with this unit's status line instead
    pub answer_as: Option<u8>,
    /// Send each reply a second time shortly after the first
    pub repeat: bool,
}

struct Shared {
    zones: Mutex<BTreeMap<u8, ZoneState>>,
    behavior: Mutex<Behavior>,
    frames: Mutex<Vec<String>>,
    connections: AtomicUsize,
    overlap: AtomicBool,
}

pub struct MockBridge {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockBridge {
    pub async fn start() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    pub async fn with_behavior(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let zones = (1..=6).map(|unit| (unit, default_zone(unit))).collect();
        let shared = Arc::new(Shared {
            zones: Mutex::new(zones),
            behavior: Mutex::new(behavior),
            frames: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            overlap: AtomicBool::new(false),
        });

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, accept_shared.clone()));
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    pub fn config(&self) -> BridgeConfig {
        test_config(self.addr.port())
    }

    pub fn set_behavior(&self, update: impl FnOnce(&mut Behavior)) {
        update(&mut self.shared.behavior.lock().unwrap());
    }

    pub fn set_zone(&self, state: ZoneState) {
        self.shared.zones.lock().unwrap().insert(state.unit, state);
    }

    pub fn zone(&self, unit: u8) -> ZoneState {
        self.shared.zones.lock().unwrap()[&unit]
    }

    /// Every frame received so far, without terminator
    pub fn frames(&self) -> Vec<String> {
        self.shared.frames.lock().unwrap().clone()
    }

    /// Control frames only (those starting with `<`)
    pub fn control_frames(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter(|f| f.starts_with('<'))
            .collect()
    }

    pub fn clear_frames(&self) {
        self.shared.frames.lock().unwrap().clear();
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Whether a second frame ever arrived before the first was answered
    pub fn saw_overlap(&self) -> bool {
        self.shared.overlap.load(Ordering::SeqCst)
    }
}

impl Drop for MockBridge {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub fn test_config(port: u16) -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".to_string(),
        port,
        timeout: Duration::from_millis(300),
        reconnect_delay: Duration::ZERO,
        inter_request_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(50),
        poll_enabled: true,
    }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn default_zone(unit: u8) -> ZoneState {
    ZoneState {
        unit,
        power: false,
        volume: 10,
        source: 1,
        mute: false,
        bass: 7,
        treble: 7,
        balance: 10,
        pa: false,
        dnd: false,
        keypad: false,
    }
}

pub fn status_line(state: &ZoneState) -> String {
    format!(
        ">{:02}{:02}{:02}{:02}{:02}{:02}{:02}{:02}{:02}{:02}{:02}\r",
        state.unit + 10,
        state.pa as u8,
        state.power as u8,
        state.mute as u8,
        state.dnd as u8,
        state.volume,
        state.treble,
        state.bass,
        state.balance,
        state.source,
        state.keypad as u8,
    )
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 256];

    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buffer.extend_from_slice(&chunk[..n]);

        if buffer.iter().filter(|&&b| b == b'\r').count() > 1 {
            shared.overlap.store(true, Ordering::SeqCst);
        }

        while let Some(end) = buffer.iter().position(|&b| b == b'\r') {
            let frame: Vec<u8> = buffer.drain(..=end).collect();
            let text = String::from_utf8_lossy(&frame[..frame.len() - 1]).to_string();
            shared.frames.lock().unwrap().push(text.clone());

            let behavior = shared.behavior.lock().unwrap().clone();
            if behavior.close {
                return;
            }

            let Some(reply) = respond(&shared, &text, &behavior) else {
                continue;
            };

            if !behavior.delay.is_zero() {
                tokio::time::sleep(behavior.delay).await;
            }

            let mut out = Vec::new();
            if behavior.echo {
                out.extend_from_slice(&frame);
                out.extend_from_slice(b"\n#");
            }
            out.extend_from_slice(reply.as_bytes());
            out.extend_from_slice(b"\n#");

            if behavior.split {
                let half = out.len() - reply.len() / 2;
                if socket.write_all(&out[..half]).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                if socket.write_all(&out[half..]).await.is_err() {
                    return;
                }
            } else if socket.write_all(&out).await.is_err() {
                return;
            }

            if behavior.repeat {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if socket.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn respond(shared: &Shared, frame: &str, behavior: &Behavior) -> Option<String> {
    if behavior.silent {
        return None;
    }

    let address: u8 = frame.get(1..3)?.parse().ok()?;
    let unit = address.checked_sub(10).filter(|u| (1..=6).contains(u))?;
    if behavior.silent_units.contains(&unit) {
        return None;
    }

    let mut zones = shared.zones.lock().unwrap();
    let zone = zones.get_mut(&unit)?;

    if frame.starts_with('<') {
        let code = frame.get(3..5)?;
        let value: u8 = frame.get(5..7)?.parse().ok()?;
        match code {
            "PR" => zone.power = value == 1,
            "VO" => zone.volume = value,
            "CH" => zone.source = value,
            "MU" => zone.mute = value == 1,
            "BS" => zone.bass = value,
            "TR" => zone.treble = value,
            "BL" => zone.balance = value,
            _ => return None,
        }
    } else if !frame.starts_with('?') {
        return None;
    }

    if behavior.garbage_units.contains(&unit) {
        return Some(format!(">{:02}garbage\r", address));
    }

    let answered = behavior.answer_as.unwrap_or(unit);
    zones.get(&answered).map(status_line)
}
