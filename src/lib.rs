//! Rust library for controlling Monoprice 6-zone amplifiers
//!
//! The amplifier speaks a fixed-width ASCII protocol over RS232, reached
//! here through an iTach Flex IP-to-serial bridge. This library provides an
//! async API that supports:
//!
//! - Power, volume, source, mute, bass, treble and balance per zone
//! - Zone state queries, single or all six zones
//! - A cached view of every zone's last reported state
//! - Lazy reconnection after timeouts and dropped connections
//! - Background polling to keep the cache fresh
//! - State and connectivity change subscriptions
//! - Bulk power, scheduled actions and zone snapshots (presets)
//!
//! # Quick Start
//!
//! ```no_run
//! use monozone::{BridgeConfig, MonozoneClient, StateUpdate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MonozoneClient::new(BridgeConfig::new("192.168.1.100", 4999));
//!     client.connect().await?;
//!
//!     // Turn on the kitchen and set a comfortable level
//!     client.set_power(2, true).await?;
//!     client.set_source(2, 3).await?;
//!     client.set_volume(2, 18).await?;
//!
//!     // Keep the cache fresh and watch for changes
//!     let mut poller = client.poller();
//!     poller.start();
//!
//!     let mut updates = client.subscribe();
//!     while let Ok(update) = updates.recv().await {
//!         if let StateUpdate::Zone(state) = update {
//!             println!("Zone {} volume {}", state.unit, state.volume);
//!         }
//!     }
//!
//!     poller.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: typed control operations with unit validation and value clamping
//! - **Poller**: periodic refresh of all zones
//! - **Connection**: the single TCP stream, exchange serialization, reconnection and the zone cache
//! - **Protocol**: frame encoding and status line decoding
//! - **Types**: domain types and data structures

mod client;
mod config;
mod connection;
mod error;
mod poller;
mod subscription;
mod types;

pub mod protocol;

// Public exports
pub use client::MonozoneClient;
pub use config::{BridgeConfig, DEFAULT_PORT};
pub use connection::Connection;
pub use error::{MonozoneError, Result};
pub use poller::Poller;
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    ConnectionState, Control, LinkPhase, UnitId, ZoneAction, ZoneSnapshot, ZoneState,
    ZoneTarget, UNIT_COUNT, WIRE_ADDRESS_OFFSET,
};
