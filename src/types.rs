use crate::error::{MonozoneError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Number of addressable zones on the amplifier
pub const UNIT_COUNT: u8 = 6;

/// Offset between a logical unit id and its wire address (unit 1 = 11)
pub const WIRE_ADDRESS_OFFSET: u8 = 10;

/// Validated zone identifier in `1..=6`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub struct UnitId(u8);

impl UnitId {
    /// Validate a logical unit id
    pub fn new(id: u8) -> Result<Self> {
        if (1..=UNIT_COUNT).contains(&id) {
            Ok(Self(id))
        } else {
            Err(MonozoneError::InvalidUnit(id))
        }
    }

    /// Resolve a wire address (11-16) back to a unit
    pub fn from_wire_address(address: u8) -> Option<Self> {
        address
            .checked_sub(WIRE_ADDRESS_OFFSET)
            .and_then(|id| Self::new(id).ok())
    }

    /// All units in ascending order
    pub fn all() -> impl Iterator<Item = UnitId> {
        (1..=UNIT_COUNT).map(UnitId)
    }

    /// The logical id (1-6)
    pub fn get(self) -> u8 {
        self.0
    }

    /// The device-facing address (11-16)
    pub fn wire_address(self) -> u8 {
        self.0 + WIRE_ADDRESS_OFFSET
    }
}

impl TryFrom<u8> for UnitId {
    type Error = MonozoneError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<UnitId> for u8 {
    fn from(unit: UnitId) -> u8 {
        unit.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}", self.0)
    }
}

/// A settable control on a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Power,
    Volume,
    Source,
    Mute,
    Bass,
    Treble,
    Balance,
}

impl Control {
    /// Two-letter wire code
    pub fn code(self) -> &'static str {
        match self {
            Control::Power => "PR",
            Control::Volume => "VO",
            Control::Source => "CH",
            Control::Mute => "MU",
            Control::Bass => "BS",
            Control::Treble => "TR",
            Control::Balance => "BL",
        }
    }

    /// Legal value range accepted by the amplifier
    pub fn range(self) -> RangeInclusive<i32> {
        match self {
            Control::Power | Control::Mute => 0..=1,
            Control::Volume => 0..=38,
            Control::Source => 1..=6,
            Control::Bass | Control::Treble => 0..=14,
            Control::Balance => 0..=20,
        }
    }

    /// Clamp a requested value into the legal range
    pub fn clamp(self, value: i32) -> u8 {
        let range = self.range();
        // ranges top out at 38, the cast cannot truncate
        value.clamp(*range.start(), *range.end()) as u8
    }
}

/// Decoded state of one zone, as reported by the amplifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneState {
    /// Logical unit id (1-6)
    pub unit: u8,
    pub power: bool,
    /// Volume, 0-38
    pub volume: u8,
    /// Selected source, 1-6
    pub source: u8,
    pub mute: bool,
    /// Bass, 0-14 with 7 neutral
    pub bass: u8,
    /// Treble, 0-14 with 7 neutral
    pub treble: u8,
    /// Balance, 0-20 with 10 centered
    pub balance: u8,
    /// Public address override active
    pub pa: bool,
    /// Do-not-disturb
    pub dnd: bool,
    /// Wall keypad connected
    pub keypad: bool,
}

impl ZoneState {
    /// Bass as a signed offset from neutral (-7..=+7)
    pub fn bass_db(&self) -> i8 {
        self.bass as i8 - 7
    }

    /// Treble as a signed offset from neutral (-7..=+7)
    pub fn treble_db(&self) -> i8 {
        self.treble as i8 - 7
    }

    /// Balance as a signed offset from center (-10..=+10)
    pub fn balance_offset(&self) -> i8 {
        self.balance as i8 - 10
    }
}

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the bridge connection, computed from live fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub host: String,
    pub port: u16,
    pub connected: bool,
    pub phase: LinkPhase,
    pub last_error: Option<String>,
}

/// Desired settings for one zone, applied as a unit (the device side of a preset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub unit: u8,
    pub power: bool,
    pub source: u8,
    pub volume: u8,
    #[serde(default)]
    pub mute: bool,
    #[serde(default = "neutral_tone")]
    pub bass: u8,
    #[serde(default = "neutral_tone")]
    pub treble: u8,
    #[serde(default = "center_balance")]
    pub balance: u8,
}

fn neutral_tone() -> u8 {
    7
}

fn center_balance() -> u8 {
    10
}

impl From<&ZoneState> for ZoneSnapshot {
    fn from(state: &ZoneState) -> Self {
        Self {
            unit: state.unit,
            power: state.power,
            source: state.source,
            volume: state.volume,
            mute: state.mute,
            bass: state.bass,
            treble: state.treble,
            balance: state.balance,
        }
    }
}

/// Action a scheduler can fire at a set of zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ZoneAction {
    PowerOn,
    PowerOff,
    SetSource(u8),
    SetVolume(u8),
}

/// Which zones an action applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "units", rename_all = "snake_case")]
pub enum ZoneTarget {
    AllZones,
    Units(Vec<u8>),
}

impl ZoneTarget {
    /// Resolve to validated units, ascending and deduplicated
    pub fn resolve(&self) -> Result<Vec<UnitId>> {
        match self {
            ZoneTarget::AllZones => Ok(UnitId::all().collect()),
            ZoneTarget::Units(ids) => resolve_units(ids),
        }
    }
}

/// Validate every id, then sort and deduplicate
pub(crate) fn resolve_units(ids: &[u8]) -> Result<Vec<UnitId>> {
    let mut units = ids
        .iter()
        .map(|&id| UnitId::new(id))
        .collect::<Result<Vec<_>>>()?;
    units.sort();
    units.dedup();
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_bounds() {
        assert!(matches!(UnitId::new(0), Err(MonozoneError::InvalidUnit(0))));
        assert!(matches!(UnitId::new(7), Err(MonozoneError::InvalidUnit(7))));
        assert_eq!(UnitId::new(1).unwrap().wire_address(), 11);
        assert_eq!(UnitId::new(6).unwrap().wire_address(), 16);
    }

    #[test]
    fn wire_address_roundtrip() {
        assert_eq!(UnitId::from_wire_address(13), Some(UnitId::new(3).unwrap()));
        assert_eq!(UnitId::from_wire_address(10), None);
        assert_eq!(UnitId::from_wire_address(17), None);
        assert_eq!(UnitId::from_wire_address(5), None);
    }

    #[test]
    fn control_clamping() {
        assert_eq!(Control::Volume.clamp(100), 38);
        assert_eq!(Control::Bass.clamp(-5), 0);
        assert_eq!(Control::Source.clamp(0), 1);
        assert_eq!(Control::Balance.clamp(15), 15);
    }

    #[test]
    fn target_resolution() {
        let units = ZoneTarget::Units(vec![5, 2, 5]).resolve().unwrap();
        assert_eq!(units.iter().map(|u| u.get()).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(ZoneTarget::AllZones.resolve().unwrap().len(), 6);
        assert!(ZoneTarget::Units(vec![1, 9]).resolve().is_err());
    }

    #[test]
    fn display_offsets() {
        let state = ZoneState {
            unit: 1,
            power: true,
            volume: 20,
            source: 1,
            mute: false,
            bass: 0,
            treble: 14,
            balance: 10,
            pa: false,
            dnd: false,
            keypad: false,
        };
        assert_eq!(state.bass_db(), -7);
        assert_eq!(state.treble_db(), 7);
        assert_eq!(state.balance_offset(), 0);
    }
}
