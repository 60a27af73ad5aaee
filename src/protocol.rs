//! RS232 frame codec for the Monoprice 6-zone controller.
//!
//! ```text
//! control:  <ZZCCVV\r     ZZ = wire address (11-16), CC = code, VV = value
//! query:    ?ZZ\r
//! status:   >ZZ PA PR MU DT VO TR BS BL CH LS \r   (ten 2-digit fields)
//! ```
//!
//! Encoders clamp values into range and reject unknown units. The decoder
//! never fails loudly: partial or garbled lines are common on the bridge,
//! so anything that does not fit the fixed layout decodes to `None`.

use crate::error::Result;
use crate::types::{Control, UnitId, ZoneState};

/// Frame terminator
pub const TERMINATOR: u8 = b'\r';

/// Leading byte of a control frame
pub const CONTROL_MARKER: u8 = b'<';

/// Leading byte of a query frame
pub const QUERY_MARKER: u8 = b'?';

/// Leading byte of an authoritative status line
pub const STATUS_MARKER: u8 = b'>';

/// Characters after the status marker: address plus ten fields
pub const STATUS_PAYLOAD_LEN: usize = 22;

const FIELD_WIDTH: usize = 2;

/// Field order within a status line, after the address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Pa = 0,
    Power,
    Mute,
    Dnd,
    Volume,
    Treble,
    Bass,
    Balance,
    Source,
    Keypad,
}

/// Build a control frame for `unit`, clamping `value` into the control's range
pub fn encode(control: Control, unit: u8, value: i32) -> Result<Vec<u8>> {
    let unit = UnitId::new(unit)?;
    Ok(encode_control(control, unit, value))
}

/// Build a query frame for `unit`
pub fn encode_query(unit: u8) -> Result<Vec<u8>> {
    let unit = UnitId::new(unit)?;
    Ok(query_frame(unit))
}

/// Query frames for every unit, ascending
pub fn encode_query_all() -> Vec<Vec<u8>> {
    UnitId::all().map(query_frame).collect()
}

pub(crate) fn encode_control(control: Control, unit: UnitId, value: i32) -> Vec<u8> {
    format!(
        "{}{:02}{}{:02}\r",
        CONTROL_MARKER as char,
        unit.wire_address(),
        control.code(),
        control.clamp(value)
    )
    .into_bytes()
}

pub(crate) fn query_frame(unit: UnitId) -> Vec<u8> {
    format!("{}{:02}\r", QUERY_MARKER as char, unit.wire_address()).into_bytes()
}

/// Decode one status line. All-or-nothing: any deviation yields `None`.
pub fn decode(raw: &[u8]) -> Option<ZoneState> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) if text.is_ascii() => text.trim(),
        _ => {
            tracing::debug!("Status line is not ASCII: {:?}", raw);
            return None;
        }
    };

    let Some(payload) = text.strip_prefix(STATUS_MARKER as char) else {
        tracing::debug!("Line without status marker: {:?}", text);
        return None;
    };

    if payload.len() < STATUS_PAYLOAD_LEN {
        tracing::debug!("Status line too short: {:?}", text);
        return None;
    }

    let unit = match two_digits(payload, 0).and_then(UnitId::from_wire_address) {
        Some(unit) => unit,
        None => {
            tracing::debug!("Invalid zone address in {:?}", text);
            return None;
        }
    };

    let fields = &payload[FIELD_WIDTH..];
    let field = |f: Field| two_digits(fields, f as usize * FIELD_WIDTH);
    let flag = |f: Field| field(f).map(|v| v == 1);

    let state = ZoneState {
        unit: unit.get(),
        pa: flag(Field::Pa)?,
        power: flag(Field::Power)?,
        mute: flag(Field::Mute)?,
        dnd: flag(Field::Dnd)?,
        volume: field(Field::Volume)?,
        treble: field(Field::Treble)?,
        bass: field(Field::Bass)?,
        balance: field(Field::Balance)?,
        source: field(Field::Source)?,
        keypad: flag(Field::Keypad)?,
    };
    Some(state)
}

/// Decode every status line in a blob of concatenated frames
pub fn decode_multiple(data: &[u8]) -> Vec<ZoneState> {
    data.split(|&b| b == TERMINATOR)
        .filter(|segment| !segment.is_empty())
        .filter_map(decode)
        .collect()
}

/// First complete, terminated line carrying the status marker.
///
/// The bridge echoes the issued command before the real status line, and
/// may prefix lines with a prompt character, so the returned line starts at
/// the marker and includes the terminator. Unterminated trailing data is
/// ignored until more bytes arrive.
pub fn find_status_line(buffer: &[u8]) -> Option<Vec<u8>> {
    let complete = match buffer.iter().rposition(|&b| b == TERMINATOR) {
        Some(end) => &buffer[..end],
        None => return None,
    };

    complete.split(|&b| b == TERMINATOR).find_map(|line| {
        let start = line.iter().position(|&b| b == STATUS_MARKER)?;
        let mut status = line[start..].to_vec();
        status.push(TERMINATOR);
        Some(status)
    })
}

fn two_digits(text: &str, offset: usize) -> Option<u8> {
    let digits = text.get(offset..offset + FIELD_WIDTH)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
