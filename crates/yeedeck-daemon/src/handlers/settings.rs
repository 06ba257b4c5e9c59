//! Validation of per-key action settings.
//!
//! The property inspector stores every value as a string. These parsers turn
//! them into device arguments and reject bad input before any device is
//! contacted.

use yeedeck_types::{InboundEvent, Settings};

use crate::error::{DaemonError, Result};

pub const MIN_BRIGHTNESS: i64 = 1;
pub const MAX_BRIGHTNESS: i64 = 100;
pub const MIN_TEMPERATURE: i64 = 1700;
pub const MAX_TEMPERATURE: i64 = 6500;
pub const MAX_DELTA: i64 = 100;

/// Transition used by adjust actions when none is configured
pub const DEFAULT_DURATION_MS: u64 = 500;

/// Settings object of an event.
///
/// # Errors
///
/// Returns `DaemonError::Validation` if the event carries none.
pub fn required(event: &InboundEvent) -> Result<&Settings> {
    event
        .payload
        .settings
        .as_ref()
        .ok_or_else(|| DaemonError::validation("missing action settings"))
}

/// # Errors
///
/// Returns `DaemonError::Validation` for an empty address.
pub fn address(settings: &Settings) -> Result<&str> {
    match settings.address().trim() {
        "" => Err(DaemonError::validation("missing device address")),
        address => Ok(address),
    }
}

/// Parse `#rgb` or `#rrggbb`.
///
/// # Errors
///
/// Returns `DaemonError::Validation` for anything else.
pub fn color(value: &str) -> Result<(u8, u8, u8)> {
    let invalid = || DaemonError::validation(format!("invalid color [{value}]"));

    let hex = value.strip_prefix('#').ok_or_else(invalid)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let expand = |i: usize| channel(&hex[i..=i].repeat(2));
            Ok((expand(0)?, expand(1)?, expand(2)?))
        }
        6 => Ok((channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
        _ => Err(invalid()),
    }
}

/// Brightness percentage, 1-100.
///
/// # Errors
///
/// Returns `DaemonError::Validation` if not an integer in range.
pub fn brightness(value: &str) -> Result<u8> {
    let v = integer("brightness", value, MIN_BRIGHTNESS, MAX_BRIGHTNESS)?;
    u8::try_from(v).map_err(|_| DaemonError::validation(format!("invalid brightness [{value}]")))
}

/// Color temperature in kelvin, 1700-6500.
///
/// # Errors
///
/// Returns `DaemonError::Validation` if not an integer in range.
pub fn temperature(value: &str) -> Result<u16> {
    let v = integer("temperature", value, MIN_TEMPERATURE, MAX_TEMPERATURE)?;
    u16::try_from(v).map_err(|_| DaemonError::validation(format!("invalid temperature [{value}]")))
}

/// Signed adjustment percentage, -100 to 100.
///
/// # Errors
///
/// Returns `DaemonError::Validation` if not an integer in range.
pub fn delta(value: &str) -> Result<i8> {
    let v = integer("delta", value, -MAX_DELTA, MAX_DELTA)?;
    i8::try_from(v).map_err(|_| DaemonError::validation(format!("invalid delta [{value}]")))
}

/// Transition duration in milliseconds; anything unparseable falls back to
/// [`DEFAULT_DURATION_MS`].
#[must_use]
pub fn duration(value: &str) -> u64 {
    value.trim().parse().unwrap_or(DEFAULT_DURATION_MS)
}

fn integer(name: &str, value: &str, min: i64, max: i64) -> Result<i64> {
    if value.is_empty() {
        return Err(DaemonError::validation(format!("invalid {name} [{value}]")));
    }

    let parsed: i64 = value
        .trim()
        .parse()
        .map_err(|_| DaemonError::validation(format!("cannot parse {name} [{value}]")))?;

    if !(min..=max).contains(&parsed) {
        return Err(DaemonError::validation(format!(
            "{name} [{value}] out of range {min}..={max}"
        )));
    }
    Ok(parsed)
}
