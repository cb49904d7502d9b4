//! Typed shaping quantities
//!
//! Rates, delays and percentages are carried with their unit attached and only
//! rendered to `tc` argument strings (or bare wire numbers) at the boundary.
//! Parsing accepts the spellings iproute2 uses on input and prints on output,
//! case-insensitively (`10mbit`, `1Mbit`, `300ms`, `300.0ms`, `500us`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in {0:?}")]
    InvalidNumber(String),

    #[error("unknown unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },
}

/// Split `"10.5mbit"` into `(10.5, "mbit")`.
fn split_quantity(input: &str) -> Result<(f64, String), UnitError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitError::Empty);
    }
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value: f64 = number
        .parse()
        .map_err(|_| UnitError::InvalidNumber(input.to_string()))?;
    Ok((value, unit.trim().to_ascii_lowercase()))
}

/// Bandwidth in bits per second (SI multiples, as `tc` uses them)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rate {
    bits_per_sec: u64,
}

impl Rate {
    pub const fn bps(bits_per_sec: u64) -> Self {
        Self { bits_per_sec }
    }

    pub const fn kbit(kbit: u64) -> Self {
        Self::bps(kbit * 1_000)
    }

    pub const fn mbit(mbit: u64) -> Self {
        Self::bps(mbit * 1_000_000)
    }

    pub fn bits_per_sec(&self) -> u64 {
        self.bits_per_sec
    }

    /// Value in Mbit/s, the wire convention of the sync protocol
    pub fn as_mbit(&self) -> f64 {
        self.bits_per_sec as f64 / 1_000_000.0
    }

    /// Render as a `tc` argument (`10mbit`, `500kbit`, `1200bit`)
    pub fn to_tc_arg(&self) -> String {
        let bps = self.bits_per_sec;
        if bps != 0 && bps % 1_000_000_000 == 0 {
            format!("{}gbit", bps / 1_000_000_000)
        } else if bps != 0 && bps % 1_000_000 == 0 {
            format!("{}mbit", bps / 1_000_000)
        } else if bps != 0 && bps % 1_000 == 0 {
            format!("{}kbit", bps / 1_000)
        } else {
            format!("{}bit", bps)
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Mbps", self.as_mbit())
    }
}

impl FromStr for Rate {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(s)?;
        // "bps" family is bytes per second in tc
        let multiplier = match unit.as_str() {
            "" | "bit" => 1.0,
            "kbit" | "k" => 1e3,
            "mbit" | "m" => 1e6,
            "gbit" | "g" => 1e9,
            "bps" => 8.0,
            "kbps" => 8e3,
            "mbps" => 8e6,
            "gbps" => 8e9,
            _ => {
                return Err(UnitError::UnknownUnit {
                    input: s.to_string(),
                    unit,
                })
            }
        };
        Ok(Self::bps((value * multiplier).round() as u64))
    }
}

/// A latency value (delay or jitter)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Delay(Duration);

impl Delay {
    pub const ZERO: Delay = Delay(Duration::ZERO);

    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub const fn from_micros(us: u64) -> Self {
        Self(Duration::from_micros(us))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Value in milliseconds, the wire convention of the sync protocol
    pub fn as_millis_f64(&self) -> f64 {
        self.0.as_micros() as f64 / 1_000.0
    }

    /// Render as a `tc` argument (`150ms`, `500us`)
    pub fn to_tc_arg(&self) -> String {
        let us = self.0.as_micros();
        if us % 1_000 == 0 {
            format!("{}ms", us / 1_000)
        } else {
            format!("{}us", us)
        }
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms", self.as_millis_f64())
    }
}

impl FromStr for Delay {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(s)?;
        let micros = match unit.as_str() {
            "" | "us" | "usec" | "usecs" => value,
            "ms" | "msec" | "msecs" => value * 1e3,
            "s" | "sec" | "secs" => value * 1e6,
            _ => {
                return Err(UnitError::UnknownUnit {
                    input: s.to_string(),
                    unit,
                })
            }
        };
        Ok(Self(Duration::from_micros(micros.round() as u64)))
    }
}

/// A probability expressed in percent (0.0-100.0)
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Percent(f64);

impl Percent {
    pub const ZERO: Percent = Percent(0.0);

    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Equality with tolerance for values read back from `tc`
    pub fn approx_eq(&self, other: &Percent) -> bool {
        (self.0 - other.0).abs() < 1e-4
    }

    pub fn to_tc_arg(&self) -> String {
        format!("{}%", self.0)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for Percent {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(s)?;
        match unit.as_str() {
            "" | "%" => Ok(Self(value)),
            _ => Err(UnitError::UnknownUnit {
                input: s.to_string(),
                unit,
            }),
        }
    }
}
