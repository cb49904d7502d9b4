//! Wire representation of a commanded condition

use scenarios::Preset;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Preset name reported when no condition is active
pub const NO_CONDITION: &str = "NONE";

/// Condition as sent to the collector.
///
/// Units are fixed by convention on both ends: `rate` in Mbit/s, `delay` in
/// milliseconds, `loss` in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub preset: String,
    #[serde(serialize_with = "compact_number")]
    pub rate: f64,
    #[serde(serialize_with = "compact_number")]
    pub delay: f64,
    #[serde(serialize_with = "compact_number")]
    pub loss: f64,
}

impl SyncMessage {
    pub fn from_preset(preset: &Preset) -> Self {
        Self {
            preset: preset.name().to_string(),
            rate: preset.rate().as_mbit(),
            delay: preset.delay().as_millis_f64(),
            loss: preset.loss().value(),
        }
    }

    /// "No condition": sent once shaping has been removed
    pub fn none() -> Self {
        Self {
            preset: NO_CONDITION.to_string(),
            rate: 0.0,
            delay: 0.0,
            loss: 0.0,
        }
    }

    /// Build from unit-suffixed strings such as `"10mbit"`, `"150ms"`, `"3%"`
    pub fn from_unit_strings(preset: &str, rate: &str, delay: &str, loss: &str) -> Self {
        Self {
            preset: preset.to_string(),
            rate: strip_units(rate),
            delay: strip_units(delay),
            loss: strip_units(loss),
        }
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} Mbps, {} ms, {}%)",
            self.preset, self.rate, self.delay, self.loss
        )
    }
}

/// Keep only digits and the decimal point; anything unparsable becomes 0
pub fn strip_units(value: &str) -> f64 {
    let numeric: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    numeric.parse().unwrap_or(0.0)
}

/// Serialize whole numbers without a fractional part (`2`, not `2.0`)
pub(crate) fn compact_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}
