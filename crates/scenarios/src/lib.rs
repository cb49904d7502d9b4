//! Network condition presets for netcond
//!
//! This crate provides the typed shaping quantities, the fixed catalog of
//! network conditions (VeryPoor through Ultra) and the schedules the
//! controller drives them with.

pub mod preset;
pub mod presets;
pub mod schedule;
pub mod units;

pub use preset::{LayeredProfile, Preset, PresetId, Shaping};
pub use presets::Presets;
pub use schedule::{Cursor, Schedule, Step, DEFAULT_DWELL};
pub use units::{Delay, Percent, Rate, UnitError};
