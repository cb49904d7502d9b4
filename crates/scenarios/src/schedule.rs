//! Preset schedules
//!
//! A schedule either rotates through an ordered list of presets, holding each
//! one for a dwell interval, or holds a single preset until cancelled.

use crate::preset::Preset;
use crate::presets::Presets;
use std::time::Duration;

/// Default time each preset stays active
pub const DEFAULT_DWELL: Duration = Duration::from_secs(20);

/// What the controller drives on the interface
#[derive(Clone, Debug, PartialEq)]
pub enum Schedule {
    /// Rotate through `presets`, wrapping after the last
    Cycle {
        presets: Vec<Preset>,
        dwell: Duration,
    },
    /// Apply one preset and keep it until cancelled
    Hold(Preset),
}

impl Schedule {
    /// The full catalog with the default dwell
    pub fn full_cycle() -> Self {
        Schedule::Cycle {
            presets: Presets::catalog(),
            dwell: DEFAULT_DWELL,
        }
    }

    /// Stable mode: the layered low-latency preset, held
    pub fn stable() -> Self {
        Schedule::Hold(Presets::stable())
    }

    pub fn cursor(&self) -> Cursor<'_> {
        let presets = match self {
            Schedule::Cycle { presets, .. } => presets.as_slice(),
            Schedule::Hold(preset) => std::slice::from_ref(preset),
        };
        Cursor { presets, next: 0 }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Schedule::Cycle { presets, .. } if presets.is_empty())
    }
}

/// One scheduled step
#[derive(Clone, Debug, PartialEq)]
pub struct Step<'a> {
    pub index: usize,
    pub preset: &'a Preset,
    /// This step starts a new pass over the presets
    pub wrapped: bool,
}

/// Endless position in a schedule
#[derive(Debug)]
pub struct Cursor<'a> {
    presets: &'a [Preset],
    next: usize,
}

impl<'a> Cursor<'a> {
    /// Next step; `None` only for an empty schedule
    pub fn advance(&mut self) -> Option<Step<'a>> {
        if self.presets.is_empty() {
            return None;
        }
        let index = self.next % self.presets.len();
        let wrapped = self.next > 0 && index == 0;
        self.next = index + 1;
        Some(Step {
            index,
            preset: &self.presets[index],
            wrapped,
        })
    }
}
