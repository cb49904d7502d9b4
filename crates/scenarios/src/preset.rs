//! Network condition presets
//!
//! A preset is either a flat condition (one netem node carrying rate, delay and
//! loss) or the layered low-latency profile (HTB class + netem + SFQ + port
//! filter) used for the best-quality step.

use crate::units::{Delay, Percent, Rate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a catalog entry, ordered worst to best
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PresetId {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
    Ultra,
}

impl PresetId {
    pub const ALL: [PresetId; 6] = [
        PresetId::VeryPoor,
        PresetId::Poor,
        PresetId::Fair,
        PresetId::Good,
        PresetId::Excellent,
        PresetId::Ultra,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PresetId::VeryPoor => "VeryPoor",
            PresetId::Poor => "Poor",
            PresetId::Fair => "Fair",
            PresetId::Good => "Good",
            PresetId::Excellent => "Excellent",
            PresetId::Ultra => "Ultra",
        }
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetId {
    type Err = String;

    /// Accepts `VeryPoor`, `very-poor`, `very_poor` and `VERY POOR` alike
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        PresetId::ALL
            .iter()
            .copied()
            .find(|id| id.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| format!("Unknown preset: {}", s))
    }
}

/// Fixed parameters of the layered low-latency hierarchy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayeredProfile {
    /// HTB class rate (also used as ceiling)
    pub rate: Rate,
    /// HTB class burst allowance in bytes
    pub burst_bytes: u32,
    /// Base netem delay under the class
    pub delay: Delay,
    /// Normally distributed jitter around `delay`
    pub jitter: Delay,
    /// Destination port steered into the high-bandwidth class
    pub steer_port: u16,
    /// SFQ hash perturbation period in seconds
    pub perturb_secs: u32,
}

impl LayeredProfile {
    /// Media-transport port of the streaming pipeline
    pub const MEDIA_PORT: u16 = 9999;

    /// 50 Mbit class, 1ms +/- 0.5ms, no loss
    pub const fn ultra() -> Self {
        Self {
            rate: Rate::mbit(50),
            burst_bytes: 15 * 1024,
            delay: Delay::from_millis(1),
            jitter: Delay::from_micros(500),
            steer_port: Self::MEDIA_PORT,
            perturb_secs: 10,
        }
    }
}

/// How a preset is realised on the interface
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Shaping {
    /// Single netem root node
    Flat {
        rate: Rate,
        delay: Delay,
        loss: Percent,
    },
    /// HTB -> netem -> SFQ chain with a port filter
    Layered(LayeredProfile),
}

/// One named network condition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub shaping: Shaping,
}

impl Preset {
    pub fn flat(id: PresetId, rate: Rate, delay: Delay, loss: Percent) -> Self {
        Self {
            id,
            shaping: Shaping::Flat { rate, delay, loss },
        }
    }

    pub fn layered(id: PresetId, profile: LayeredProfile) -> Self {
        Self {
            id,
            shaping: Shaping::Layered(profile),
        }
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn is_layered(&self) -> bool {
        matches!(self.shaping, Shaping::Layered(_))
    }

    /// Nominal bandwidth of the condition
    pub fn rate(&self) -> Rate {
        match &self.shaping {
            Shaping::Flat { rate, .. } => *rate,
            Shaping::Layered(profile) => profile.rate,
        }
    }

    /// Nominal one-way delay (jitter excluded)
    pub fn delay(&self) -> Delay {
        match &self.shaping {
            Shaping::Flat { delay, .. } => *delay,
            Shaping::Layered(profile) => profile.delay,
        }
    }

    /// Nominal loss; the layered profile never drops
    pub fn loss(&self) -> Percent {
        match &self.shaping {
            Shaping::Flat { loss, .. } => *loss,
            Shaping::Layered(_) => Percent::ZERO,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (rate: {}, delay: {}, loss: {}{})",
            self.name(),
            self.rate(),
            self.delay(),
            self.loss(),
            if self.is_layered() { ", layered" } else { "" }
        )
    }
}
