//! The fixed preset catalog
//!
//! Entries are ordered from worst to best quality; the cycle visits them in
//! exactly this order.

use crate::preset::{LayeredProfile, Preset, PresetId};
use crate::units::{Delay, Percent, Rate};

/// Preset catalog
pub struct Presets;

impl Presets {
    /// All six presets in cycle order
    pub fn catalog() -> Vec<Preset> {
        PresetId::ALL.iter().map(|id| Self::get(*id)).collect()
    }

    pub fn get(id: PresetId) -> Preset {
        match id {
            PresetId::VeryPoor => {
                Preset::flat(id, Rate::mbit(1), Delay::from_millis(300), Percent::new(5.0))
            }
            PresetId::Poor => {
                Preset::flat(id, Rate::mbit(2), Delay::from_millis(150), Percent::new(3.0))
            }
            PresetId::Fair => {
                Preset::flat(id, Rate::mbit(4), Delay::from_millis(80), Percent::new(1.0))
            }
            PresetId::Good => {
                Preset::flat(id, Rate::mbit(6), Delay::from_millis(40), Percent::new(0.5))
            }
            PresetId::Excellent => {
                Preset::flat(id, Rate::mbit(10), Delay::from_millis(20), Percent::ZERO)
            }
            PresetId::Ultra => Preset::layered(id, LayeredProfile::ultra()),
        }
    }

    /// A subset of the catalog, kept in catalog order without duplicates
    pub fn select(ids: &[PresetId]) -> Vec<Preset> {
        Self::catalog()
            .into_iter()
            .filter(|preset| ids.contains(&preset.id))
            .collect()
    }

    /// The preset held by stable mode
    pub fn stable() -> Preset {
        Self::get(PresetId::Ultra)
    }
}
