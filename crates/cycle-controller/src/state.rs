//! Process-local state of one controller run

use network_sim::HierarchyVariant;

/// What the controller last did to its interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleState {
    pub interface: String,
    pub hierarchy: Option<HierarchyVariant>,
    pub current_preset: Option<usize>,
    pub running: bool,
}

impl CycleState {
    /// Fresh state: not running, no hierarchy
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            hierarchy: None,
            current_preset: None,
            running: false,
        }
    }

    pub fn applied(&mut self, index: usize, variant: HierarchyVariant) {
        self.current_preset = Some(index);
        self.hierarchy = Some(variant);
    }

    /// A failed apply may have left anything behind; forget the variant
    pub fn apply_failed(&mut self, index: usize) {
        self.current_preset = Some(index);
        self.hierarchy = None;
    }

    /// Back to the initial state after teardown
    pub fn reset(&mut self) {
        self.hierarchy = None;
        self.current_preset = None;
        self.running = false;
    }
}
