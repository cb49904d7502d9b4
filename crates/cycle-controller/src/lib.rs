//! Preset cycle controller
//!
//! Drives a schedule of network condition presets onto one interface: each
//! preset is applied through the hierarchy manager, reported to the
//! condition collector, and held for the dwell interval. Cancellation stops
//! the cycle, removes all shaping and reports that no condition is active.

pub mod cleanup;
pub mod config;
pub mod cycle;
pub mod signals;
pub mod state;

// Re-export commonly used types
pub use cleanup::{finalize, ShapingGuard};
pub use config::{CollectorConfig, ControllerConfig};
pub use cycle::{CycleEvent, CycleScheduler};
pub use signals::cancel_on_signals;
pub use state::CycleState;
pub use tokio_util::sync::CancellationToken;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Qdisc configuration error: {0}")]
    Qdisc(#[from] network_sim::QdiscError),

    #[error("Interface error: {0}")]
    Interface(#[from] network_sim::InterfaceError),

    #[error("Preflight check failed: {0}")]
    Preflight(#[from] network_sim::PreflightError),

    #[error("Sync client error: {0}")]
    Sync(#[from] condition_sync::SyncError),

    #[error("Schedule contains no presets")]
    EmptySchedule,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
