//! Condition synchronization for netcond
//!
//! The controller reports every preset it applies to a remote collector so
//! measurements taken on the far end can be correlated with the condition
//! that was actually commanded.
//!
//! # Features
//!
//! - **Sync messages**: compact `{preset, rate, delay, loss}` records in Mbit, ms and percent
//! - **Sync client**: one short-timeout POST per preset, failures only logged
//! - **Collector**: the `/tc_settings` HTTP endpoint that stores and serves the latest record

pub mod client;
pub mod message;
pub mod server;

pub use client::{report, ConditionSink, NullSink, SyncClient, DEFAULT_SYNC_TIMEOUT};
pub use message::{strip_units, SyncMessage};
pub use server::{CollectedSettings, Collector, DEFAULT_COLLECTOR_PORT};

/// Errors that can occur while synchronizing conditions
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Collector did not acknowledge: {0}")]
    NotAcknowledged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
