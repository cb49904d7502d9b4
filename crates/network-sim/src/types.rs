//! Error types for hierarchy management, interface resolution and preflight

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QdiscError {
    #[error("Command error: {0}")]
    Command(#[from] std::io::Error),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Permission denied (requires root privileges)")]
    PermissionDenied,

    #[error("No qdisc present on {0}")]
    NotPresent(String),

    #[error("tc rejected `{command}`: {stderr}")]
    Rejected { command: String, stderr: String },

    #[error("Unexpected tc output: {0}")]
    Parse(String),
}

impl QdiscError {
    /// Errors that make any further shaping on the interface pointless.
    ///
    /// Everything else is scoped to the operation that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QdiscError::Command(_) | QdiscError::InterfaceNotFound(_) | QdiscError::PermissionDenied
        )
    }
}

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Command error: {0}")]
    Command(#[from] std::io::Error),

    #[error("Interface {name} not found (available: {})", available.join(", "))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("No network interface could be determined")]
    Unresolved,
}

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("Root privileges required to modify network settings (effective uid {0})")]
    NotRoot(u32),

    #[error("tc (traffic control) is not available: {0}")]
    TcUnavailable(String),
}
