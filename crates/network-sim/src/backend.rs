//! Backends executing traffic-control operations
//!
//! [`CommandBackend`] drives the iproute2 `tc` binary. The in-memory backend
//! used by tests lives in [`crate::memory`].

use crate::ops::{TcObject, TcOp};
use crate::types::QdiscError;
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use tokio::process::Command;

/// Kernel packet-scheduling facility keyed by interface name
#[async_trait]
pub trait TcBackend: Send + Sync {
    /// Perform one mutation on `dev`
    async fn execute(&self, dev: &str, op: &TcOp) -> Result<(), QdiscError>;

    /// Dump one of the interface's tables in `tc ... show` format
    async fn show(&self, dev: &str, object: TcObject) -> Result<String, QdiscError>;

    /// Remove the root qdisc without an async runtime (drop guards)
    fn delete_root_blocking(&self, dev: &str) -> Result<(), QdiscError>;
}

/// Runs the `tc` binary
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
}

impl CommandBackend {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("tc"),
        }
    }

    /// Use a specific `tc` binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, dev: &str, args: Vec<String>) -> Result<String, QdiscError> {
        debug!("Running: tc {}", args.join(" "));
        let output = Command::new(&self.program).args(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(dev, &args, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for CommandBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TcBackend for CommandBackend {
    async fn execute(&self, dev: &str, op: &TcOp) -> Result<(), QdiscError> {
        self.run(dev, op.args(dev)).await.map(|_| ())
    }

    async fn show(&self, dev: &str, object: TcObject) -> Result<String, QdiscError> {
        self.run(dev, object.show_args(dev)).await
    }

    fn delete_root_blocking(&self, dev: &str) -> Result<(), QdiscError> {
        let args = TcOp::DeleteRoot.args(dev);
        let output = std::process::Command::new(&self.program)
            .args(&args)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(dev, &args, &stderr));
        }
        Ok(())
    }
}

/// Map `tc` stderr onto the error taxonomy
pub fn classify_failure(dev: &str, args: &[String], stderr: &str) -> QdiscError {
    let stderr = stderr.trim();
    if stderr.contains("Cannot find device") {
        QdiscError::InterfaceNotFound(dev.to_string())
    } else if stderr.contains("Operation not permitted") {
        QdiscError::PermissionDenied
    } else if stderr.contains("Cannot delete qdisc with handle of zero")
        || stderr.contains("No such file or directory")
        || stderr.contains("qdisc not found")
    {
        QdiscError::NotPresent(dev.to_string())
    } else {
        QdiscError::Rejected {
            command: format!("tc {}", args.join(" ")),
            stderr: stderr.to_string(),
        }
    }
}
