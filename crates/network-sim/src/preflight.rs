//! Checks that must pass before touching any interface

use crate::types::PreflightError;
use log::debug;
use nix::unistd::geteuid;
use tokio::process::Command;

/// Require an effective uid of 0
pub fn ensure_root() -> Result<(), PreflightError> {
    let euid = geteuid();
    if euid.is_root() {
        Ok(())
    } else {
        Err(PreflightError::NotRoot(euid.as_raw()))
    }
}

/// Require a working `tc` binary
pub async fn ensure_tc_available() -> Result<(), PreflightError> {
    let output = Command::new("tc")
        .arg("-V")
        .output()
        .await
        .map_err(|e| PreflightError::TcUnavailable(e.to_string()))?;
    if !output.status.success() {
        return Err(PreflightError::TcUnavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
    Ok(())
}

/// Both checks, root first
pub async fn preflight() -> Result<(), PreflightError> {
    ensure_root()?;
    ensure_tc_available().await
}
