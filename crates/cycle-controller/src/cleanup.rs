//! Guaranteed removal of shaping when the controller stops

use condition_sync::{report, ConditionSink, SyncMessage};
use network_sim::{QdiscError, QdiscManager, TcBackend, Teardown};
use std::sync::Arc;
use tracing::{info, warn};

/// Tear down `interface` and report that no condition is active
pub async fn finalize<B: TcBackend>(
    manager: &QdiscManager<B>,
    sink: &dyn ConditionSink,
    interface: &str,
) -> Result<Teardown, QdiscError> {
    let teardown = manager.teardown(interface).await;
    match &teardown {
        Ok(Teardown::Removed) => info!("Removed traffic control from {}", interface),
        Ok(Teardown::AlreadyClean) => info!("No traffic control left on {}", interface),
        Err(e) => warn!("Failed to reset traffic control on {}: {}", interface, e),
    }
    report(sink, &SyncMessage::none()).await;
    teardown
}

/// RAII guard removing the root qdisc if the async finalizer never ran
pub struct ShapingGuard<B: TcBackend> {
    manager: Arc<QdiscManager<B>>,
    interface: String,
    armed: bool,
}

impl<B: TcBackend> ShapingGuard<B> {
    pub fn new(manager: Arc<QdiscManager<B>>, interface: impl Into<String>) -> Self {
        Self {
            manager,
            interface: interface.into(),
            armed: true,
        }
    }

    /// The finalizer has run; nothing left to do on drop
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<B: TcBackend> Drop for ShapingGuard<B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Best-effort: blocking delete, no runtime needed
        match self.manager.teardown_blocking(&self.interface) {
            Ok(_) => warn!("Removed traffic control from {} during unwind", self.interface),
            Err(e) => warn!(
                "Could not remove traffic control from {} during unwind: {}",
                self.interface, e
            ),
        }
    }
}
