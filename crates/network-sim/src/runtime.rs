//! Preset application
//!
//! Bridges the preset catalog to the hierarchy manager: a preset is turned
//! into its hierarchy descriptor, applied, and the result logged.

use log::info;
use scenarios::Preset;

use crate::backend::TcBackend;
use crate::qdisc::{ApplyOutcome, Hierarchy, QdiscManager};
use crate::types::QdiscError;

/// Apply `preset` to `interface`
pub async fn apply_preset<B: TcBackend>(
    qdisc_manager: &QdiscManager<B>,
    interface: &str,
    preset: &Preset,
) -> Result<ApplyOutcome, QdiscError> {
    let hierarchy = Hierarchy::for_preset(preset);
    let outcome = qdisc_manager.apply(interface, &hierarchy).await?;

    info!("Applied {} to {} ({})", preset, interface, outcome);

    Ok(outcome)
}

#[cfg(all(test, feature = "test-utils"))]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use scenarios::{PresetId, Presets};

    #[tokio::test]
    async fn test_apply_preset_then_repeat_is_unchanged() {
        let backend = MemoryBackend::with_devices(&["veth0"]);
        let qdisc_manager = QdiscManager::with_backend(backend.clone());
        let poor = Presets::get(PresetId::Poor);

        let first = apply_preset(&qdisc_manager, "veth0", &poor).await.unwrap();
        assert_eq!(first, ApplyOutcome::Created);

        backend.clear_commands();
        let second = apply_preset(&qdisc_manager, "veth0", &poor).await.unwrap();
        assert_eq!(second, ApplyOutcome::Unchanged);
        assert!(backend.commands().is_empty());
    }

    #[tokio::test]
    async fn test_apply_preset_missing_interface_is_fatal() {
        let qdisc_manager = QdiscManager::with_backend(MemoryBackend::default());
        let err = apply_preset(&qdisc_manager, "if_not_exist_zzz", &Presets::stable())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
