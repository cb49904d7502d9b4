//! Controller configuration

use crate::ControllerError;
use condition_sync::{ConditionSink, NullSink, SyncClient, DEFAULT_COLLECTOR_PORT, DEFAULT_SYNC_TIMEOUT};
use network_sim::InterfaceChoice;
use scenarios::{PresetId, Presets, Schedule, DEFAULT_DWELL};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Where and how to report the commanded condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_COLLECTOR_PORT,
            timeout_ms: DEFAULT_SYNC_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Settings for one controller run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Interface to shape; `None` detects the default-route interface
    pub interface: Option<String>,
    /// Ask before using a detected interface
    pub confirm_interface: bool,
    pub dwell_secs: u64,
    /// Presets to cycle, kept in catalog order; empty means all
    pub presets: Vec<PresetId>,
    /// Collector to report to; `None` disables synchronization
    pub collector: Option<CollectorConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interface: None,
            confirm_interface: false,
            dwell_secs: DEFAULT_DWELL.as_secs(),
            presets: Vec::new(),
            collector: None,
        }
    }
}

impl ControllerConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }

    pub fn interface_choice(&self) -> InterfaceChoice {
        match &self.interface {
            Some(name) => InterfaceChoice::Explicit(name.clone()),
            None => InterfaceChoice::Auto {
                confirm: self.confirm_interface,
            },
        }
    }

    /// Cycle schedule over the selected presets
    pub fn schedule(&self) -> Result<Schedule, ControllerError> {
        if self.dwell_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "dwell interval must be at least one second".to_string(),
            ));
        }
        let presets = if self.presets.is_empty() {
            Presets::catalog()
        } else {
            Presets::select(&self.presets)
        };
        if presets.is_empty() {
            return Err(ControllerError::EmptySchedule);
        }
        Ok(Schedule::Cycle {
            presets,
            dwell: self.dwell(),
        })
    }

    /// Sink for sync messages: the HTTP client, or a no-op without a collector
    pub fn sink(&self) -> Result<Arc<dyn ConditionSink>, ControllerError> {
        match &self.collector {
            Some(collector) => Ok(Arc::new(SyncClient::new(
                &collector.host,
                collector.port,
                Duration::from_millis(collector.timeout_ms),
            )?)),
            None => Ok(Arc::new(NullSink)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_cycles_full_catalog() {
        let config = ControllerConfig::default();
        assert_eq!(config.dwell(), Duration::from_secs(20));
        assert_eq!(
            config.interface_choice(),
            InterfaceChoice::Auto { confirm: false }
        );
        match config.schedule().unwrap() {
            Schedule::Cycle { presets, dwell } => {
                assert_eq!(presets.len(), 6);
                assert_eq!(dwell, Duration::from_secs(20));
            }
            other => panic!("unexpected schedule {:?}", other),
        }
    }

    #[test]
    fn test_selected_presets_keep_catalog_order() {
        let config = ControllerConfig {
            presets: vec![PresetId::Excellent, PresetId::Poor],
            ..Default::default()
        };
        match config.schedule().unwrap() {
            Schedule::Cycle { presets, .. } => {
                let names: Vec<_> = presets.iter().map(|p| p.name()).collect();
                assert_eq!(names, ["Poor", "Excellent"]);
            }
            other => panic!("unexpected schedule {:?}", other),
        }
    }

    #[test]
    fn test_zero_dwell_is_rejected() {
        let config = ControllerConfig {
            dwell_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.schedule(),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{"interface": "eth1", "dwell_secs": 5, "presets": ["Poor", "Ultra"],
                "collector": {"host": "10.0.0.2"}}"#,
        )
        .unwrap();
        assert_eq!(config.interface_choice(), InterfaceChoice::Explicit("eth1".into()));
        assert_eq!(config.dwell(), Duration::from_secs(5));
        assert_eq!(config.presets, [PresetId::Poor, PresetId::Ultra]);
        let collector = config.collector.unwrap();
        assert_eq!(collector.host, "10.0.0.2");
        assert_eq!(collector.port, 8765);
        assert_eq!(collector.timeout_ms, 2000);
    }
}
