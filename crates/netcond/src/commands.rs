//! CLI command implementations for the condition controller
//!
//! This module contains the implementations of all CLI commands,
//! kept apart from main.rs so argument parsing stays declarative.

use crate::{SyncArgs, TargetArgs};
use anyhow::{Context, Result};
use condition_sync::Collector;
use cycle_controller::{
    cancel_on_signals, CancellationToken, CollectorConfig, ControllerConfig, CycleScheduler,
};
use network_sim::preflight::preflight;
use network_sim::{
    Hierarchy, InterfaceChoice, InterfaceResolver, IpCommand, ObservedHierarchy, Prompt,
    QdiscManager, Teardown,
};
use scenarios::{PresetId, Presets, Schedule};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Implementation of the 'run' command - cycles presets until interrupted
pub async fn cmd_run(
    target: TargetArgs,
    sync: SyncArgs,
    dwell_secs: u64,
    presets: Vec<PresetId>,
) -> Result<()> {
    let config = ControllerConfig {
        dwell_secs,
        presets,
        ..controller_config(target, Some(sync))
    };
    // Validate before touching the interface
    let schedule = config.schedule()?;
    drive(&config, schedule).await
}

/// Implementation of the 'stable' command - holds the layered profile
pub async fn cmd_stable(target: TargetArgs, sync: SyncArgs) -> Result<()> {
    let config = controller_config(target, Some(sync));
    drive(&config, Schedule::stable()).await
}

/// Implementation of the 'reset' command - removes all shaping
pub async fn cmd_reset(target: TargetArgs) -> Result<()> {
    preflight().await?;
    let interface = resolve_interface(&controller_config(target, None).interface_choice()).await?;

    match QdiscManager::new().teardown(&interface).await? {
        Teardown::Removed => println!("Removed traffic control from {}", interface),
        Teardown::AlreadyClean => println!("No traffic control on {}", interface),
    }
    Ok(())
}

/// Implementation of the 'show' command - prints the installed hierarchy
pub async fn cmd_show(target: TargetArgs) -> Result<()> {
    let interface = resolve_interface(&controller_config(target, None).interface_choice()).await?;
    let observed = QdiscManager::new().query(&interface).await?;
    println!("{}: {}", interface, describe(&observed));
    Ok(())
}

/// Implementation of the 'list' command - shows the preset catalog
pub fn cmd_list(json: bool) -> Result<()> {
    let catalog = Presets::catalog();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    println!("Available presets (cycle order):");
    println!("================================");
    for preset in &catalog {
        println!(
            "  {:<10} rate {:<8} delay {:<8} loss {:<5}{}",
            preset.name(),
            preset.rate().to_string(),
            preset.delay().to_string(),
            preset.loss().to_string(),
            if preset.is_layered() { " (layered)" } else { "" }
        );
    }
    println!("\nStable mode holds {}.", Presets::stable().name());

    Ok(())
}

/// Implementation of the 'collector' command - records reported conditions
pub async fn cmd_collector(bind: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind, port))?;
    let collector = Collector::new();

    collector
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupted by user");
        })
        .await?;

    info!("Collector shut down");
    Ok(())
}

fn controller_config(target: TargetArgs, sync: Option<SyncArgs>) -> ControllerConfig {
    let collector = sync
        .filter(|s| !s.no_sync)
        .and_then(|s| {
            Some(CollectorConfig {
                host: s.collector_host?,
                port: s.collector_port,
                timeout_ms: s.sync_timeout_ms,
            })
        });
    ControllerConfig {
        interface: target.interface,
        confirm_interface: target.confirm,
        collector,
        ..ControllerConfig::default()
    }
}

/// Preflight, resolve, then run the scheduler until a signal arrives
async fn drive(config: &ControllerConfig, schedule: Schedule) -> Result<()> {
    preflight().await?;
    let interface = resolve_interface(&config.interface_choice()).await?;
    info!("Using interface {}", interface);

    let sink = config.sink()?;
    let manager = Arc::new(QdiscManager::new());
    let cancel = CancellationToken::new();
    let signals = cancel_on_signals(cancel.clone()).context("Failed to install signal handlers")?;

    let result = CycleScheduler::new(manager, sink, interface, schedule)
        .run(cancel.clone())
        .await;

    cancel.cancel();
    let _ = signals.await;
    result?;
    Ok(())
}

async fn resolve_interface(choice: &InterfaceChoice) -> Result<String> {
    let resolver = InterfaceResolver::with_parts(IpCommand::new(), StdinPrompt);
    Ok(resolver.resolve(choice).await?)
}

/// Human-readable summary of an observed hierarchy
fn describe(observed: &ObservedHierarchy) -> String {
    let known = Presets::catalog().into_iter().find(|preset| {
        match (Hierarchy::for_preset(preset), observed) {
            (Hierarchy::Flat(wanted), ObservedHierarchy::Flat(netem)) => wanted.matches(netem),
            (Hierarchy::Layered(profile), ObservedHierarchy::Layered(layers)) => {
                layers.matches(&profile)
            }
            _ => false,
        }
    });
    let suffix = known
        .map(|preset| format!(" [{}]", preset.name()))
        .unwrap_or_default();

    match observed {
        ObservedHierarchy::None => "no shaping (kernel default queueing)".to_string(),
        ObservedHierarchy::Flat(netem) => format!(
            "flat netem rate {} delay {} loss {}{}",
            netem
                .rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unlimited".to_string()),
            netem.delay,
            netem.loss,
            suffix
        ),
        ObservedHierarchy::Layered(layers) => format!(
            "layered htb class {} netem {} sfq {} port filter {}{}",
            layers
                .class_rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "missing".to_string()),
            layers
                .netem
                .as_ref()
                .map(|n| format!("delay {}", n.delay))
                .unwrap_or_else(|| "missing".to_string()),
            if layers.fair_queue { "present" } else { "missing" },
            layers
                .steered_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "missing".to_string()),
            suffix
        ),
        ObservedHierarchy::Foreign(kind) => format!("foreign root qdisc {}", kind),
    }
}

/// Reads answers from the terminal; end of input declines
struct StdinPrompt;

impl StdinPrompt {
    fn ask(question: &str) -> Option<String> {
        print!("{}", question);
        io::stdout().flush().ok()?;
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer.trim().to_string()),
        }
    }
}

impl Prompt for StdinPrompt {
    fn confirm(&self, interface: &str) -> bool {
        match Self::ask(&format!("Use detected interface {}? [Y/n] ", interface)) {
            Some(answer) => answer.is_empty() || answer.eq_ignore_ascii_case("y"),
            None => false,
        }
    }

    fn choose(&self, available: &[String]) -> Option<String> {
        let answer = if available.is_empty() {
            Self::ask("Enter interface name: ")?
        } else {
            println!("Available interfaces:");
            for (i, name) in available.iter().enumerate() {
                println!("  {}) {}", i + 1, name);
            }
            Self::ask(&format!("Select interface [1-{}]: ", available.len()))?
        };
        pick_interface(available, &answer)
    }
}

/// Map a typed answer to an interface: a 1-based index or a listed name.
///
/// With nothing listed any non-empty name is taken as is; the resolver
/// validates it afterwards.
fn pick_interface(available: &[String], answer: &str) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if available.is_empty() {
        return Some(answer.to_string());
    }
    match answer.parse::<usize>() {
        Ok(n) if (1..=available.len()).contains(&n) => Some(available[n - 1].clone()),
        _ => available.iter().find(|name| name.as_str() == answer).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetArgs {
        TargetArgs {
            interface: Some("eth0".to_string()),
            confirm: false,
        }
    }

    fn sync(host: Option<&str>, no_sync: bool) -> SyncArgs {
        SyncArgs {
            collector_host: host.map(String::from),
            collector_port: 9000,
            sync_timeout_ms: 500,
            no_sync,
        }
    }

    #[test]
    fn test_sync_disabled_without_collector_host() {
        let config = controller_config(target(), Some(sync(None, false)));
        assert_eq!(config.collector, None);
        assert_eq!(config.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_collector_host_enables_sync() {
        let config = controller_config(target(), Some(sync(Some("10.0.0.2"), false)));
        assert_eq!(
            config.collector,
            Some(CollectorConfig {
                host: "10.0.0.2".to_string(),
                port: 9000,
                timeout_ms: 500,
            })
        );
    }

    #[test]
    fn test_pick_interface_by_index_or_name() {
        let available = vec!["eth0".to_string(), "wlan0".to_string()];
        assert_eq!(pick_interface(&available, "2"), Some("wlan0".to_string()));
        assert_eq!(pick_interface(&available, " eth0 "), Some("eth0".to_string()));
        assert_eq!(pick_interface(&available, "3"), None);
        assert_eq!(pick_interface(&available, "enp3s0"), None);
        assert_eq!(pick_interface(&available, ""), None);
    }

    #[test]
    fn test_pick_interface_without_listing_takes_typed_name() {
        assert_eq!(pick_interface(&[], "enp3s0"), Some("enp3s0".to_string()));
        assert_eq!(pick_interface(&[], "  "), None);
    }

    #[test]
    fn test_no_sync_overrides_collector_host() {
        let config = controller_config(target(), Some(sync(Some("10.0.0.2"), true)));
        assert_eq!(config.collector, None);
    }
}
