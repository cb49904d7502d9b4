//! Network condition controller CLI
//!
//! This tool shapes a network interface with tc presets, cycling through the
//! catalog or holding the layered low-latency profile, and reports each
//! commanded condition to a settings collector.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{cmd_collector, cmd_list, cmd_reset, cmd_run, cmd_show, cmd_stable};
use scenarios::PresetId;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Which interface to shape
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Interface name; detected from the default route when omitted
    #[arg(short, long, env = "NETCOND_INTERFACE")]
    pub interface: Option<String>,

    /// Ask before using a detected interface
    #[arg(long)]
    pub confirm: bool,
}

/// Where to report the commanded condition
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Collector host; conditions are not reported when omitted
    #[arg(long, env = "NETCOND_COLLECTOR_HOST")]
    pub collector_host: Option<String>,

    /// Collector port
    #[arg(long, env = "NETCOND_COLLECTOR_PORT", default_value_t = condition_sync::DEFAULT_COLLECTOR_PORT)]
    pub collector_port: u16,

    /// Give up on a sync request after this many milliseconds
    #[arg(long, default_value_t = 2000)]
    pub sync_timeout_ms: u64,

    /// Do not report conditions to any collector
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cycle through the condition presets until interrupted
    Run {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        sync: SyncArgs,

        /// Seconds each preset stays active
        #[arg(long, env = "NETCOND_DWELL_SECS", default_value_t = 20)]
        dwell_secs: u64,

        /// Comma-separated subset of presets (kept in catalog order)
        #[arg(long, value_delimiter = ',')]
        presets: Vec<PresetId>,
    },

    /// Apply the layered low-latency profile and hold it until interrupted
    Stable {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Remove all shaping from the interface
    Reset {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the hierarchy currently installed on the interface
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List the condition presets in cycle order
    List {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a settings collector that records the reported condition
    Collector {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on
        #[arg(long, env = "NETCOND_COLLECTOR_PORT", default_value_t = condition_sync::DEFAULT_COLLECTOR_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            target,
            sync,
            dwell_secs,
            presets,
        } => {
            cmd_run(target, sync, dwell_secs, presets).await?;
        }
        Commands::Stable { target, sync } => {
            cmd_stable(target, sync).await?;
        }
        Commands::Reset { target } => {
            cmd_reset(target).await?;
        }
        Commands::Show { target } => {
            cmd_show(target).await?;
        }
        Commands::List { json } => {
            cmd_list(json)?;
        }
        Commands::Collector { bind, port } => {
            cmd_collector(&bind, port).await?;
        }
    }

    Ok(())
}
