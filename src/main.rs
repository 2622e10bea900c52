//! Capture agent
//!
//! Hooks TLS libraries and bash with eBPF uprobes:
//! - TLS session secrets written as an NSS key log
//! - Link-layer capture with embedded session keys (pcapng)
//! - Shell commands with their return value

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture_agent::{init_probe, Config, Dependencies, Probe, ProbeKind, ProbeManager};

#[derive(Parser, Debug)]
#[command(name = "capture-agent")]
#[command(about = "Certificate-free TLS and shell capture agent")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/capture-agent/agent.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Probe to run
    #[arg(value_enum)]
    probe: ProbeKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting capture agent");

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    info!(
        pid = config.global.pid,
        uid = config.global.uid,
        filters = config.global.filters_enabled,
        "Configuration loaded"
    );

    // Check for root privileges (required for eBPF)
    if !is_root() {
        warn!("Running without root privileges - probes will likely fail to attach");
    }

    let deps = Dependencies::from_config(&config);
    let mut probe = init_probe(args.probe, Arc::new(config), deps)
        .with_context(|| format!("Failed to initialize {:?} probe", args.probe))?;
    probe
        .start()
        .with_context(|| format!("Failed to start {} probe", probe.name()))?;

    let probe: Arc<dyn Probe> = Arc::from(probe);
    let outcome = match ProbeManager::new(probe.clone()) {
        Ok(mut manager) => {
            info!("Capture agent running - press Ctrl+C to stop");
            manager.run().await
        }
        Err(e) => Err(e),
    };

    probe.close().context("Failed to close probe")?;
    outcome.context("Event loop failed")?;
    Ok(())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}
