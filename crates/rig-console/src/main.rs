use anyhow::Result;
use clap::Parser;
use rig_console::{CliArgs, CliCommand, ConsoleConfig, console, telemetry};
use tracing::{debug, warn};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    let config = ConsoleConfig::from_cli(&args)?;

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();
    let _span = tracing::info_span!("rig.console", backend = ?config.backend).entered();
    if let Ok(json) = serde_json::to_string(&config) {
        debug!("configuration: {json}");
    }

    let outcome = match args.command {
        Some(CliCommand::Probe) => console::probe(&config),
        None => console::run(config.clone()),
    };

    if let Some(path) = &config.telemetry.metrics_dump_path {
        if let Err(err) = telemetry::write_metrics_snapshot(path) {
            warn!("{err:#}");
        }
    }
    outcome
}
