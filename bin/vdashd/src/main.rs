//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "binary"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Binary entrypoint for the vdash daemon."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use vdash_climate::{ClimateController, ClimateError, ClimateMetrics, ClimatePolicy};
use vdash_common::config::AppConfig;
use vdash_common::logging::init_tracing;
use vdash_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use vdash_remote::{
    CommandReboot, Domain, SharedClient, SimulatedVehicle, TracingSignalSink, VehicleSwitchGate,
};
use vdash_sync::{SyncEngine, SyncMetrics, SyncPolicy, FULL_REFRESH_JOB};

const DEFAULT_CONFIG: &str = "configs/vdash.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "vdash vehicle dashboard daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the dashboard and read button commands from stdin")]
    Run,
    #[command(about = "Load and validate the configuration, then print it")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let config = loaded.config;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("# source: {}", loaded.source.display());
            let rendered = serde_json::to_string_pretty(&config)
                .context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), profile);

            init_tracing("vdashd", &config.logging)?;
            info!(config_path = %loaded.source.display(), "configuration loaded");
            run_daemon(config, registry).await
        }
    }
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let vehicle = Arc::new(
        SimulatedVehicle::from_config(&config.vehicle, &config.simulation)
            .context("invalid simulation settings")?,
    );
    let client: SharedClient = vehicle;
    let sink = Arc::new(TracingSignalSink);
    let engine = SyncEngine::new(
        client.clone(),
        sink.clone(),
        Arc::new(CommandReboot::from_config(&config.reboot)),
        SyncPolicy::from_config(&config.sync),
        Some(SyncMetrics::new(registry.clone())?),
    );
    if let Err(err) = engine
        .update(&[Domain::All], false, Some(FULL_REFRESH_JOB))
        .await
    {
        warn!(error = %err, "initial refresh failed; continuing with scheduled polling");
    }
    engine.start()?;

    let controller = match ClimateController::new(
        client.clone(),
        engine.clone(),
        sink,
        Arc::new(VehicleSwitchGate::new()),
        ClimatePolicy::from_config(&config.climate),
        Some(ClimateMetrics::new(registry)?),
    ) {
        Ok(controller) => Some(controller),
        Err(err @ ClimateError::Compatibility { .. }) => {
            warn!(error = %err, "climate controls disabled");
            None
        }
        Err(err) => return Err(err.into()),
    };

    info!(vehicle = %client.vehicle().display_name(), "dashboard running; commands: start, stop, switch, temp <celsius>, status, quit");
    tokio::select! {
        result = console(&engine, controller.as_ref()) => result?,
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; shutting down");
        }
    }

    engine.shutdown();
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Console stand-in for the dashboard buttons. Returns on `quit` or EOF.
async fn console(engine: &SyncEngine, controller: Option<&ClimateController>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        match (command, controller) {
            ("quit" | "exit", _) => break,
            ("status", _) => print_status(engine, controller),
            ("start" | "stop" | "switch" | "temp", None) => {
                println!("climate controls are not available for this vehicle");
            }
            ("start", Some(controller)) => report(controller.start().await),
            ("stop", Some(controller)) => report(controller.stop().await),
            ("switch", Some(controller)) => report(controller.switch().await),
            ("temp", Some(controller)) => match words.next().map(str::parse::<f64>) {
                Some(Ok(celsius)) => match controller.set_temperature(celsius).await {
                    Ok(()) => println!("target temperature set to {celsius:.1} °C"),
                    Err(err) => println!("error: {err}"),
                },
                _ => println!("usage: temp <celsius>"),
            },
            (other, _) => println!("unknown command '{other}'"),
        }
    }
    Ok(())
}

fn report(result: vdash_climate::Result<u64>) {
    match result {
        Ok(epoch) => println!("command sent (epoch {epoch})"),
        Err(err) => println!("error: {err}"),
    }
}

fn print_status(engine: &SyncEngine, controller: Option<&ClimateController>) {
    let state = engine.state();
    println!(
        "sync: paused={} skips={} restarts={}",
        state.paused, state.skip_count, state.restart_count
    );
    for job in engine.jobs() {
        println!(
            "  job {:<26} every {:>5}s running={} silent={}",
            job.id,
            job.interval.as_secs(),
            job.running,
            job.silent
        );
    }
    if let Some(controller) = controller {
        println!(
            "climate: {} target={:.1} °C gate={:?}",
            controller.climate_state(),
            controller.target_temperature(),
            controller.gate()
        );
        if let Some(request) = controller.correlated_request() {
            println!("  tracking {} ({})", request.id, request.status);
        }
    }
}
