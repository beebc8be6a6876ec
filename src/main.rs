//! Reqprof server binary
//!
//! A demonstration HTTP server that optionally records CPU and heap
//! profiles for every request it serves.

use clap::{Arg, ArgAction, Command};
use reqprof::api::{start_server, AppState};
use reqprof::core::Config;
use reqprof::profiler::{lag, PprofBackend, RequestProfiler};
use reqprof::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("reqprof")
        .version(reqprof::VERSION)
        .about("HTTP server with per-request CPU and heap profiling.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("http-addr")
                .long("http-addr")
                .value_name("ADDR")
                .help("HTTP server bind address"),
        )
        .arg(
            Arg::new("profiles-dir")
                .long("profiles-dir")
                .value_name("DIR")
                .help("Directory that receives profile artifacts"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("enable-profiling")
                .long("enable-profiling")
                .action(ArgAction::SetTrue)
                .help("Enable per-request profiling and the lag monitor"),
        )
        .get_matches();

    // Load configuration: file, then environment, then CLI flags
    let mut config = Config::load_with(
        matches
            .get_one::<String>("config")
            .map(std::path::Path::new),
    )?;

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting {} v{}", reqprof::NAME, reqprof::VERSION);

    // Create the profiles directory once at startup; artifacts and the
    // listing endpoint both expect it to exist from here on.
    std::fs::create_dir_all(&config.profiling.profiles_dir).map_err(|e| {
        reqprof::Error::config(format!(
            "Cannot create profiles directory {:?}: {}",
            config.profiling.profiles_dir, e
        ))
    })?;
    let profiles_dir = std::fs::canonicalize(&config.profiling.profiles_dir)?;

    let state = build_state(&config, profiles_dir.clone());

    let lag_monitor = if config.profiling.enabled {
        info!(
            "Profiling is enabled. Profile artifacts will be saved in {:?}",
            profiles_dir
        );
        Some(lag::spawn(config.profiling.lag_interval))
    } else {
        info!("Profiling is disabled. Set ENABLE_PROFILING=true to enable.");
        None
    };

    // Run until a shutdown signal arrives
    start_server(config.server.http_addr, state, shutdown_signal()).await?;

    warn!("Received shutdown signal, shutting down");
    if let Some(handle) = lag_monitor {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(addr) = matches.get_one::<String>("http-addr") {
        config.server.http_addr = addr
            .parse()
            .map_err(|e| reqprof::Error::config(format!("Invalid HTTP address: {}", e)))?;
    }

    if let Some(dir) = matches.get_one::<String>("profiles-dir") {
        config.profiling.profiles_dir = PathBuf::from(dir);
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    if matches.get_flag("enable-profiling") {
        config.profiling.enabled = true;
    }

    Ok(())
}

/// Construct shared state, wiring up the profiler stack when enabled
fn build_state(config: &Config, profiles_dir: PathBuf) -> AppState {
    let profiler = config.profiling.enabled.then(|| {
        let backend = Arc::new(PprofBackend::new(config.profiling.cpu_frequency));
        Arc::new(RequestProfiler::new(backend, profiles_dir.clone()))
    });

    AppState {
        profiles_dir,
        profiler,
    }
}

/// Resolve when a shutdown signal arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
