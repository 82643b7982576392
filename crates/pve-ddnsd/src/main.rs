// # pve-ddnsd
//
// The daemon wiring around the reconciliation engine:
//
// 1. Parse the CLI and load/validate the YAML config file
// 2. Initialize tracing (stderr, or daily-rotated files)
// 3. Build and verify one adapter per provider binding, the platform
//    client and the public-IP resolver
// 4. Wire OS signals to the shutdown token and run the engine
//
// All reconciliation logic lives in pve-ddns-core; this binary only
// assembles it. Configuration is one YAML file (see `config`); credentials
// are verified against the live APIs before the engine starts, so a bad
// token fails the process instead of poisoning the first tick.

mod config;
mod factory;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pve_ddns_core::engine::StopReason;
use pve_ddns_core::shutdown::{self, ShutdownHandle};
use pve_ddns_core::{ProviderBindings, ReconcileEngine, TargetRegistry};
use pve_ddns_platform_proxmox::{PctRuntime, ProxmoxApi};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::config::FileConfig;

/// Keep DNS records pointed at a Proxmox VE host, its guests and this machine
#[derive(Debug, Parser)]
#[command(name = "pve-ddnsd", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "./pve-ddns.yml")]
    config: PathBuf,

    /// Log directory override (daily-rotated files instead of stderr)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown (including `--help`/`--version` and argument errors)
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help, version and argument errors all leave with code 0; the
            // daemon is probed by wrapper scripts that only treat a running
            // process as meaningful
            let _ = e.print();
            return DaemonExitCode::CleanShutdown.into();
        }
    };

    let config = match FileConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return DaemonExitCode::ConfigError.into();
        }
    };

    // the CLI flag wins over the config file
    let log_dir = cli.log_dir.or_else(|| config.general.log.dir.clone());
    let _log_guard = match init_logging(&config.general.log.level, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            return DaemonExitCode::ConfigError.into();
        }
    };

    info!(
        "pve-ddnsd {} starting, config {}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display()
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {e}");
            return DaemonExitCode::RuntimeError.into();
        }
    };

    runtime.block_on(async {
        match run_daemon(config).await {
            Ok(()) => {
                info!("pve-ddnsd stopped");
                DaemonExitCode::CleanShutdown.into()
            }
            Err(e) => {
                error!("startup failed: {e:#}");
                DaemonExitCode::ConfigError.into()
            }
        }
    })
}

/// Assemble the engine and drive it until it stops
///
/// Every error out of here is startup/config class; once the engine runs,
/// failures surface through the log stream and the stop reason instead.
async fn run_daemon(config: FileConfig) -> Result<()> {
    let registry = TargetRegistry::from_spec(&config.targets());
    let timeout = config.http_timeout();

    info!(
        "managing {} target(s) across {} provider binding(s)",
        registry.len(),
        registry.binding_keys().len()
    );

    let mut bindings = ProviderBindings::new();
    for key in registry.binding_keys() {
        let provider = factory::build_provider(&key, timeout)
            .await
            .with_context(|| format!("provider binding {key:?}"))?;
        bindings.insert(key, provider);
    }

    let needs_public_ip = registry.client().is_some();
    let needs_platform = registry.needs_platform();
    let has_guests = !registry.guests().is_empty();

    let (shutdown_handle, shutdown_token) = shutdown::channel();
    spawn_signal_task(shutdown_handle);

    let mut builder = ReconcileEngine::builder(config.engine_settings(), registry, bindings)
        .shutdown(shutdown_token);

    if needs_public_ip {
        // validated at config load: the section exists when the client does
        let public_ip_config = config
            .general
            .public_ip
            .as_ref()
            .context("client target configured but general.public-ip is missing")?;
        builder = builder.public_ip(factory::build_public_ip(public_ip_config, timeout)?);
    }

    if needs_platform {
        let pve = config
            .general
            .pve_api
            .as_ref()
            .context("host/guest targets configured but general.pve-api is missing")?;
        let api = ProxmoxApi::new(
            &pve.host,
            &pve.user,
            &pve.realm,
            &pve.token_id,
            &pve.token_secret,
            timeout,
        )?;
        api.verify()
            .await
            .context("Proxmox VE API verification failed")?;
        builder = builder.platform(Arc::new(api));
    }

    if has_guests {
        builder = builder.containers(Arc::new(PctRuntime::new(timeout)));
    }

    let mut engine = builder.build()?;

    if !config.general.service_mode {
        info!("service mode disabled, running a single reconciliation tick");
        let report = engine.run_once().await;
        if let Some(reason) = report.soft_fatal {
            warn!("single tick finished with a lost address: {reason}");
        }
        return Ok(());
    }

    match engine.run().await {
        StopReason::Cancelled => info!("shutdown signal honored"),
        StopReason::AddressLost(reason) => {
            warn!("stopping after lost required address: {reason}")
        }
    }
    Ok(())
}

/// Route SIGTERM/SIGINT to the shutdown token
fn spawn_signal_task(handle: ShutdownHandle) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!("received {name}, requesting shutdown");
                handle.shutdown();
            }
            Err(e) => {
                // without handlers the only way out is the soft-fatal path
                error!("failed to install signal handlers: {e:#}");
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("SIGINT handler")?;
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    Ok("ctrl-c")
}

/// Initialize the tracing subscriber
///
/// With a log directory, output goes to daily-rotated files through a
/// non-blocking writer; the returned guard must stay alive for the process
/// lifetime or buffered lines are lost on exit. `RUST_LOG` overrides the
/// configured level when set.
fn init_logging(level: &str, dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pve-ddns.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(None)
        }
    }
}
