//! BrewBuddy Daemon (brewbuddyd)
//!
//! Runs fermentation temperature control for every active batch and serves
//! a local control socket for status queries and manual relay commands.
//!
//! # Lifecycle
//! - Restrictive umask, logging (journald when available)
//! - Settings: defaults, JSON file, `BREWBUDDY_*` environment overrides
//! - Physical mode: 1-wire kernel modules loaded best-effort
//! - Controller thread started, then the socket server
//! - SIGINT/SIGTERM: server stops, every relay is switched off, hardware is
//!   released and the socket removed

mod server;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use bb_core::constants::paths;
use bb_core::constants::w1::KERNEL_MODULES;
use bb_core::{
    ControllerSettings, HardwareManager, HardwareMode, JsonStore, RecordStore,
    TemperatureController,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter environment variable
const LOG_ENV: &str = "BREWBUDDY_LOG";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct CliOptions {
    config: Option<PathBuf>,
    socket: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
enum CliAction {
    Run(CliOptions),
    Help,
    Version,
}

fn parse_args<I>(args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "-v" | "--version" => return Ok(CliAction::Version),
            "-c" | "--config" => {
                let path = args.next().ok_or("--config requires a path argument")?;
                options.config = Some(PathBuf::from(path));
            }
            "-s" | "--socket" => {
                let path = args.next().ok_or("--socket requires a path argument")?;
                options.socket = Some(PathBuf::from(path));
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    Ok(CliAction::Run(options))
}

fn help_text() -> String {
    let system_settings = Path::new(paths::CONFIG_DIR).join(paths::SETTINGS_FILE);
    format!(
        "brewbuddyd {version} - fermentation temperature control daemon

USAGE:
    brewbuddyd [OPTIONS]

OPTIONS:
    -c, --config PATH   Settings file (default: {system}, then the user config dir)
    -s, --socket PATH   Control socket path (overrides settings)
    -v, --version       Print version
    -h, --help          Print this help

ENVIRONMENT:
    BREWBUDDY_LOG              Log filter (trace, debug, info, warn, error)
    BREWBUDDY_HARDWARE_MODE    simulated or physical
    BREWBUDDY_CONTROL_INTERVAL Seconds between control ticks
    BREWBUDDY_HYSTERESIS       Deadband half-width in degrees C
    BREWBUDDY_SENSOR_TIMEOUT   Seconds before a silent probe forces relays off
    BREWBUDDY_STORE_PATH       Record store JSON file
    BREWBUDDY_SOCKET           Control socket path",
        version = VERSION,
        system = system_settings.display(),
    )
}

fn print_help() {
    eprintln!("{}", help_text());
}

// ============================================================================
// Process setup
// ============================================================================

fn set_secure_umask() {
    // SAFETY: umask only replaces the process file creation mask.
    unsafe { libc::umask(0o077) };
}

/// Install the tracing subscriber; returns true when logging to the journal
fn init_logging() -> bool {
    use tracing_subscriber::prelude::*;

    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());

    if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();
    false
}

fn warn_if_unprivileged() {
    // SAFETY: geteuid has no preconditions.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!(euid, "Not running as root; GPIO and 1-wire access may be denied");
    }
}

/// Load the 1-wire bus and thermometer drivers if they are not loaded yet
fn load_w1_modules() {
    for module in KERNEL_MODULES {
        let sysfs_name = module.replace('-', "_");
        if Path::new("/sys/module").join(&sysfs_name).exists() {
            debug!("Module {} already loaded", module);
            continue;
        }

        match Command::new("modprobe").arg(module).output() {
            Ok(output) if output.status.success() => info!("Loaded kernel module: {}", module),
            Ok(output) => warn!(
                "modprobe {} failed: {}",
                module,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Could not run modprobe for {}: {}", module, e),
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGNAL: SIGINT received"),
                _ = terminate.recv() => info!("SIGNAL: SIGTERM received"),
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}; only SIGINT will stop the daemon", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            info!("SIGNAL: SIGINT received");
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!("PANIC at {}: {}", location, panic_info);
    }));

    set_secure_umask();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(options)) => options,
        Ok(CliAction::Help) => {
            print_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("brewbuddyd {}", VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let journald = init_logging();
    info!("STARTUP: brewbuddyd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    let mut settings = match ControllerSettings::load(options.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid settings: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(socket) = options.socket {
        settings.server.socket_path = socket;
    }

    if settings.hardware.mode == HardwareMode::Physical {
        warn_if_unprivileged();
        load_w1_modules();
    }

    let hardware = match HardwareManager::from_settings(&settings.hardware) {
        Ok(h) => Arc::new(h),
        Err(e) => {
            error!("Hardware initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn RecordStore> = Arc::new(JsonStore::new(
        settings.store.path.clone(),
        settings.store.temperature_log.clone(),
    ));
    info!(
        store = %settings.store.path.display(),
        temperature_log = %settings.store.temperature_log.display(),
        "STARTUP: Record store ready"
    );

    let controller = Arc::new(TemperatureController::new(
        hardware,
        store,
        settings.control.clone(),
    ));
    if let Err(e) = controller.start() {
        error!("Failed to start temperature controller: {}", e);
        controller.stop();
        std::process::exit(1);
    }

    let result =
        server::run_server(&settings.server.socket_path, Arc::clone(&controller), shutdown_signal())
            .await;

    info!("SHUTDOWN: Stopping temperature controller");
    let stopping = Arc::clone(&controller);
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.stop()).await {
        error!("Controller stop task failed: {}", e);
        controller.stop();
    }

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: brewbuddyd stopped");
    Ok(())
}
