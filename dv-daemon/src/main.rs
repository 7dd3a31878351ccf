//! deckvolt Daemon (deckvoltd)
//!
//! Privileged service that undervolts each Steam Deck core according to its
//! load and, optionally, drives the fan from a temperature curve.
//!
//! # Safety Model
//! - **Envelope**: offsets never go above 0 mV or below the configured floor
//! - **Ramp**: each hardware change moves a core by at most the ramp step
//! - **Reset**: every exit path (signal, watchdog stall, fault, panic) resets
//!   all cores to 0 mV and returns the fan to firmware control, once
//! - **Watchdog**: a plain thread resets hardware if the control loop stalls
//!
//! # Output
//! - stdout: JSON-lines status stream
//! - journald (or stderr): logs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use dv_core::constants::{exit_codes, paths, timing};
use dv_core::{DaemonConfig, FanCurve, FanGovernorSettings, HwmonFanPaths, ProcStatSource};
use dv_error::DeckvoltError;
use dv_protocol::ShutdownReason;

use dv_daemon::actuator::{ActuationGate, RyzenadjActuator, VoltageActuator};
use dv_daemon::cli::Cli;
use dv_daemon::fan_control::{FanController, FanDevice, FanModeCell, FanRelease, HwmonFan};
use dv_daemon::logging;
use dv_daemon::orchestrator::{control_channels, Orchestrator, OrchestratorParts};
use dv_daemon::output::StatusEmitter;
use dv_daemon::shutdown::{self, SafeShutdown};
use dv_daemon::signals::spawn_signal_listener;
use dv_daemon::watchdog::{Heartbeat, Watchdog};
use dv_daemon::VERSION;

// ============================================================================
// Security
// ============================================================================

/// Verify we're running as root
fn verify_privileges() -> Result<(), DeckvoltError> {
    // SAFETY: geteuid and getuid are always safe - they just return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err(DeckvoltError::PermissionDenied(format!(
            "daemon must run as root (euid=0) to apply voltage offsets, running as euid={}",
            euid
        )));
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }

    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

// ============================================================================
// Hardware setup
// ============================================================================

/// Build the fan controller when fan control is enabled
///
/// A missing or unusable fan is not fatal; the firmware keeps control.
fn setup_fan(config: &DaemonConfig) -> anyhow::Result<Option<FanController>> {
    if !config.fan.enabled {
        return Ok(None);
    }

    let device = match &config.fan.hwmon_path {
        Some(dir) => HwmonFan::new(HwmonFanPaths::in_dir(dir.clone())),
        None => HwmonFan::discover(Path::new(paths::HWMON_BASE)),
    };
    let device = match device {
        Ok(device) => device,
        Err(e) => {
            warn!("Fan control requested but no fan found: {} - leaving firmware in control", e);
            return Ok(None);
        }
    };
    info!("STARTUP: Fan device: {}", device.describe());

    let curve = FanCurve::new(config.fan.curve.clone()).context("invalid fan curve")?;
    let release = Arc::new(FanRelease::new(Arc::new(device), FanModeCell::default()));
    Ok(Some(FanController::new(
        curve,
        FanGovernorSettings::from(&config.fan),
        release,
    )))
}

fn install_panic_hook(shutdown: Arc<SafeShutdown>) {
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
        error!("PANIC at {}: {}", location, message);

        shutdown.run(ShutdownReason::Panic);
        std::process::exit(exit_codes::FAULT);
    }));
}

fn start_watchdog(config: &DaemonConfig, heartbeat: Arc<Heartbeat>, shutdown: Arc<SafeShutdown>) -> std::io::Result<Watchdog> {
    Watchdog::spawn(
        heartbeat,
        Duration::from_secs(config.watchdog_timeout_secs),
        timing::WATCHDOG_POLL,
        Box::new(move |silence| {
            if shutdown.run(ShutdownReason::WatchdogStall) {
                error!("WATCHDOG: Exiting after {} ms stall", silence.as_millis());
                std::process::exit(exit_codes::WATCHDOG);
            }
            info!("WATCHDOG: Shutdown already in progress");
        }),
    )
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // PHASE 0: Parse arguments
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::OK,
                _ => exit_codes::CONFIG,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let verbose = cli.verbose;

    // PHASE 1: Build and validate configuration before touching hardware
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(exit_codes::CONFIG);
        }
    };

    // PHASE 2: Logging (journald or stderr; stdout is the status stream)
    let sink = logging::init(verbose);
    info!("STARTUP: deckvoltd {} starting", VERSION);
    info!("STARTUP: Logging to {}", sink.describe());
    info!(
        "STARTUP: Strategy {} on {} cores, floor {} mV, ramp {} mV/tick",
        config.strategy.as_str(),
        config.cores.len(),
        config.safety_floor_mv,
        config.ramp_step_mv
    );

    // PHASE 3: Privilege check
    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(exit_codes::NOT_ROOT);
    }

    // PHASE 4: Locate the voltage actuator
    let actuator = match RyzenadjActuator::locate(&config.actuator_path) {
        Ok(actuator) => actuator,
        Err(e) => {
            error!("{}", e);
            std::process::exit(exit_codes::ACTUATOR_MISSING);
        }
    };
    info!("STARTUP: Actuator: {}", actuator.binary().display());
    let actuator: Arc<dyn VoltageActuator> = Arc::new(actuator);

    // PHASE 5: Shared state
    let emitter = match StatusEmitter::spawn(std::io::stdout()) {
        Ok(emitter) => emitter,
        Err(e) => {
            error!("Could not start status writer: {}", e);
            std::process::exit(exit_codes::FAULT);
        }
    };
    let heartbeat = Arc::new(Heartbeat::new());
    let gate = Arc::new(ActuationGate::new());

    // PHASE 6: Fan
    let fan = match setup_fan(&config) {
        Ok(fan) => fan,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(exit_codes::CONFIG);
        }
    };

    // PHASE 7: Safe shutdown, reachable from every exit path
    let shutdown = Arc::new(SafeShutdown::new(
        actuator.clone(),
        gate.clone(),
        Duration::from_millis(config.actuator_timeout_ms),
        config.cores.len(),
        config.strategy.as_str(),
        fan.as_ref().map(|f| f.release_handle()),
        emitter.clone(),
    ));
    install_panic_hook(shutdown.clone());

    // PHASE 8: Watchdog
    let watchdog = match start_watchdog(&config, heartbeat.clone(), shutdown.clone()) {
        Ok(watchdog) => watchdog,
        Err(e) => {
            error!("Could not start watchdog: {}", e);
            shutdown.run(ShutdownReason::Fault);
            std::process::exit(exit_codes::FAULT);
        }
    };

    // PHASE 9: Signals
    let (handle, channels) = control_channels();
    if let Err(e) = spawn_signal_listener(handle.clone()) {
        error!("Could not install signal handlers: {}", e);
        shutdown.run(ShutdownReason::Fault);
        std::process::exit(exit_codes::FAULT);
    }
    info!("STARTUP: PID: {}", std::process::id());

    // PHASE 10: Control loop
    let orchestrator = Orchestrator::new(OrchestratorParts {
        config,
        counters: ProcStatSource::default(),
        actuator,
        gate,
        fan,
        heartbeat,
        emitter,
        shutdown: shutdown.clone(),
        cpu_base: paths::CPU_BASE.into(),
    });
    let reason = orchestrator.run(channels).await;

    // PHASE 11: Exit
    watchdog.stop();
    drop(handle);
    info!("SHUTDOWN: deckvoltd exiting ({})", reason.as_str());
    std::process::exit(shutdown::exit_code(reason));
}
