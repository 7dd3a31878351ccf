//! deckvolt daemon library
//!
//! The runtime half of `deckvoltd`: voltage actuation, fan control, the
//! control loop, status output and every path that leads to a safe shutdown.
//! The binary in `main.rs` only wires these together.
//!
//! # Module Structure
//!
//! - `actuator` - ryzenadj invocation, the actuation gate and executor
//! - `cli` - command line and config file merging
//! - `fan_control` - hwmon fan device and per-tick controller
//! - `logging` - journald or stderr subscriber
//! - `orchestrator` - the control loop task
//! - `output` - JSON-lines status stream on stdout
//! - `shutdown` - the single safe shutdown sequence
//! - `signals` - SIGTERM/SIGINT/SIGUSR1 forwarding
//! - `watchdog` - stall detection on a dedicated thread

pub mod actuator;
pub mod cli;
pub mod fan_control;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod shutdown;
pub mod signals;
pub mod watchdog;

/// Daemon version reported at startup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
