//! deckvolt core library
//!
//! Pure control logic for the `deckvoltd` undervolt and fan daemon. Nothing in
//! this crate touches privileged hardware interfaces; it only reads counters and
//! sysfs files handed to it and computes what the daemon should write.
//!
//! # Module Structure
//!
//! - `data/` - configuration model, validation, per-core control state
//! - `engine/` - strategies, hysteresis, ramp limiting, fan curve and governor
//! - `hw/` - load counters and sysfs helpers
//!
//! # Example
//!
//! ```
//! use dv_core::{CoreConfig, SafetyEnvelope, Strategy};
//!
//! let core = CoreConfig::new(0, -40, -20, 50.0);
//! let target = Strategy::Balanced.target_mv(75.0, &core, &SafetyEnvelope::default());
//! assert_eq!(target, -30);
//! ```

pub mod constants;
pub mod data;
pub mod engine;
pub mod hw;

pub use data::{
    parse_core_spec, parse_fan_point, parse_voltage_point, ControlState, CoreConfig, DaemonConfig,
    FanConfig, FanCurvePoint, SafetyEnvelope, StrategyKind, VoltagePoint,
};
pub use engine::{
    FanCurve, FanDecision, FanGovernor, FanGovernorSettings, HysteresisController,
    RampLimiter, Strategy, TemperatureSmoother,
};
pub use hw::{CounterSource, CpuTimes, HwmonFanPaths, LoadMonitor, ProcStatSource};

pub use dv_error::{DeckvoltError, Result};
