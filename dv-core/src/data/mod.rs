//! Data types, configuration, and validation modules
//!
//! Contains the configuration model and the per-core control state.

mod config;
mod types;
mod validation;

pub use config::{
    parse_core_spec, parse_fan_point, parse_voltage_point, DaemonConfig, FanConfig, StrategyKind,
};
pub use types::{
    default_cores, default_fan_curve, ControlState, CoreConfig, FanCurvePoint, SafetyEnvelope,
    VoltagePoint,
};
pub use validation::{
    validate_core_config, validate_core_set, validate_fan_curve, validate_fan_override,
    validate_load, validate_safety_floor, validate_sample_interval, validate_voltage_points,
};
