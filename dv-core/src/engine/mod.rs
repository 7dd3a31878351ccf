//! Control engine modules
//!
//! Strategy evaluation, hysteresis, ramp limiting and the fan governor.

mod curve;
mod fan;
mod hysteresis;
mod ramp;
mod strategy;

pub use curve::{FanCurve, TemperatureSmoother};
pub use fan::{FanDecision, FanGovernor, FanGovernorSettings};
pub use hysteresis::HysteresisController;
pub use ramp::RampLimiter;
pub use strategy::Strategy;
