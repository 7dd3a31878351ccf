//! Core data types for the control pipeline

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::constants::{cores, fan, voltage};

/// A point on the fan curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanCurvePoint {
    /// Temperature in Celsius
    pub temperature: f32,
    /// Duty cycle percentage (0-100)
    pub fan_percent: f32,
}

impl FanCurvePoint {
    pub fn new(temperature: f32, fan_percent: f32) -> Self {
        Self { temperature, fan_percent }
    }
}

/// A breakpoint of a manual load-to-offset curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoltagePoint {
    /// Load percentage (0-100)
    pub load: f32,
    /// Offset in mV at this load
    pub offset_mv: i32,
}

impl VoltagePoint {
    pub fn new(load: f32, offset_mv: i32) -> Self {
        Self { load, offset_mv }
    }
}

/// Platform-wide hard range every offset must stay inside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyEnvelope {
    pub floor_mv: i32,
    pub ceiling_mv: i32,
}

impl SafetyEnvelope {
    /// Envelope from a configured floor; the ceiling is always zero
    pub fn with_floor(floor_mv: i32) -> Self {
        Self {
            floor_mv: floor_mv.min(voltage::CEILING_MV),
            ceiling_mv: voltage::CEILING_MV,
        }
    }

    pub fn contains(&self, mv: i32) -> bool {
        (self.floor_mv..=self.ceiling_mv).contains(&mv)
    }

    pub fn clamp(&self, mv: i32) -> i32 {
        mv.clamp(self.floor_mv, self.ceiling_mv)
    }
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        Self::with_floor(voltage::DEFAULT_FLOOR_MV)
    }
}

/// Per-core tuning bounds
///
/// `min_mv` is the least aggressive offset (used at or below `threshold`),
/// `max_mv` the most aggressive one (approached as load reaches 100%).
/// No sign ordering between the two is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    pub core_id: u8,
    pub min_mv: i32,
    pub max_mv: i32,
    pub threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_points: Option<Vec<VoltagePoint>>,
}

impl CoreConfig {
    pub fn new(core_id: u8, min_mv: i32, max_mv: i32, threshold: f32) -> Self {
        Self {
            core_id,
            min_mv,
            max_mv,
            threshold,
            manual_points: None,
        }
    }

    /// Default bounds for a core
    pub fn default_for(core_id: u8) -> Self {
        Self::new(
            core_id,
            voltage::DEFAULT_MIN_MV,
            voltage::DEFAULT_MAX_MV,
            voltage::DEFAULT_THRESHOLD,
        )
    }

    /// Inclusive (low, high) span between min_mv and max_mv
    pub fn span(&self) -> (i32, i32) {
        (self.min_mv.min(self.max_mv), self.min_mv.max(self.max_mv))
    }

    pub fn clamp_to_span(&self, mv: i32) -> i32 {
        let (lo, hi) = self.span();
        mv.clamp(lo, hi)
    }
}

/// Default bounds for every controlled core
pub fn default_cores() -> Vec<CoreConfig> {
    (0..cores::CORE_COUNT as u8).map(CoreConfig::default_for).collect()
}

/// Default fan curve
pub fn default_fan_curve() -> Vec<FanCurvePoint> {
    fan::DEFAULT_CURVE
        .iter()
        .map(|&(t, p)| FanCurvePoint::new(t, p))
        .collect()
}

/// Per-core state of the voltage pipeline
///
/// Owned by the orchestrator and only touched on the actuation path.
#[derive(Debug, Clone, Default)]
pub struct ControlState {
    /// Last target accepted by the hysteresis filter
    pub last_target_mv: Option<i32>,
    /// Last offset confirmed applied by the actuator
    pub last_applied_mv: i32,
    /// Last ramped offset handed to the actuator (may be unconfirmed)
    pub commanded_mv: i32,
    /// When the hysteresis filter last accepted a change
    pub last_change_time: Option<Instant>,
}

impl ControlState {
    /// Discard unconfirmed progress after a failed actuation
    pub fn revert_to_applied(&mut self) {
        self.commanded_mv = self.last_applied_mv;
    }

    /// Record that `mv` is now live on hardware
    pub fn confirm_applied(&mut self, mv: i32) {
        self.last_applied_mv = mv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_clamp() {
        let env = SafetyEnvelope::with_floor(-30);
        assert_eq!(env.clamp(-45), -30);
        assert_eq!(env.clamp(10), 0);
        assert_eq!(env.clamp(-12), -12);
        assert!(env.contains(-30));
        assert!(!env.contains(1));
    }

    #[test]
    fn test_envelope_never_positive() {
        let env = SafetyEnvelope::with_floor(20);
        assert_eq!(env.floor_mv, 0);
        assert_eq!(env.ceiling_mv, 0);
    }

    #[test]
    fn test_core_span_ignores_order() {
        let a = CoreConfig::new(0, -40, -20, 50.0);
        let b = CoreConfig::new(0, -20, -40, 50.0);
        assert_eq!(a.span(), (-40, -20));
        assert_eq!(b.span(), (-40, -20));
        assert_eq!(a.clamp_to_span(-10), -20);
    }

    #[test]
    fn test_defaults() {
        let cores = default_cores();
        assert_eq!(cores.len(), cores::CORE_COUNT);
        assert!(cores.iter().enumerate().all(|(i, c)| c.core_id as usize == i));

        let curve = default_fan_curve();
        assert!(curve.windows(2).all(|w| w[0].temperature < w[1].temperature));
    }

    #[test]
    fn test_control_state_revert() {
        let mut state = ControlState::default();
        state.confirm_applied(-5);
        state.commanded_mv = -9;
        state.revert_to_applied();
        assert_eq!(state.commanded_mv, -5);
    }
}
