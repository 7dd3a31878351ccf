//! Per-tick rate limit for voltage offsets

use crate::constants::ramp;
use crate::data::ControlState;

#[derive(Debug, Clone, Copy)]
pub struct RampLimiter {
    step_mv: i32,
}

impl RampLimiter {
    pub fn new(step_mv: i32) -> Self {
        Self {
            step_mv: step_mv.max(ramp::MIN_STEP_MV),
        }
    }

    pub fn step_mv(&self) -> i32 {
        self.step_mv
    }

    /// Move `current` at most one step toward `target`
    pub fn next_value(&self, current: i32, target: i32) -> i32 {
        current + (target - current).clamp(-self.step_mv, self.step_mv)
    }

    /// Advance the commanded offset in `state` toward `target`
    pub fn step(&self, state: &mut ControlState, target: i32) -> i32 {
        state.commanded_mv = self.next_value(state.commanded_mv, target);
        state.commanded_mv
    }

    /// Jump straight to `target`, used only for the reset to zero
    pub fn force(&self, state: &mut ControlState, target: i32) -> i32 {
        state.commanded_mv = target;
        target
    }

    /// Ticks needed to travel from `current` to `target`
    pub fn ticks_to_reach(&self, current: i32, target: i32) -> u32 {
        let distance = (target - current).unsigned_abs();
        distance.div_ceil(self.step_mv as u32)
    }
}

impl Default for RampLimiter {
    fn default() -> Self {
        Self::new(ramp::DEFAULT_STEP_MV)
    }
}
