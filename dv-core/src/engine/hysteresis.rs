//! Dead-band filter for strategy targets
//!
//! Small target movements are ignored while the last accepted change is still
//! recent. Large movements, or any movement once the dwell time has passed, are
//! accepted immediately.

use std::time::{Duration, Instant};

use crate::constants::hysteresis;
use crate::data::ControlState;

#[derive(Debug, Clone, Copy)]
pub struct HysteresisController {
    dead_band_mv: i32,
    min_dwell: Duration,
}

impl HysteresisController {
    pub fn new(dead_band_mv: i32, min_dwell: Duration) -> Self {
        Self {
            dead_band_mv: dead_band_mv.max(0),
            min_dwell,
        }
    }

    pub fn dead_band_mv(&self) -> i32 {
        self.dead_band_mv
    }

    pub fn min_dwell(&self) -> Duration {
        self.min_dwell
    }

    /// Returns the target to pursue and records it in `state` when accepted
    pub fn filter(&self, state: &mut ControlState, target_mv: i32, now: Instant) -> i32 {
        if let (Some(previous), Some(changed_at)) = (state.last_target_mv, state.last_change_time) {
            if target_mv == previous {
                return previous;
            }
            let small = (target_mv - previous).abs() < self.dead_band_mv;
            let recent = now.saturating_duration_since(changed_at) < self.min_dwell;
            if small && recent {
                return previous;
            }
        }

        state.last_target_mv = Some(target_mv);
        state.last_change_time = Some(now);
        target_mv
    }
}

impl Default for HysteresisController {
    fn default() -> Self {
        Self::new(
            hysteresis::DEFAULT_DEAD_BAND_MV,
            Duration::from_millis(hysteresis::DEFAULT_MIN_DWELL_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn controller() -> HysteresisController {
        HysteresisController::new(2, Duration::from_millis(500))
    }

    #[test]
    fn test_first_target_accepted() {
        let mut state = ControlState::default();
        let now = Instant::now();
        assert_eq!(controller().filter(&mut state, -7, now), -7);
        assert_eq!(state.last_target_mv, Some(-7));
        assert_eq!(state.last_change_time, Some(now));
    }

    #[test]
    fn test_small_recent_change_rejected() {
        let mut state = ControlState::default();
        let t0 = Instant::now();
        let hc = controller();
        hc.filter(&mut state, -10, t0);
        assert_eq!(hc.filter(&mut state, -11, t0 + Duration::from_millis(100)), -10);
        assert_eq!(state.last_change_time, Some(t0));
    }

    #[test]
    fn test_small_change_after_dwell_accepted() {
        let mut state = ControlState::default();
        let t0 = Instant::now();
        let hc = controller();
        hc.filter(&mut state, -10, t0);
        assert_eq!(hc.filter(&mut state, -11, t0 + Duration::from_millis(500)), -11);
    }

    #[test]
    fn test_large_change_accepted_immediately() {
        let mut state = ControlState::default();
        let t0 = Instant::now();
        let hc = controller();
        hc.filter(&mut state, -10, t0);
        assert_eq!(hc.filter(&mut state, -12, t0 + Duration::from_millis(1)), -12);
    }

    #[test]
    fn test_zero_dead_band_passes_everything() {
        let hc = HysteresisController::new(0, Duration::from_secs(10));
        let mut state = ControlState::default();
        let t0 = Instant::now();
        hc.filter(&mut state, -10, t0);
        assert_eq!(hc.filter(&mut state, -11, t0), -11);
    }

    proptest! {
        /// Within the dead-band, at most one change is accepted per dwell window
        #[test]
        fn prop_one_change_per_dwell_window(
            steps in prop::collection::vec((-1i32..=1, 0u64..200), 1..200),
        ) {
            let dwell = Duration::from_millis(500);
            let hc = HysteresisController::new(2, dwell);
            let mut state = ControlState::default();
            let start = Instant::now();

            let mut now = start;
            let mut target = -20;
            hc.filter(&mut state, target, now);

            let mut accepted: Vec<Instant> = Vec::new();
            for (delta, gap_ms) in steps {
                now += Duration::from_millis(gap_ms);
                // stay within the dead-band of the last accepted target
                let base = state.last_target_mv.unwrap_or(target);
                target = base + delta;
                let before = state.last_target_mv;
                let out = hc.filter(&mut state, target, now);
                if Some(out) != before {
                    accepted.push(now);
                }
            }

            let mut last = start;
            for at in accepted {
                prop_assert!(at.duration_since(last) >= dwell);
                last = at;
            }
        }
    }
}
