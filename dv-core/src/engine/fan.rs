//! Fan governor state machine
//!
//! Decides the duty cycle for every fan tick. Hardware access lives in the
//! daemon; this type only turns temperature readings into decisions.
//!
//! ```text
//! Startup -> AutoFollowingCurve <-> HardOverride -> RestoredToAutomatic
//! ```
//!
//! `HardOverride` is entered on the first raw reading at or above the critical
//! cutoff and pins the fan at full duty, skipping smoothing, curve and ramp.

use dv_protocol::FanMode;

use crate::constants::{fan, pwm};
use crate::data::FanConfig;
use crate::engine::curve::{FanCurve, TemperatureSmoother};

/// Tunables for the governor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanGovernorSettings {
    pub critical_temp_c: f32,
    pub override_hysteresis_c: f32,
    pub temp_dead_band_c: f32,
    pub ramp_step_percent: f32,
}

impl Default for FanGovernorSettings {
    fn default() -> Self {
        Self {
            critical_temp_c: fan::DEFAULT_CRITICAL_TEMP_C,
            override_hysteresis_c: fan::DEFAULT_OVERRIDE_HYSTERESIS_C,
            temp_dead_band_c: fan::DEFAULT_TEMP_DEAD_BAND_C,
            ramp_step_percent: fan::DEFAULT_RAMP_STEP_PERCENT,
        }
    }
}

impl From<&FanConfig> for FanGovernorSettings {
    fn from(cfg: &FanConfig) -> Self {
        Self {
            critical_temp_c: cfg.critical_temp_c,
            override_hysteresis_c: cfg.override_hysteresis_c,
            temp_dead_band_c: cfg.temp_dead_band_c,
            ramp_step_percent: cfg.ramp_step_percent,
        }
    }
}

/// Outcome of one fan tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanDecision {
    pub mode: FanMode,
    pub percent: f32,
    pub pwm: u8,
    /// False when the change is too small to be worth a sysfs write
    pub write: bool,
    /// Raw temperature the decision was based on
    pub temperature_c: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FanGovernor {
    curve: FanCurve,
    settings: FanGovernorSettings,
    mode: FanMode,
    smoother: TemperatureSmoother,
    effective_temp: Option<f32>,
    last_raw: Option<f32>,
    current_percent: f32,
    last_written: Option<u8>,
}

impl FanGovernor {
    pub fn new(curve: FanCurve, settings: FanGovernorSettings) -> Self {
        Self {
            curve,
            settings,
            mode: FanMode::Startup,
            smoother: TemperatureSmoother::default(),
            effective_temp: None,
            last_raw: None,
            current_percent: fan::FALLBACK_PERCENT,
            last_written: None,
        }
    }

    pub fn mode(&self) -> FanMode {
        self.mode
    }

    pub fn current_percent(&self) -> f32 {
        self.current_percent
    }

    pub fn last_temperature(&self) -> Option<f32> {
        self.last_raw
    }

    /// Compute the decision for this tick
    ///
    /// `reading` is `None` (or non-finite) when the sensor could not be read;
    /// the previous reading is reused in that case.
    pub fn update(&mut self, reading: Option<f32>) -> FanDecision {
        if self.mode == FanMode::RestoredToAutomatic {
            return FanDecision {
                mode: self.mode,
                percent: self.current_percent,
                pwm: pwm::from_percent(self.current_percent),
                write: false,
                temperature_c: self.last_raw,
            };
        }

        let raw = match reading.filter(|t| t.is_finite()) {
            Some(temp) => {
                self.last_raw = Some(temp);
                self.smoother.push(temp);
                temp
            }
            None => match self.last_raw {
                Some(previous) => previous,
                None => {
                    // Never had a reading: run at full duty until one arrives
                    self.mode = FanMode::AutoFollowingCurve;
                    self.current_percent = fan::FALLBACK_PERCENT;
                    return self.decide();
                }
            },
        };

        let cutoff = self.settings.critical_temp_c;
        let release_below = cutoff - self.settings.override_hysteresis_c;
        let overriding = self.mode == FanMode::HardOverride;
        if raw >= cutoff || (overriding && raw >= release_below) {
            self.mode = FanMode::HardOverride;
            self.current_percent = 100.0;
            return self.decide();
        }

        let smoothed = self.smoother.average().unwrap_or(raw);
        let effective = match self.effective_temp {
            Some(previous) if (smoothed - previous).abs() < self.settings.temp_dead_band_c => previous,
            _ => smoothed,
        };
        self.effective_temp = Some(effective);

        let mut target = self.curve.interpolate(effective);
        if smoothed >= fan::HIGH_TEMP_C {
            target = target.max(fan::HIGH_TEMP_MIN_PERCENT);
        }

        self.current_percent = if self.mode == FanMode::Startup {
            target
        } else {
            let step = self.settings.ramp_step_percent;
            self.current_percent + (target - self.current_percent).clamp(-step, step)
        };
        self.mode = FanMode::AutoFollowingCurve;
        self.decide()
    }

    /// Forget the last write so the next decision is written again
    pub fn mark_write_failed(&mut self) {
        self.last_written = None;
    }

    /// Record that the device was handed back to firmware control
    pub fn mark_released(&mut self) {
        self.mode = FanMode::RestoredToAutomatic;
    }

    fn decide(&mut self) -> FanDecision {
        let value = pwm::from_percent(self.current_percent);
        let write = match self.last_written {
            None => true,
            Some(previous) if previous == value => false,
            Some(previous) => {
                previous.abs_diff(value) >= pwm::MIN_CHANGE
                    || value == pwm::MIN_VALUE
                    || value == pwm::MAX_VALUE
            }
        };
        if write {
            self.last_written = Some(value);
        }
        FanDecision {
            mode: self.mode,
            percent: self.current_percent,
            pwm: value,
            write,
            temperature_c: self.last_raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FanCurvePoint;
    use proptest::prelude::*;

    fn governor() -> FanGovernor {
        let curve = FanCurve::new(vec![
            FanCurvePoint::new(40.0, 20.0),
            FanCurvePoint::new(60.0, 40.0),
            FanCurvePoint::new(80.0, 80.0),
        ])
        .unwrap();
        FanGovernor::new(curve, FanGovernorSettings::default())
    }

    #[test]
    fn test_first_tick_jumps_to_curve() {
        let mut g = governor();
        let d = g.update(Some(50.0));
        assert_eq!(d.mode, FanMode::AutoFollowingCurve);
        assert!((d.percent - 30.0).abs() < 0.01);
        assert!(d.write);
    }

    #[test]
    fn test_ramp_limited_after_first_tick() {
        let mut g = governor();
        g.update(Some(40.0));
        for _ in 0..5 {
            g.update(Some(80.0));
        }
        // smoothed temperature rises over the window, duty rises at most 5% per tick
        assert!(g.current_percent() <= 20.0 + 5.0 * 5.0 + 0.01);
    }

    #[test]
    fn test_override_same_tick() {
        let mut g = governor();
        g.update(Some(50.0));
        let d = g.update(Some(91.0));
        assert_eq!(d.mode, FanMode::HardOverride);
        assert_eq!(d.pwm, 255);
        assert!(d.write);
    }

    #[test]
    fn test_override_hysteresis() {
        let mut g = governor();
        g.update(Some(95.0));
        assert_eq!(g.update(Some(86.0)).mode, FanMode::HardOverride);
        assert_eq!(g.update(Some(85.0)).mode, FanMode::HardOverride);
        let d = g.update(Some(84.9));
        assert_eq!(d.mode, FanMode::AutoFollowingCurve);
        // ramps down from full duty instead of dropping
        assert!(d.percent >= 95.0 - 0.01);
    }

    #[test]
    fn test_high_temperature_floor() {
        let curve = FanCurve::new(vec![
            FanCurvePoint::new(40.0, 10.0),
            FanCurvePoint::new(86.0, 20.0),
        ])
        .unwrap();
        let mut g = FanGovernor::new(curve, FanGovernorSettings::default());
        let d = g.update(Some(86.0));
        assert!(d.percent >= fan::HIGH_TEMP_MIN_PERCENT);
    }

    #[test]
    fn test_failed_read_reuses_previous() {
        let mut g = governor();
        let first = g.update(Some(60.0));
        let second = g.update(None);
        assert_eq!(second.temperature_c, Some(60.0));
        assert_eq!(first.pwm, second.pwm);
        assert!(!second.write);
    }

    #[test]
    fn test_no_reading_ever_is_full_duty() {
        let mut g = governor();
        let d = g.update(None);
        assert_eq!(d.pwm, 255);
    }

    #[test]
    fn test_small_changes_not_written() {
        let mut g = governor();
        g.update(Some(50.0));
        // +0.5°C is inside the temperature dead-band
        let d = g.update(Some(50.5));
        assert!(!d.write);
    }

    #[test]
    fn test_write_failure_forces_rewrite() {
        let mut g = governor();
        g.update(Some(50.0));
        g.mark_write_failed();
        assert!(g.update(Some(50.0)).write);
    }

    #[test]
    fn test_released_is_terminal() {
        let mut g = governor();
        g.update(Some(50.0));
        g.mark_released();
        let d = g.update(Some(99.0));
        assert_eq!(d.mode, FanMode::RestoredToAutomatic);
        assert!(!d.write);
    }

    proptest! {
        #[test]
        fn prop_critical_forces_max_on_same_tick(
            history in prop::collection::vec(proptest::option::of(20.0f32..89.9), 0..30),
            hot in 90.0f32..120.0,
        ) {
            let mut g = governor();
            for reading in history {
                g.update(reading);
            }
            let d = g.update(Some(hot));
            prop_assert_eq!(d.mode, FanMode::HardOverride);
            prop_assert_eq!(d.pwm, pwm::MAX_VALUE);
        }
    }
}
