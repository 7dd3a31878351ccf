//! Fan curve lookup and temperature smoothing
//!
//! # How It Works
//!
//! 1. **Smoothing**: raw readings go through a short moving average so one noisy
//!    sample does not move the fan.
//!
//! 2. **Dead-band**: the smoothed temperature only replaces the effective
//!    temperature once it has moved by at least the configured delta (default 2°C).
//!
//! 3. **Interpolation**: the effective temperature is mapped to a duty cycle by
//!    linear interpolation between the two bracketing curve points.

use std::collections::VecDeque;

use crate::constants::fan;
use crate::data::{validate_fan_curve, FanCurvePoint};
use dv_error::Result;

/// Validated temperature-to-duty curve
#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    points: Vec<FanCurvePoint>,
}

impl FanCurve {
    /// Build a curve, rejecting unsorted or out-of-range points
    pub fn new(points: Vec<FanCurvePoint>) -> Result<Self> {
        validate_fan_curve(&points)?;
        Ok(Self { points })
    }

    pub fn points(&self) -> &[FanCurvePoint] {
        &self.points
    }

    /// Duty cycle of the first point
    pub fn min_percent(&self) -> f32 {
        self.points.first().map(|p| p.fan_percent).unwrap_or(fan::FALLBACK_PERCENT)
    }

    /// Duty cycle of the last point (highest before override)
    pub fn max_percent(&self) -> f32 {
        self.points.last().map(|p| p.fan_percent).unwrap_or(fan::FALLBACK_PERCENT)
    }

    /// Linearly interpolate duty cycle between curve points
    ///
    /// - Below the first point: first point's duty
    /// - Above the last point: last point's duty
    pub fn interpolate(&self, temp: f32) -> f32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return fan::FALLBACK_PERCENT,
        };

        if temp.is_nan() {
            return fan::FALLBACK_PERCENT;
        }
        if temp <= first.temperature {
            return first.fan_percent;
        }
        if temp >= last.temperature {
            return last.fan_percent;
        }

        for window in self.points.windows(2) {
            let lower = &window[0];
            let upper = &window[1];

            if temp >= lower.temperature && temp <= upper.temperature {
                let temp_range = upper.temperature - lower.temperature;
                if temp_range.abs() < fan::FLOAT_EPSILON {
                    return lower.fan_percent;
                }
                let ratio = (temp - lower.temperature) / temp_range;
                return lower.fan_percent + ratio * (upper.fan_percent - lower.fan_percent);
            }
        }

        fan::FALLBACK_PERCENT
    }
}

impl Default for FanCurve {
    fn default() -> Self {
        Self {
            points: crate::data::default_fan_curve(),
        }
    }
}

/// Moving average over the last few temperature readings
#[derive(Debug, Clone)]
pub struct TemperatureSmoother {
    window: usize,
    samples: VecDeque<f32>,
}

impl TemperatureSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Add a reading and return the current average
    pub fn push(&mut self, temp: f32) -> f32 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(temp);
        self.average().unwrap_or(temp)
    }

    pub fn average(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for TemperatureSmoother {
    fn default() -> Self {
        Self::new(fan::SMOOTHING_WINDOW)
    }
}
