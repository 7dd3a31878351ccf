//! Input validation for deckvolt
//!
//! Everything read from the command line or a config file passes through these
//! functions before any component is constructed. A value that fails here never
//! reaches hardware.

use std::collections::HashSet;

use crate::constants::{actuation, cores, fan, hysteresis, limits, ramp, timing, voltage, watchdog};
use crate::data::types::{CoreConfig, FanCurvePoint, SafetyEnvelope, VoltagePoint};
use dv_error::{DeckvoltError, Result};

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
    unit: &str,
) -> Result<T> {
    if value < min || value > max {
        return Err(DeckvoltError::invalid_config(
            field,
            format!("{}{} outside {}-{}{}", value, unit, min, max, unit),
        ));
    }
    Ok(value)
}

/// Validates the load sampling interval (10-5000 ms)
pub fn validate_sample_interval(ms: u64) -> Result<u64> {
    check_range(
        "sample_interval_ms",
        ms,
        timing::MIN_SAMPLE_INTERVAL_MS,
        timing::MAX_SAMPLE_INTERVAL_MS,
        "ms",
    )
}

/// Validates the status emission interval
pub fn validate_status_interval(ms: u64) -> Result<u64> {
    check_range(
        "status_interval_ms",
        ms,
        timing::MIN_STATUS_INTERVAL_MS,
        timing::MAX_STATUS_INTERVAL_MS,
        "ms",
    )
}

/// Validates the watchdog stall timeout
pub fn validate_watchdog_timeout(secs: u64) -> Result<u64> {
    check_range(
        "watchdog_timeout_secs",
        secs,
        watchdog::MIN_TIMEOUT_SECS,
        watchdog::MAX_TIMEOUT_SECS,
        "s",
    )
}

/// Validates the hysteresis dead-band and dwell
pub fn validate_dead_band(dead_band_mv: i32, min_dwell_ms: u64) -> Result<()> {
    check_range("dead_band_mv", dead_band_mv, 0, hysteresis::MAX_DEAD_BAND_MV, "mV")?;
    check_range("min_dwell_ms", min_dwell_ms, 0, hysteresis::MAX_MIN_DWELL_MS, "ms")?;
    Ok(())
}

/// Validates the per-tick voltage ramp step
pub fn validate_ramp_step(step_mv: i32) -> Result<i32> {
    check_range("ramp_step_mv", step_mv, ramp::MIN_STEP_MV, ramp::MAX_STEP_MV, "mV")
}

/// Validates the actuator call deadline
pub fn validate_actuator_timeout(ms: u64) -> Result<u64> {
    check_range(
        "actuator_timeout_ms",
        ms,
        actuation::MIN_TIMEOUT_MS,
        actuation::MAX_TIMEOUT_MS,
        "ms",
    )
}

/// Validates the configured safety floor
pub fn validate_safety_floor(floor_mv: i32) -> Result<SafetyEnvelope> {
    check_range(
        "safety_floor_mv",
        floor_mv,
        voltage::ABSOLUTE_FLOOR_MV,
        voltage::CEILING_MV,
        "mV",
    )?;
    Ok(SafetyEnvelope::with_floor(floor_mv))
}

/// Validates a load percentage (0-100)
pub fn validate_load(field: &str, value: f32) -> Result<f32> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(DeckvoltError::invalid_config(
            field,
            format!("{} is not a load percentage (0-100)", value),
        ));
    }
    Ok(value)
}

/// Validates manual breakpoints: 2-16 points, loads strictly increasing, offsets inside the envelope
pub fn validate_voltage_points(points: &[VoltagePoint], envelope: &SafetyEnvelope) -> Result<()> {
    if points.len() < limits::MIN_CURVE_POINTS {
        return Err(DeckvoltError::InvalidCurve(format!(
            "manual curve needs at least {} points, got {}",
            limits::MIN_CURVE_POINTS,
            points.len()
        )));
    }
    if points.len() > limits::MAX_CURVE_POINTS {
        return Err(DeckvoltError::InvalidCurve(format!(
            "manual curve has {} points (max {})",
            points.len(),
            limits::MAX_CURVE_POINTS
        )));
    }
    for point in points {
        validate_load("manual_points.load", point.load)?;
        if !envelope.contains(point.offset_mv) {
            return Err(DeckvoltError::HardwareLimit {
                value_mv: point.offset_mv,
                floor_mv: envelope.floor_mv,
                ceiling_mv: envelope.ceiling_mv,
            });
        }
    }
    if points.windows(2).any(|w| w[0].load >= w[1].load) {
        return Err(DeckvoltError::InvalidCurve(
            "manual curve loads must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Validates one core's bounds against the envelope
pub fn validate_core_config(core: &CoreConfig, envelope: &SafetyEnvelope) -> Result<()> {
    if core.core_id as usize >= cores::CORE_COUNT {
        return Err(DeckvoltError::invalid_config(
            "core_id",
            format!("{} (valid 0-{})", core.core_id, cores::CORE_COUNT - 1),
        ));
    }
    for (field, mv) in [("min_mv", core.min_mv), ("max_mv", core.max_mv)] {
        if !envelope.contains(mv) {
            return Err(DeckvoltError::invalid_config(
                format!("core {} {}", core.core_id, field),
                format!(
                    "{} mV outside safety envelope [{}, {}]",
                    mv, envelope.floor_mv, envelope.ceiling_mv
                ),
            ));
        }
    }
    validate_load("threshold", core.threshold)?;
    if let Some(points) = &core.manual_points {
        validate_voltage_points(points, envelope)?;
    }
    Ok(())
}

/// Validates the full core set: exactly one entry per core
pub fn validate_core_set(cores_cfg: &[CoreConfig], envelope: &SafetyEnvelope) -> Result<()> {
    if cores_cfg.len() != cores::CORE_COUNT {
        return Err(DeckvoltError::invalid_config(
            "cores",
            format!("expected {} entries, got {}", cores::CORE_COUNT, cores_cfg.len()),
        ));
    }
    let mut seen = HashSet::new();
    for core in cores_cfg {
        validate_core_config(core, envelope)?;
        if !seen.insert(core.core_id) {
            return Err(DeckvoltError::invalid_config(
                "cores",
                format!("core {} configured twice", core.core_id),
            ));
        }
    }
    Ok(())
}

/// Validates fan curve points: 2-16 points, strictly increasing temperature, duty 0-100
pub fn validate_fan_curve(points: &[FanCurvePoint]) -> Result<()> {
    if points.len() < limits::MIN_CURVE_POINTS {
        return Err(DeckvoltError::InvalidCurve(format!(
            "fan curve needs at least {} points, got {}",
            limits::MIN_CURVE_POINTS,
            points.len()
        )));
    }
    if points.len() > limits::MAX_CURVE_POINTS {
        return Err(DeckvoltError::InvalidCurve(format!(
            "fan curve has {} points (max {})",
            points.len(),
            limits::MAX_CURVE_POINTS
        )));
    }
    for point in points {
        if !point.temperature.is_finite()
            || point.temperature < 0.0
            || point.temperature > limits::MAX_CURVE_TEMPERATURE
        {
            return Err(DeckvoltError::InvalidCurve(format!(
                "temperature {}°C out of range (0-{})",
                point.temperature,
                limits::MAX_CURVE_TEMPERATURE
            )));
        }
        if !point.fan_percent.is_finite() || !(0.0..=100.0).contains(&point.fan_percent) {
            return Err(DeckvoltError::InvalidCurve(format!(
                "fan speed {}% out of range (0-100)",
                point.fan_percent
            )));
        }
    }
    if points.windows(2).any(|w| w[0].temperature >= w[1].temperature) {
        return Err(DeckvoltError::InvalidCurve(
            "fan curve temperatures must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Validates the fan override parameters
pub fn validate_fan_override(critical_temp_c: f32, hysteresis_c: f32) -> Result<()> {
    if !critical_temp_c.is_finite() || !hysteresis_c.is_finite() {
        return Err(DeckvoltError::invalid_config("fan", "override values must be finite"));
    }
    check_range(
        "fan.critical_temp_c",
        critical_temp_c,
        fan::MIN_CRITICAL_TEMP_C,
        fan::MAX_CRITICAL_TEMP_C,
        "°C",
    )?;
    check_range(
        "fan.override_hysteresis_c",
        hysteresis_c,
        fan::MIN_OVERRIDE_HYSTERESIS_C,
        fan::MAX_OVERRIDE_HYSTERESIS_C,
        "°C",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interval_bounds() {
        assert!(validate_sample_interval(10).is_ok());
        assert!(validate_sample_interval(5000).is_ok());
        assert!(validate_sample_interval(9).is_err());
        assert!(validate_sample_interval(5001).is_err());
    }

    #[test]
    fn test_core_outside_envelope() {
        let env = SafetyEnvelope::with_floor(-30);
        let core = CoreConfig::new(0, -10, -35, 50.0);
        let err = validate_core_config(&core, &env).unwrap_err();
        assert!(err.to_string().contains("max_mv"));
    }

    #[test]
    fn test_core_threshold_range() {
        let env = SafetyEnvelope::default();
        assert!(validate_core_config(&CoreConfig::new(1, 0, -20, 100.0), &env).is_ok());
        assert!(validate_core_config(&CoreConfig::new(1, 0, -20, 100.5), &env).is_err());
        assert!(validate_core_config(&CoreConfig::new(1, 0, -20, f32::NAN), &env).is_err());
    }

    #[test]
    fn test_core_set_duplicates() {
        let env = SafetyEnvelope::default();
        let cores = vec![
            CoreConfig::new(0, 0, -20, 50.0),
            CoreConfig::new(1, 0, -20, 50.0),
            CoreConfig::new(1, 0, -20, 50.0),
            CoreConfig::new(3, 0, -20, 50.0),
        ];
        assert!(validate_core_set(&cores, &env).is_err());
        assert!(validate_core_set(&cores[..3], &env).is_err());
    }

    #[test]
    fn test_fan_curve_rules() {
        let ok = vec![FanCurvePoint::new(40.0, 20.0), FanCurvePoint::new(80.0, 100.0)];
        assert!(validate_fan_curve(&ok).is_ok());

        let single = vec![FanCurvePoint::new(40.0, 20.0)];
        assert!(validate_fan_curve(&single).is_err());

        let unsorted = vec![FanCurvePoint::new(60.0, 20.0), FanCurvePoint::new(50.0, 40.0)];
        assert!(validate_fan_curve(&unsorted).is_err());

        let too_fast = vec![FanCurvePoint::new(40.0, 20.0), FanCurvePoint::new(60.0, 120.0)];
        assert!(validate_fan_curve(&too_fast).is_err());
    }

    #[test]
    fn test_voltage_points_rules() {
        let env = SafetyEnvelope::with_floor(-40);
        let ok = vec![VoltagePoint::new(0.0, -35), VoltagePoint::new(100.0, -20)];
        assert!(validate_voltage_points(&ok, &env).is_ok());

        let below_floor = vec![VoltagePoint::new(0.0, -45), VoltagePoint::new(100.0, -20)];
        assert!(matches!(
            validate_voltage_points(&below_floor, &env),
            Err(DeckvoltError::HardwareLimit { .. })
        ));

        let dup = vec![VoltagePoint::new(50.0, -35), VoltagePoint::new(50.0, -20)];
        assert!(validate_voltage_points(&dup, &env).is_err());
    }

    #[test]
    fn test_fan_override_rules() {
        assert!(validate_fan_override(90.0, 5.0).is_ok());
        assert!(validate_fan_override(60.0, 5.0).is_err());
        assert!(validate_fan_override(90.0, 0.0).is_err());
    }
}
