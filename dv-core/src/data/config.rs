//! Daemon configuration
//!
//! A `DaemonConfig` is assembled from defaults, an optional JSON file and
//! command-line overrides, then validated once as a whole. Components are only
//! constructed from a validated config.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{actuation, fan, hysteresis, limits, paths, ramp, timing, voltage, watchdog};
use crate::data::types::{default_cores, default_fan_curve, CoreConfig, FanCurvePoint, SafetyEnvelope, VoltagePoint};
use crate::data::validation;
use dv_error::{DeckvoltError, Result};

/// Strategy selected by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    Manual,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Conservative => "conservative",
            StrategyKind::Balanced => "balanced",
            StrategyKind::Aggressive => "aggressive",
            StrategyKind::Manual => "manual",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = DeckvoltError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(StrategyKind::Conservative),
            "balanced" => Ok(StrategyKind::Balanced),
            "aggressive" => Ok(StrategyKind::Aggressive),
            // "custom" is accepted as an alias for manual breakpoints
            "manual" | "custom" => Ok(StrategyKind::Manual),
            other => Err(DeckvoltError::invalid_config(
                "strategy",
                format!("unknown strategy '{}' (conservative, balanced, aggressive, manual)", other),
            )),
        }
    }
}

/// Fan controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FanConfig {
    /// Take manual control of the fan
    pub enabled: bool,
    pub curve: Vec<FanCurvePoint>,
    pub critical_temp_c: f32,
    pub override_hysteresis_c: f32,
    pub temp_dead_band_c: f32,
    pub ramp_step_percent: f32,
    /// Explicit hwmon directory; discovered by name when absent
    pub hwmon_path: Option<PathBuf>,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            curve: default_fan_curve(),
            critical_temp_c: fan::DEFAULT_CRITICAL_TEMP_C,
            override_hysteresis_c: fan::DEFAULT_OVERRIDE_HYSTERESIS_C,
            temp_dead_band_c: fan::DEFAULT_TEMP_DEAD_BAND_C,
            ramp_step_percent: fan::DEFAULT_RAMP_STEP_PERCENT,
            hwmon_path: None,
        }
    }
}

impl FanConfig {
    pub fn validate(&self) -> Result<()> {
        validation::validate_fan_curve(&self.curve)?;
        validation::validate_fan_override(self.critical_temp_c, self.override_hysteresis_c)?;
        if !self.temp_dead_band_c.is_finite() || !(0.0..=10.0).contains(&self.temp_dead_band_c) {
            return Err(DeckvoltError::invalid_config(
                "fan.temp_dead_band_c",
                format!("{} outside 0-10°C", self.temp_dead_band_c),
            ));
        }
        if !self.ramp_step_percent.is_finite() || !(1.0..=100.0).contains(&self.ramp_step_percent) {
            return Err(DeckvoltError::invalid_config(
                "fan.ramp_step_percent",
                format!("{} outside 1-100%", self.ramp_step_percent),
            ));
        }
        if let Some(last) = self.curve.last() {
            if last.temperature >= self.critical_temp_c {
                return Err(DeckvoltError::InvalidCurve(format!(
                    "last curve point ({}°C) must be below the critical cutoff ({}°C)",
                    last.temperature, self.critical_temp_c
                )));
            }
        }
        Ok(())
    }
}

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub strategy: StrategyKind,
    pub cores: Vec<CoreConfig>,
    /// Breakpoints used by the manual strategy for cores without their own
    pub manual_points: Vec<VoltagePoint>,
    pub sample_interval_ms: u64,
    pub status_interval_ms: u64,
    pub dead_band_mv: i32,
    pub min_dwell_ms: u64,
    pub ramp_step_mv: i32,
    pub watchdog_timeout_secs: u64,
    pub safety_floor_mv: i32,
    pub actuator_path: PathBuf,
    pub actuator_timeout_ms: u64,
    pub fan: FanConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            cores: default_cores(),
            manual_points: Vec::new(),
            sample_interval_ms: timing::DEFAULT_SAMPLE_INTERVAL_MS,
            status_interval_ms: timing::DEFAULT_STATUS_INTERVAL_MS,
            dead_band_mv: hysteresis::DEFAULT_DEAD_BAND_MV,
            min_dwell_ms: hysteresis::DEFAULT_MIN_DWELL_MS,
            ramp_step_mv: ramp::DEFAULT_STEP_MV,
            watchdog_timeout_secs: watchdog::DEFAULT_TIMEOUT_SECS,
            safety_floor_mv: voltage::DEFAULT_FLOOR_MV,
            actuator_path: PathBuf::from(paths::DEFAULT_ACTUATOR),
            actuator_timeout_ms: actuation::DEFAULT_TIMEOUT_MS,
            fan: FanConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Parse and validate a config from untrusted bytes
    ///
    /// Never panics: any input yields either a validated config or an error.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() as u64 > limits::MAX_CONFIG_SIZE {
            return Err(DeckvoltError::config(format!(
                "config is {} bytes (max {})",
                bytes.len(),
                limits::MAX_CONFIG_SIZE
            )));
        }
        let config: DaemonConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file without validating it
    ///
    /// The caller applies command-line overrides and validates afterwards.
    pub fn load_file(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|source| DeckvoltError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        if meta.len() > limits::MAX_CONFIG_SIZE {
            return Err(DeckvoltError::FileTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                max_size: limits::MAX_CONFIG_SIZE,
            });
        }
        let bytes = std::fs::read(path).map_err(|source| DeckvoltError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn envelope(&self) -> SafetyEnvelope {
        SafetyEnvelope::with_floor(self.safety_floor_mv)
    }

    /// Replace the entry for `core.core_id`, keeping the others
    pub fn set_core(&mut self, core: CoreConfig) {
        match self.cores.iter_mut().find(|c| c.core_id == core.core_id) {
            Some(existing) => *existing = core,
            None => {
                self.cores.push(core);
                self.cores.sort_by_key(|c| c.core_id);
            }
        }
    }

    /// Validate every field and the cross-field rules
    pub fn validate(&self) -> Result<()> {
        let envelope = validation::validate_safety_floor(self.safety_floor_mv)?;
        validation::validate_sample_interval(self.sample_interval_ms)?;
        validation::validate_status_interval(self.status_interval_ms)?;
        validation::validate_watchdog_timeout(self.watchdog_timeout_secs)?;
        validation::validate_dead_band(self.dead_band_mv, self.min_dwell_ms)?;
        validation::validate_ramp_step(self.ramp_step_mv)?;
        validation::validate_actuator_timeout(self.actuator_timeout_ms)?;
        validation::validate_core_set(&self.cores, &envelope)?;

        if self.actuator_path.as_os_str().is_empty() {
            return Err(DeckvoltError::invalid_config("actuator_path", "must not be empty"));
        }

        if !self.manual_points.is_empty() {
            validation::validate_voltage_points(&self.manual_points, &envelope)?;
        }
        if self.strategy == StrategyKind::Manual {
            let uncovered: Vec<u8> = self
                .cores
                .iter()
                .filter(|c| c.manual_points.is_none())
                .map(|c| c.core_id)
                .collect();
            if self.manual_points.is_empty() && !uncovered.is_empty() {
                return Err(DeckvoltError::invalid_config(
                    "manual_points",
                    format!("manual strategy needs breakpoints for cores {:?}", uncovered),
                ));
            }
        }

        self.fan.validate()
    }
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| DeckvoltError::invalid_config(field, format!("cannot parse '{}'", raw)))
}

/// Parse a core spec in the form `N:MIN:MAX:THRESHOLD` (e.g. `0:-20:-35:50`)
pub fn parse_core_spec(spec: &str) -> Result<CoreConfig> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 4 {
        return Err(DeckvoltError::invalid_config(
            "core",
            format!("'{}' is not N:MIN:MAX:THRESHOLD", spec),
        ));
    }
    Ok(CoreConfig::new(
        parse_field("core id", parts[0])?,
        parse_field("core min_mv", parts[1])?,
        parse_field("core max_mv", parts[2])?,
        parse_field("core threshold", parts[3])?,
    ))
}

/// Parse a fan curve point in the form `TEMP:PERCENT` (e.g. `60:45`)
pub fn parse_fan_point(spec: &str) -> Result<FanCurvePoint> {
    let (temp, percent) = spec.split_once(':').ok_or_else(|| {
        DeckvoltError::invalid_config("fan-curve", format!("'{}' is not TEMP:PERCENT", spec))
    })?;
    Ok(FanCurvePoint::new(
        parse_field("fan-curve temperature", temp)?,
        parse_field("fan-curve percent", percent)?,
    ))
}

/// Parse a manual breakpoint in the form `LOAD:MV` (e.g. `30:-25`)
pub fn parse_voltage_point(spec: &str) -> Result<VoltagePoint> {
    let (load, mv) = spec.split_once(':').ok_or_else(|| {
        DeckvoltError::invalid_config("manual-point", format!("'{}' is not LOAD:MV", spec))
    })?;
    Ok(VoltagePoint::new(
        parse_field("manual-point load", load)?,
        parse_field("manual-point offset", mv)?,
    ))
}
