//! Command Line Interface
//!
//! Every setting can come from the JSON config file or a flag; flags win.
//! The merged configuration is validated once before any hardware is touched.

use std::path::{Path, PathBuf};

use clap::Parser;

use dv_core::constants::paths;
use dv_core::{
    parse_core_spec, parse_fan_point, parse_voltage_point, CoreConfig, DaemonConfig, FanCurvePoint,
    StrategyKind, VoltagePoint,
};
use dv_error::Result;

#[derive(Parser, Debug)]
#[command(name = "deckvoltd")]
#[command(version)]
#[command(about = "deckvolt - dynamic per-core undervolt and fan control for the Steam Deck")]
#[command(long_about = "deckvolt - dynamic per-core undervolt and fan control for the Steam Deck

Samples per-core load, picks a voltage offset per core from the selected
strategy, and applies it through ryzenadj. Optionally drives the fan from a
temperature curve. Status is written to stdout as one JSON object per line.

EXAMPLES:
    deckvoltd --strategy balanced
    deckvoltd --core 0:-20:-35:50 --core 1:-20:-35:50 --core 2:-20:-35:50 --core 3:-20:-35:50
    deckvoltd --strategy manual --manual-point 0:-30 --manual-point 100:-10
    deckvoltd --fan-control --fan-curve 40:20 --fan-curve 70:60 --fan-curve 85:100

ENVIRONMENT VARIABLES:
    DECKVOLT_LOG=debug     Log filter (trace, debug, info, warn, error)

FILES:
    /etc/deckvolt/config.json   Optional configuration (flags override it)

SIGNALS:
    SIGTERM, SIGINT   Reset offsets to 0 mV, restore the fan, exit
    SIGUSR1           Write a status line immediately")]
pub struct Cli {
    /// Voltage strategy (conservative, balanced, aggressive, manual)
    #[arg(long)]
    pub strategy: Option<StrategyKind>,

    /// Per-core bounds as N:MIN:MAX:THRESHOLD (repeatable)
    #[arg(long = "core", value_name = "N:MIN:MAX:THRESHOLD", value_parser = parse_core_spec)]
    pub cores: Vec<CoreConfig>,

    /// Manual strategy breakpoint as LOAD:MV (repeatable)
    #[arg(long = "manual-point", value_name = "LOAD:MV", value_parser = parse_voltage_point)]
    pub manual_points: Vec<VoltagePoint>,

    /// Load sampling interval
    #[arg(long, value_name = "MS")]
    pub sample_interval_ms: Option<u64>,

    /// Status stream interval
    #[arg(long, value_name = "MS")]
    pub status_interval_ms: Option<u64>,

    /// Target changes smaller than this are held during the dwell time
    #[arg(long, value_name = "MV")]
    pub dead_band_mv: Option<i32>,

    /// Minimum time between accepted small target changes
    #[arg(long, value_name = "MS")]
    pub min_dwell_ms: Option<u64>,

    /// Largest offset change per tick
    #[arg(long, value_name = "MV")]
    pub ramp_step_mv: Option<i32>,

    /// Stall timeout for the control loop watchdog
    #[arg(long, value_name = "SECS")]
    pub watchdog_timeout_secs: Option<u64>,

    /// Most negative offset ever applied
    #[arg(long, value_name = "MV", allow_hyphen_values = true)]
    pub safety_floor_mv: Option<i32>,

    /// Voltage actuator binary
    #[arg(long, value_name = "PATH")]
    pub actuator_path: Option<PathBuf>,

    /// Deadline for one actuator call
    #[arg(long, value_name = "MS")]
    pub actuator_timeout_ms: Option<u64>,

    /// Take manual control of the fan
    #[arg(long)]
    pub fan_control: bool,

    /// Fan curve point as TEMP:PERCENT (repeatable, replaces the curve)
    #[arg(long = "fan-curve", value_name = "TEMP:PERCENT", value_parser = parse_fan_point)]
    pub fan_curve: Vec<FanCurvePoint>,

    /// Temperature forcing full fan duty
    #[arg(long, value_name = "CELSIUS")]
    pub fan_critical_temp: Option<f32>,

    /// Drop below the critical temperature needed to leave full duty
    #[arg(long, value_name = "CELSIUS")]
    pub fan_override_hysteresis: Option<f32>,

    /// hwmon directory of the fan (discovered by name if omitted)
    #[arg(long, value_name = "PATH")]
    pub fan_hwmon: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Merge the config file (if any) with the flags and validate
    pub fn into_config(self) -> Result<DaemonConfig> {
        self.into_config_with_default(Path::new(paths::CONFIG_FILE))
    }

    /// As [`Cli::into_config`], reading `default_file` when no `--config` is given
    pub fn into_config_with_default(self, default_file: &Path) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load_file(path)?,
            None if default_file.exists() => DaemonConfig::load_file(default_file)?,
            None => DaemonConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(self, config: &mut DaemonConfig) {
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        for core in self.cores {
            config.set_core(core);
        }
        if !self.manual_points.is_empty() {
            config.manual_points = self.manual_points;
        }
        if let Some(ms) = self.sample_interval_ms {
            config.sample_interval_ms = ms;
        }
        if let Some(ms) = self.status_interval_ms {
            config.status_interval_ms = ms;
        }
        if let Some(mv) = self.dead_band_mv {
            config.dead_band_mv = mv;
        }
        if let Some(ms) = self.min_dwell_ms {
            config.min_dwell_ms = ms;
        }
        if let Some(mv) = self.ramp_step_mv {
            config.ramp_step_mv = mv;
        }
        if let Some(secs) = self.watchdog_timeout_secs {
            config.watchdog_timeout_secs = secs;
        }
        if let Some(mv) = self.safety_floor_mv {
            config.safety_floor_mv = mv;
        }
        if let Some(path) = self.actuator_path {
            config.actuator_path = path;
        }
        if let Some(ms) = self.actuator_timeout_ms {
            config.actuator_timeout_ms = ms;
        }
        if self.fan_control {
            config.fan.enabled = true;
        }
        if !self.fan_curve.is_empty() {
            config.fan.curve = self.fan_curve;
        }
        if let Some(temp) = self.fan_critical_temp {
            config.fan.critical_temp_c = temp;
        }
        if let Some(margin) = self.fan_override_hysteresis {
            config.fan.override_hysteresis_c = margin;
        }
        if let Some(path) = self.fan_hwmon {
            config.fan.hwmon_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_default() -> PathBuf {
        PathBuf::from("/nonexistent/deckvolt/config.json")
    }

    fn parse(args: &[&str]) -> Result<DaemonConfig> {
        let mut argv = vec!["deckvoltd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
            .expect("arguments parse")
            .into_config_with_default(&no_default())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_core_and_strategy_overrides() {
        let config = parse(&["--strategy", "aggressive", "--core", "2:-10:-30:60", "--safety-floor-mv", "-40"]).unwrap();
        assert_eq!(config.strategy, StrategyKind::Aggressive);
        assert_eq!(config.cores[2], CoreConfig::new(2, -10, -30, 60.0));
        assert_eq!(config.safety_floor_mv, -40);
    }

    #[test]
    fn test_manual_points_and_fan() {
        let config = parse(&[
            "--strategy", "manual",
            "--manual-point", "0:-30",
            "--manual-point", "100:-10",
            "--fan-control",
            "--fan-curve", "40:20",
            "--fan-curve", "80:90",
            "--fan-critical-temp", "88",
        ])
        .unwrap();
        assert_eq!(config.manual_points.len(), 2);
        assert!(config.fan.enabled);
        assert_eq!(config.fan.curve[1], FanCurvePoint::new(80.0, 90.0));
        assert_eq!(config.fan.critical_temp_c, 88.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse(&["--sample-interval-ms", "1"]).is_err());
        assert!(parse(&["--core", "0:-200:-30:50"]).is_err());
        assert!(parse(&["--strategy", "manual"]).is_err());
        assert!(parse(&["--fan-curve", "50:20"]).is_err());
        assert!(Cli::try_parse_from(["deckvoltd", "--core", "0:x"]).is_err());
        assert!(Cli::try_parse_from(["deckvoltd", "--strategy", "turbo"]).is_err());
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"strategy": "conservative", "status_interval_ms": 500}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "deckvoltd",
            "--config",
            file.path().to_str().unwrap(),
            "--status-interval-ms",
            "2000",
        ])
        .unwrap();
        let config = cli.into_config_with_default(&no_default()).unwrap();
        assert_eq!(config.strategy, StrategyKind::Conservative);
        assert_eq!(config.status_interval_ms, 2000);
    }

    #[test]
    fn test_unknown_file_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"turbo": true}}"#).unwrap();
        let cli = Cli::try_parse_from(["deckvoltd", "--config", file.path().to_str().unwrap()]).unwrap();
        assert!(cli.into_config_with_default(&no_default()).is_err());
    }
}
