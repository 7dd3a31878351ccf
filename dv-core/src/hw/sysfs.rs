//! sysfs read/write helpers
//!
//! # PWM Values
//!
//! PWM values range from 0 (minimum) to 255 (full speed). `pwm1_enable`
//! selects who drives the fan: 1 = software (manual), 2 = firmware (automatic).
//!
//! # Temperature Values
//!
//! Linux hwmon reports temperatures in millidegrees Celsius.

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::pwm;
use dv_error::{DeckvoltError, Result};

/// File layout of one hwmon fan device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwmonFanPaths {
    pub dir: PathBuf,
    pub pwm: PathBuf,
    pub enable: PathBuf,
    pub temp_input: PathBuf,
}

impl HwmonFanPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            pwm: dir.join("pwm1"),
            enable: dir.join("pwm1_enable"),
            temp_input: dir.join("temp1_input"),
            dir,
        }
    }

    /// Check the control files exist before taking control
    pub fn verify(&self) -> Result<()> {
        for path in [&self.pwm, &self.enable, &self.temp_input] {
            if !path.exists() {
                return Err(DeckvoltError::fan_device(path, "missing control file"));
            }
        }
        Ok(())
    }
}

/// Find the first hwmon directory under `base` whose `name` matches one of `names`
pub fn find_hwmon_by_name(base: &Path, names: &[&str]) -> Result<PathBuf> {
    let entries = fs::read_dir(base).map_err(|source| DeckvoltError::FileRead {
        path: base.to_path_buf(),
        source,
    })?;

    let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    dirs.sort();

    for dir in dirs {
        let name = match fs::read_to_string(dir.join("name")) {
            Ok(n) => n,
            Err(_) => continue,
        };
        if names.iter().any(|wanted| name.trim() == *wanted) {
            return Ok(dir);
        }
    }

    Err(DeckvoltError::HardwareNotFound(format!(
        "no hwmon device named {:?} under {}",
        names,
        base.display()
    )))
}

/// Read a temperature sensor value in degrees Celsius
pub fn read_temperature(temp_path: &Path) -> Result<f32> {
    let content = fs::read_to_string(temp_path)
        .map_err(|e| DeckvoltError::sensor(temp_path.display().to_string(), format!("Failed to read: {}", e)))?;

    let millidegrees = content.trim().parse::<i64>().map_err(|e| {
        DeckvoltError::sensor(
            temp_path.display().to_string(),
            format!("Failed to parse '{}': {}", content.trim(), e),
        )
    })?;

    Ok(millidegrees as f32 / 1000.0)
}

/// Set PWM value directly (0-255)
pub fn set_pwm_value(pwm_path: &Path, value: u8) -> Result<()> {
    fs::write(pwm_path, value.to_string()).map_err(|e| {
        DeckvoltError::fan_device(pwm_path, format!("Failed to write PWM value {}: {}", value, e))
    })
}

/// Write the PWM enable mode (manual or automatic)
pub fn set_pwm_enable(enable_path: &Path, mode: u8) -> Result<()> {
    fs::write(enable_path, mode.to_string()).map_err(|e| {
        DeckvoltError::fan_device(enable_path, format!("Failed to set enable mode {}: {}", mode, e))
    })
}

/// Read current PWM value (0-255)
pub fn read_pwm_value(pwm_path: &Path) -> Result<u8> {
    let content = fs::read_to_string(pwm_path)
        .map_err(|e| DeckvoltError::fan_device(pwm_path, format!("Failed to read: {}", e)))?;

    content.trim().parse::<u8>().map_err(|e| {
        DeckvoltError::fan_device(pwm_path, format!("Failed to parse '{}': {}", content.trim(), e))
    })
}

/// Hand the fan back to firmware control
pub fn restore_automatic(enable_path: &Path) -> Result<()> {
    set_pwm_enable(enable_path, pwm::enable::AUTOMATIC)
}

/// Frequency in MHz from a cpufreq `scaling_cur_freq` file, if readable
pub fn read_frequency_mhz(freq_path: &Path) -> Option<u32> {
    fs::read_to_string(freq_path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|khz| (khz / 1000) as u32)
}
