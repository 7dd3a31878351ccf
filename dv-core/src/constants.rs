//! Constants and configuration defaults for deckvolt
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for tuning values.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Per-core CPU time counters
    pub const PROC_STAT: &str = "/proc/stat";

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// Base path for per-CPU cpufreq directories
    pub const CPU_BASE: &str = "/sys/devices/system/cpu";

    /// Presence of this socket means journald is available
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

    /// Optional system-wide configuration file
    pub const CONFIG_FILE: &str = "/etc/deckvolt/config.json";

    /// Voltage actuator binary, resolved through PATH unless absolute
    pub const DEFAULT_ACTUATOR: &str = "ryzenadj";
}

/// Core topology
pub mod cores {
    /// Number of independently controlled cores
    pub const CORE_COUNT: usize = 4;
}

/// Voltage offset limits (mV, negative = undervolt)
pub mod voltage {
    /// Offsets above zero (overvolt) are never produced
    pub const CEILING_MV: i32 = 0;

    /// Default platform floor when none is configured
    pub const DEFAULT_FLOOR_MV: i32 = -50;

    /// Lowest floor the daemon will accept from configuration
    pub const ABSOLUTE_FLOOR_MV: i32 = -100;

    /// Default least-aggressive offset for a core
    pub const DEFAULT_MIN_MV: i32 = 0;

    /// Default most-aggressive offset for a core
    pub const DEFAULT_MAX_MV: i32 = -25;

    /// Default load threshold (percent) above which offsets move toward max_mv
    pub const DEFAULT_THRESHOLD: f32 = 50.0;

    /// Reset value written on every shutdown path
    pub const RESET_MV: i32 = 0;
}

/// Control loop timing
pub mod timing {
    use super::Duration;

    /// Default load sampling interval (ms)
    pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 50;

    /// Shortest accepted sampling interval (ms)
    pub const MIN_SAMPLE_INTERVAL_MS: u64 = 10;

    /// Longest accepted sampling interval (ms)
    pub const MAX_SAMPLE_INTERVAL_MS: u64 = 5000;

    /// Default status emission interval (ms)
    pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

    /// Shortest accepted status interval (ms)
    pub const MIN_STATUS_INTERVAL_MS: u64 = 100;

    /// Longest accepted status interval (ms)
    pub const MAX_STATUS_INTERVAL_MS: u64 = 60_000;

    /// Fan control tick
    pub const FAN_TICK: Duration = Duration::from_millis(1000);

    /// Deadline for a single fan sysfs read or write
    pub const FAN_IO_TIMEOUT: Duration = Duration::from_millis(500);

    /// How often the watchdog thread checks the heartbeat
    pub const WATCHDOG_POLL: Duration = Duration::from_millis(250);

    /// Deadline for flushing the final status line on shutdown
    pub const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);
}

/// Hysteresis (dead-band) defaults
pub mod hysteresis {
    /// Default dead-band (mV)
    pub const DEFAULT_DEAD_BAND_MV: i32 = 2;

    /// Largest accepted dead-band (mV)
    pub const MAX_DEAD_BAND_MV: i32 = 20;

    /// Default minimum dwell between accepted small changes (ms)
    pub const DEFAULT_MIN_DWELL_MS: u64 = 500;

    /// Longest accepted dwell (ms)
    pub const MAX_MIN_DWELL_MS: u64 = 60_000;
}

/// Ramp limiter defaults
pub mod ramp {
    /// Default voltage step per tick (mV)
    pub const DEFAULT_STEP_MV: i32 = 1;

    /// Smallest accepted step (mV)
    pub const MIN_STEP_MV: i32 = 1;

    /// Largest accepted step (mV)
    pub const MAX_STEP_MV: i32 = 9;
}

/// Actuation executor parameters
pub mod actuation {
    /// Default per-call deadline (ms)
    pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

    /// Shortest accepted deadline (ms)
    pub const MIN_TIMEOUT_MS: u64 = 100;

    /// Longest accepted deadline (ms)
    pub const MAX_TIMEOUT_MS: u64 = 10_000;

    /// Attempts per batch, including the first
    pub const MAX_ATTEMPTS: u32 = 3;

    /// First retry delay, doubled on every further retry (ms)
    pub const INITIAL_BACKOFF_MS: u64 = 100;

    /// Exhausted batches in a row before the warning escalates to error
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

    /// Poll interval while waiting on the actuator subprocess (ms)
    pub const CHILD_POLL_MS: u64 = 5;
}

/// Watchdog parameters
pub mod watchdog {
    /// Default stall timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    /// Shortest accepted timeout (seconds)
    pub const MIN_TIMEOUT_SECS: u64 = 2;

    /// Longest accepted timeout (seconds)
    pub const MAX_TIMEOUT_SECS: u64 = 300;
}

/// PWM control constants
pub mod pwm {
    /// Minimum PWM value
    pub const MIN_VALUE: u8 = 0;

    /// Maximum PWM value (full speed)
    pub const MAX_VALUE: u8 = 255;

    /// Writes changing the duty cycle by less than this are skipped
    pub const MIN_CHANGE: u8 = 3;

    /// PWM enable values
    pub mod enable {
        /// Manual PWM control
        pub const MANUAL: u8 = 1;
        /// Automatic/firmware control
        pub const AUTOMATIC: u8 = 2;
    }

    /// Convert percentage (0-100) to PWM value (0-255)
    #[inline]
    pub fn from_percent(percent: f32) -> u8 {
        ((percent.clamp(0.0, 100.0) / 100.0) * 255.0).round() as u8
    }

    /// Convert PWM value (0-255) to percentage (0-100)
    #[inline]
    pub fn to_percent(value: u8) -> f32 {
        (value as f32 / 255.0) * 100.0
    }
}

/// Fan controller parameters
pub mod fan {
    /// hwmon device names that expose the handheld fan
    pub const HWMON_NAMES: &[&str] = &["jupiter", "galileo"];

    /// Default critical cutoff (°C)
    pub const DEFAULT_CRITICAL_TEMP_C: f32 = 90.0;

    /// Accepted critical cutoff range (°C)
    pub const MIN_CRITICAL_TEMP_C: f32 = 70.0;
    pub const MAX_CRITICAL_TEMP_C: f32 = 105.0;

    /// Default drop below the cutoff required to leave override (°C)
    pub const DEFAULT_OVERRIDE_HYSTERESIS_C: f32 = 5.0;

    /// Accepted override hysteresis range (°C)
    pub const MIN_OVERRIDE_HYSTERESIS_C: f32 = 1.0;
    pub const MAX_OVERRIDE_HYSTERESIS_C: f32 = 20.0;

    /// Temperature at which the high-temperature floor applies (°C)
    pub const HIGH_TEMP_C: f32 = 85.0;

    /// Minimum duty cycle at or above HIGH_TEMP_C (percent)
    pub const HIGH_TEMP_MIN_PERCENT: f32 = 80.0;

    /// Default curve temperature dead-band (°C)
    pub const DEFAULT_TEMP_DEAD_BAND_C: f32 = 2.0;

    /// Samples in the temperature moving average
    pub const SMOOTHING_WINDOW: usize = 5;

    /// Default duty cycle change per fan tick (percent)
    pub const DEFAULT_RAMP_STEP_PERCENT: f32 = 5.0;

    /// Epsilon for floating-point comparisons
    pub const FLOAT_EPSILON: f32 = 0.001;

    /// Duty cycle used when no temperature has ever been read (100% for safety)
    pub const FALLBACK_PERCENT: f32 = 100.0;

    /// Default curve: (temperature °C, duty percent)
    pub const DEFAULT_CURVE: &[(f32, f32)] = &[
        (40.0, 20.0),
        (50.0, 30.0),
        (60.0, 45.0),
        (70.0, 60.0),
        (80.0, 80.0),
        (85.0, 100.0),
    ];
}

/// Configuration limits
pub mod limits {
    /// Maximum configuration file size (64KB)
    pub const MAX_CONFIG_SIZE: u64 = 64 * 1024;

    /// Maximum number of curve points (fan or manual voltage)
    pub const MAX_CURVE_POINTS: usize = 16;

    /// Minimum number of curve points
    pub const MIN_CURVE_POINTS: usize = 2;

    /// Maximum valid temperature for fan curve points (°C)
    pub const MAX_CURVE_TEMPERATURE: f32 = 105.0;
}

/// Process exit codes
pub mod exit_codes {
    /// Normal stop requested by the supervisor
    pub const OK: i32 = 0;
    /// Invalid arguments or configuration
    pub const CONFIG: i32 = 1;
    /// Voltage actuator binary not found
    pub const ACTUATOR_MISSING: i32 = 3;
    /// Unrecoverable runtime fault or panic
    pub const FAULT: i32 = 4;
    /// Watchdog detected a stalled control loop
    pub const WATCHDOG: i32 = 5;
    /// Not running as root
    pub const NOT_ROOT: i32 = 6;
}
