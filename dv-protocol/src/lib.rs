//! Status stream types shared between `deckvoltd` and its supervisor.
//!
//! Every event is one JSON object on one line of stdout. Consumers read the
//! stream line by line; anything that is not a complete line is ignored.

use serde::{Deserialize, Serialize};

/// Maximum serialized size of one status line (bytes, newline included)
pub const MAX_EVENT_SIZE: usize = 8 * 1024;

/// Maximum number of cores a status event may describe
pub const MAX_CORES: usize = 16;

/// Discriminates regular periodic reports from the final shutdown report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Shutdown,
}

/// Why the daemon is stopping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    /// Supervisor asked us to stop (SIGTERM/SIGINT)
    Signal,
    /// The control loop stopped sending heartbeats
    WatchdogStall,
    /// An unrecoverable runtime error
    Fault,
    /// A panic unwound through the daemon
    Panic,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Signal => "signal",
            ShutdownReason::WatchdogStall => "watchdog_stall",
            ShutdownReason::Fault => "fault",
            ShutdownReason::Panic => "panic",
        }
    }
}

/// Fan controller state as reported on the stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    /// Taking control of the device
    Startup,
    /// Following the temperature curve
    AutoFollowingCurve,
    /// Temperature above the critical cutoff, fan pinned at maximum
    HardOverride,
    /// Device handed back to firmware control
    RestoredToAutomatic,
}

impl FanMode {
    /// Compact encoding used for lock-free sharing between threads
    pub fn to_u8(self) -> u8 {
        match self {
            FanMode::Startup => 0,
            FanMode::AutoFollowingCurve => 1,
            FanMode::HardOverride => 2,
            FanMode::RestoredToAutomatic => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FanMode::Startup),
            1 => Some(FanMode::AutoFollowingCurve),
            2 => Some(FanMode::HardOverride),
            3 => Some(FanMode::RestoredToAutomatic),
            _ => None,
        }
    }
}

/// Per-core slice of a status event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreStatus {
    pub core_id: u8,
    /// Busy percentage over the last sample window (0-100)
    pub load: f32,
    /// Offset last confirmed applied to hardware (mV, <= 0)
    pub voltage_mv: i32,
    /// Offset the strategy currently wants (mV)
    pub target_mv: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_mhz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
}

/// Fan slice of a status event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FanStatus {
    pub mode: FanMode,
    /// Raw duty cycle (0-255)
    pub pwm: u8,
    /// Duty cycle as percent (0-100)
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
}

/// One line of the status stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Increases by one for every event written
    pub seq: u64,
    /// Wall clock, milliseconds since the Unix epoch, never decreasing
    pub timestamp_ms: i64,
    /// Milliseconds since the daemon started
    pub uptime_ms: u64,
    pub strategy: String,
    /// Whether dynamic voltage control is currently applying offsets
    pub dynamic_active: bool,
    /// Set when the last actuation attempt failed and values were reverted
    pub degraded: bool,
    pub cores: Vec<CoreStatus>,
    /// Absent when fan control is disabled
    pub fan: Option<FanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ShutdownReason>,
}

impl StatusEvent {
    /// Serialize as a single newline-terminated line
    pub fn to_line(&self) -> Result<String, String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| format!("Failed to serialize status event: {}", e))?;
        line.push('\n');
        if line.len() > MAX_EVENT_SIZE {
            return Err(format!(
                "Status event too large: {} bytes (max {})",
                line.len(),
                MAX_EVENT_SIZE
            ));
        }
        Ok(line)
    }

    /// Parse one line of the stream (trailing newline optional)
    pub fn from_line(line: &str) -> Result<Self, String> {
        if line.len() > MAX_EVENT_SIZE {
            return Err("Status line exceeds maximum size".to_string());
        }
        serde_json::from_str(line.trim_end_matches('\n'))
            .map_err(|e| format!("Malformed status line: {}", e))
    }

    /// Check structural invariants before the event is written
    pub fn validate(&self) -> Result<(), String> {
        if self.cores.len() > MAX_CORES {
            return Err(format!("Too many cores: {} (max {})", self.cores.len(), MAX_CORES));
        }
        for core in &self.cores {
            if !(0.0..=100.0).contains(&core.load) || !core.load.is_finite() {
                return Err(format!("Core {} load out of range: {}", core.core_id, core.load));
            }
            if core.voltage_mv > 0 || core.target_mv > 0 {
                return Err(format!("Core {} reports a positive offset", core.core_id));
            }
        }
        if let Some(fan) = &self.fan {
            if fan.percent > 100 {
                return Err(format!("Fan percent out of range: {}", fan.percent));
            }
        }
        match (self.kind, self.reason) {
            (EventKind::Shutdown, None) => Err("Shutdown event without a reason".to_string()),
            (EventKind::Status, Some(_)) => Err("Status event carries a shutdown reason".to_string()),
            _ => Ok(()),
        }
    }
}
