//! Fan Control
//!
//! Drives the handheld fan from the APU temperature through the
//! [`FanGovernor`] state machine.
//!
//! # Safety Features
//! - **Fail-safe default**: full duty until a temperature has been read
//! - **Hard override**: full duty on the same tick the cutoff is crossed
//! - **Single release**: firmware control is restored exactly once, from
//!   whichever path gets there first (shutdown, watchdog, panic hook, drop)
//! - **Bounded I/O**: a sensor read or duty write that hangs fails the tick
//!   after `FAN_IO_TIMEOUT` instead of stalling the control loop
//! - **Error counting**: consecutive sensor and write failures are tracked

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use dv_core::constants::{pwm, timing};
use dv_core::hw;
use dv_core::{FanCurve, FanDecision, FanGovernor, FanGovernorSettings, HwmonFanPaths};
use dv_error::{DeckvoltError, Result};
use dv_protocol::{FanMode, FanStatus};

/// Maximum consecutive errors before logging escalates
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

// ============================================================================
// Device
// ============================================================================

/// Hardware the fan controller talks to
#[cfg_attr(test, mockall::automock)]
pub trait FanDevice: Send + Sync {
    fn read_temperature(&self) -> Result<f32>;
    /// Take the fan away from firmware control
    fn set_manual(&self) -> Result<()>;
    fn set_pwm(&self, value: u8) -> Result<()>;
    /// Give the fan back to firmware control
    fn restore_automatic(&self) -> Result<()>;
    fn describe(&self) -> String;
}

/// Fan exposed through a hwmon directory
#[derive(Debug, Clone)]
pub struct HwmonFan {
    paths: HwmonFanPaths,
}

impl HwmonFan {
    pub fn new(paths: HwmonFanPaths) -> Result<Self> {
        paths.verify()?;
        Ok(Self { paths })
    }

    /// Locate the handheld fan by hwmon device name
    pub fn discover(base: &std::path::Path) -> Result<Self> {
        let dir = hw::find_hwmon_by_name(base, dv_core::constants::fan::HWMON_NAMES)?;
        Self::new(HwmonFanPaths::in_dir(dir))
    }

    pub fn paths(&self) -> &HwmonFanPaths {
        &self.paths
    }
}

impl FanDevice for HwmonFan {
    fn read_temperature(&self) -> Result<f32> {
        hw::read_temperature(&self.paths.temp_input)
    }

    fn set_manual(&self) -> Result<()> {
        hw::set_pwm_enable(&self.paths.enable, pwm::enable::MANUAL)
    }

    fn set_pwm(&self, value: u8) -> Result<()> {
        hw::set_pwm_value(&self.paths.pwm, value)
    }

    fn restore_automatic(&self) -> Result<()> {
        hw::restore_automatic(&self.paths.enable)
    }

    fn describe(&self) -> String {
        self.paths.dir.display().to_string()
    }
}

// ============================================================================
// Shared mode and release
// ============================================================================

/// Fan mode readable from any thread
#[derive(Debug, Clone)]
pub struct FanModeCell(Arc<AtomicU8>);

impl FanModeCell {
    pub fn new(mode: FanMode) -> Self {
        Self(Arc::new(AtomicU8::new(mode.to_u8())))
    }

    pub fn get(&self) -> FanMode {
        FanMode::from_u8(self.0.load(Ordering::SeqCst)).unwrap_or(FanMode::Startup)
    }

    pub fn set(&self, mode: FanMode) {
        self.0.store(mode.to_u8(), Ordering::SeqCst);
    }
}

impl Default for FanModeCell {
    fn default() -> Self {
        Self::new(FanMode::Startup)
    }
}

/// Owner of all writes to the fan device
///
/// Writes and the release share one lock, so no duty-cycle write can land
/// after firmware control has been restored.
pub struct FanRelease {
    device: Arc<dyn FanDevice>,
    released: Mutex<bool>,
    mode: FanModeCell,
}

impl FanRelease {
    pub fn new(device: Arc<dyn FanDevice>, mode: FanModeCell) -> Self {
        Self {
            device,
            released: Mutex::new(false),
            mode,
        }
    }

    pub fn mode(&self) -> &FanModeCell {
        &self.mode
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    pub fn read_temperature(&self) -> Result<f32> {
        self.device.read_temperature()
    }

    /// Publish the controller's mode unless the fan has been released
    ///
    /// Shares the release lock, so `RestoredToAutomatic` is never overwritten.
    pub fn record_mode(&self, mode: FanMode) {
        let released = self.released.lock();
        if !*released {
            self.mode.set(mode);
        }
    }

    pub fn take_manual(&self) -> Result<()> {
        let released = self.released.lock();
        if *released {
            return Err(DeckvoltError::fan_device(self.device.describe(), "already released"));
        }
        self.device.set_manual()
    }

    /// Write a duty cycle unless the fan has been released
    pub fn write_pwm(&self, value: u8) -> Result<()> {
        let released = self.released.lock();
        if *released {
            return Err(DeckvoltError::fan_device(self.device.describe(), "already released"));
        }
        self.device.set_pwm(value)
    }

    /// Restore firmware control; later calls are no-ops
    ///
    /// Returns true if this call performed the release.
    pub fn release(&self) -> bool {
        let mut released = self.released.lock();
        if *released {
            return false;
        }
        *released = true;

        let result = self.device.restore_automatic().or_else(|e| {
            warn!("Fan restore failed ({}), retrying once", e);
            self.device.restore_automatic()
        });
        match result {
            Ok(()) => info!("SHUTDOWN: Fan {} returned to automatic control", self.device.describe()),
            Err(e) => error!("SHUTDOWN: Could not return fan to automatic control: {}", e),
        }
        self.mode.set(FanMode::RestoredToAutomatic);
        true
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Per-tick fan control with all sysfs I/O moved off the runtime thread
pub struct FanController {
    governor: FanGovernor,
    release: Arc<FanRelease>,
    consecutive_errors: u32,
    last_decision: Option<FanDecision>,
}

impl FanController {
    pub fn new(curve: FanCurve, settings: FanGovernorSettings, release: Arc<FanRelease>) -> Self {
        release.mode().set(FanMode::Startup);
        Self {
            governor: FanGovernor::new(curve, settings),
            release,
            consecutive_errors: 0,
            last_decision: None,
        }
    }

    pub fn release_handle(&self) -> Arc<FanRelease> {
        self.release.clone()
    }

    pub fn mode(&self) -> FanMode {
        self.governor.mode()
    }

    pub fn temperature(&self) -> Option<f32> {
        self.governor.last_temperature()
    }

    /// Switch the device to manual control
    pub async fn start(&self) -> Result<()> {
        let release = self.release.clone();
        tokio::task::spawn_blocking(move || release.take_manual())
            .await
            .map_err(|e| DeckvoltError::generic(format!("fan start task panicked: {}", e)))??;
        info!("Fan control active (manual mode)");
        Ok(())
    }

    /// Run one fan tick
    pub async fn tick(&mut self) -> FanDecision {
        if self.release.is_released() {
            self.governor.mark_released();
        }

        let release = self.release.clone();
        let reading = blocking_io("temperature read", move || release.read_temperature()).await;

        let reading = match reading {
            Ok(temp) if temp.is_finite() => Some(temp),
            Ok(temp) => {
                self.note_error(&format!("non-finite temperature {}", temp));
                None
            }
            Err(e) => {
                self.note_error(&e.to_string());
                None
            }
        };

        let decision = self.governor.update(reading);
        if decision.write {
            let release = self.release.clone();
            let value = decision.pwm;
            let written = blocking_io("PWM write", move || release.write_pwm(value)).await;
            match written {
                Ok(()) => {
                    debug!(pwm = value, mode = ?decision.mode, "Fan duty written");
                    if reading.is_some() {
                        self.clear_errors();
                    }
                }
                Err(e) => {
                    self.governor.mark_write_failed();
                    self.note_error(&e.to_string());
                }
            }
        } else if reading.is_some() {
            self.clear_errors();
        }

        if self.last_decision.map(|d| d.mode) != Some(decision.mode) {
            info!("Fan mode: {:?}", decision.mode);
        }
        self.release.record_mode(decision.mode);
        self.last_decision = Some(decision);
        decision
    }

    /// Snapshot for the status stream
    pub fn status(&self) -> FanStatus {
        let mode = self.release.mode().get();
        let pwm_value = self.last_decision.map(|d| d.pwm).unwrap_or(pwm::MAX_VALUE);
        FanStatus {
            mode,
            pwm: pwm_value,
            percent: pwm::to_percent(pwm_value).round() as u8,
            temperature_c: self.governor.last_temperature(),
        }
    }

    fn note_error(&mut self, message: &str) {
        self.consecutive_errors += 1;
        if self.consecutive_errors == 1 || self.consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
            warn!("Fan control error (count: {}): {}", self.consecutive_errors, message);
        }
    }

    fn clear_errors(&mut self) {
        if self.consecutive_errors > 0 {
            debug!("Fan control recovered after {} errors", self.consecutive_errors);
            self.consecutive_errors = 0;
        }
    }
}

/// Run one blocking fan operation with a deadline
///
/// A timed-out operation keeps running on the blocking pool; its result is
/// discarded and the tick treats it as a failure.
async fn blocking_io<T, F>(what: &str, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(timing::FAN_IO_TIMEOUT, tokio::task::spawn_blocking(op)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(DeckvoltError::generic(format!("{} task panicked: {}", what, e))),
        Err(_) => Err(DeckvoltError::generic(format!(
            "{} timed out after {} ms",
            what,
            timing::FAN_IO_TIMEOUT.as_millis()
        ))),
    }
}

impl Drop for FanController {
    fn drop(&mut self) {
        self.release.release();
    }
}
