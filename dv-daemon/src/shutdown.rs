//! Safe shutdown sequence
//!
//! Every way out of the daemon (signal, watchdog stall, fault, panic) ends up
//! in [`SafeShutdown::run`]. The first caller performs the sequence; later
//! callers return immediately.
//!
//! Sequence:
//! 1. Close the actuation gate and wait for an in-flight call
//! 2. Apply 0 mV to every core (retried)
//! 3. Return the fan to firmware control
//! 4. Write the final status event with the reason

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use dv_core::constants::{actuation, exit_codes, timing, voltage};
use dv_protocol::{CoreStatus, EventKind, FanStatus, ShutdownReason, StatusEvent};

use crate::actuator::{ActuationGate, VoltageActuator};
use crate::fan_control::FanRelease;
use crate::output::StatusEmitter;

/// Process exit code for a shutdown reason
pub fn exit_code(reason: ShutdownReason) -> i32 {
    match reason {
        ShutdownReason::Signal => exit_codes::OK,
        ShutdownReason::WatchdogStall => exit_codes::WATCHDOG,
        ShutdownReason::Fault | ShutdownReason::Panic => exit_codes::FAULT,
    }
}

fn reason_to_u8(reason: ShutdownReason) -> u8 {
    match reason {
        ShutdownReason::Signal => 1,
        ShutdownReason::WatchdogStall => 2,
        ShutdownReason::Fault => 3,
        ShutdownReason::Panic => 4,
    }
}

fn reason_from_u8(value: u8) -> Option<ShutdownReason> {
    match value {
        1 => Some(ShutdownReason::Signal),
        2 => Some(ShutdownReason::WatchdogStall),
        3 => Some(ShutdownReason::Fault),
        4 => Some(ShutdownReason::Panic),
        _ => None,
    }
}

pub struct SafeShutdown {
    started: AtomicBool,
    reason: AtomicU8,
    actuator: Arc<dyn VoltageActuator>,
    gate: Arc<ActuationGate>,
    actuator_timeout: Duration,
    core_count: usize,
    strategy: String,
    fan: Option<Arc<FanRelease>>,
    emitter: StatusEmitter,
}

impl SafeShutdown {
    pub fn new(
        actuator: Arc<dyn VoltageActuator>,
        gate: Arc<ActuationGate>,
        actuator_timeout: Duration,
        core_count: usize,
        strategy: impl Into<String>,
        fan: Option<Arc<FanRelease>>,
        emitter: StatusEmitter,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            reason: AtomicU8::new(0),
            actuator,
            gate,
            actuator_timeout,
            core_count,
            strategy: strategy.into(),
            fan,
            emitter,
        }
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Reason given by whichever path started the shutdown
    pub fn reason(&self) -> Option<ShutdownReason> {
        reason_from_u8(self.reason.load(Ordering::SeqCst))
    }

    /// Run the shutdown sequence once
    ///
    /// Returns false if another caller already ran it.
    pub fn run(&self, reason: ShutdownReason) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.reason.store(reason_to_u8(reason), Ordering::SeqCst);
        info!("SHUTDOWN: Starting safe shutdown ({})", reason.as_str());

        let reset = self.reset_voltage();
        if let Some(fan) = &self.fan {
            fan.release();
        }

        let event = self.final_event(reset);
        if !self.emitter.emit_final(event, reason, timing::FINAL_FLUSH_TIMEOUT) {
            warn!("SHUTDOWN: Final status event could not be written");
        }
        info!("SHUTDOWN: Complete");
        true
    }

    fn reset_voltage(&self) -> bool {
        let zeros = vec![voltage::RESET_MV; self.core_count];
        let wait = self.actuator_timeout + Duration::from_millis(actuation::INITIAL_BACKOFF_MS);
        let mut backoff = Duration::from_millis(actuation::INITIAL_BACKOFF_MS);

        for attempt in 1..=actuation::MAX_ATTEMPTS {
            let result = if attempt == 1 {
                self.gate
                    .close_and_run(wait, || self.actuator.apply(&zeros, self.actuator_timeout))
            } else {
                self.actuator.apply(&zeros, self.actuator_timeout)
            };
            match result {
                Ok(()) => {
                    info!("SHUTDOWN: Voltage offsets reset to 0 mV");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, "SHUTDOWN: Voltage reset failed: {}", e);
                    if attempt < actuation::MAX_ATTEMPTS {
                        std::thread::sleep(backoff);
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        error!("SHUTDOWN: Could not reset voltage offsets; hardware may retain an undervolt");
        false
    }

    fn final_event(&self, reset: bool) -> StatusEvent {
        let mut event = self.emitter.last_event().unwrap_or_else(|| StatusEvent {
            kind: EventKind::Status,
            seq: 0,
            timestamp_ms: 0,
            uptime_ms: 0,
            strategy: self.strategy.clone(),
            dynamic_active: false,
            degraded: false,
            cores: (0..self.core_count)
                .map(|core| CoreStatus {
                    core_id: core as u8,
                    load: 0.0,
                    voltage_mv: voltage::RESET_MV,
                    target_mv: voltage::RESET_MV,
                    frequency_mhz: None,
                    temperature_c: None,
                })
                .collect(),
            fan: None,
            reason: None,
        });

        event.dynamic_active = false;
        if reset {
            for core in &mut event.cores {
                core.voltage_mv = voltage::RESET_MV;
                core.target_mv = voltage::RESET_MV;
            }
        } else {
            event.degraded = true;
        }
        if let Some(fan) = &self.fan {
            let mode = fan.mode().get();
            event.fan = Some(match event.fan.take() {
                Some(status) => FanStatus { mode, ..status },
                None => FanStatus {
                    mode,
                    pwm: 0,
                    percent: 0,
                    temperature_c: None,
                },
            });
        }
        event
    }
}
