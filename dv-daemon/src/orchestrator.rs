//! Control loop
//!
//! One task owns all control state and multiplexes four event sources:
//!
//! - **load tick**: sample load, evaluate the strategy, filter, ramp, and hand
//!   a batch to the actuation executor
//! - **fan tick**: run the fan governor once
//! - **status tick**: write a status event
//! - **control messages**: stop requests and forced status (SIGUSR1)
//!
//! The heartbeat is stamped after every tick. Once shutdown has started
//! (from any thread) no further tick runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use dv_core::constants::timing;
use dv_core::hw::read_frequency_mhz;
use dv_core::{
    ControlState, CoreConfig, CounterSource, DaemonConfig, HysteresisController, LoadMonitor,
    RampLimiter, SafetyEnvelope, Strategy,
};
use dv_protocol::{CoreStatus, EventKind, ShutdownReason, StatusEvent};

use crate::actuator::{ActuationExecutor, ActuationGate, ActuationOutcome, ExecutorSettings, VoltageActuator};
use crate::fan_control::FanController;
use crate::output::StatusEmitter;
use crate::shutdown::SafeShutdown;
use crate::watchdog::Heartbeat;

/// Deadline for the executor task to wind down
const EXECUTOR_STOP_WAIT: Duration = Duration::from_millis(500);

/// Messages from signal handlers (or tests) into the loop
pub struct ControlChannels {
    pub stop: mpsc::Receiver<ShutdownReason>,
    pub status_request: mpsc::Receiver<()>,
}

/// Sending side of [`ControlChannels`]
#[derive(Clone)]
pub struct ControlHandle {
    pub stop: mpsc::Sender<ShutdownReason>,
    pub status_request: mpsc::Sender<()>,
}

/// Create a connected handle/channels pair
pub fn control_channels() -> (ControlHandle, ControlChannels) {
    let (stop_tx, stop_rx) = mpsc::channel(4);
    let (status_tx, status_rx) = mpsc::channel(4);
    (
        ControlHandle {
            stop: stop_tx,
            status_request: status_tx,
        },
        ControlChannels {
            stop: stop_rx,
            status_request: status_rx,
        },
    )
}

/// Everything the orchestrator needs from startup
pub struct OrchestratorParts<S: CounterSource> {
    pub config: DaemonConfig,
    pub counters: S,
    pub actuator: Arc<dyn VoltageActuator>,
    pub gate: Arc<ActuationGate>,
    pub fan: Option<FanController>,
    pub heartbeat: Arc<Heartbeat>,
    pub emitter: StatusEmitter,
    pub shutdown: Arc<SafeShutdown>,
    /// Base of the per-CPU cpufreq directories
    pub cpu_base: PathBuf,
}

pub struct Orchestrator<S: CounterSource> {
    config: DaemonConfig,
    cores: Vec<CoreConfig>,
    strategy: Strategy,
    envelope: SafetyEnvelope,
    hysteresis: HysteresisController,
    ramp: RampLimiter,
    monitor: LoadMonitor<S>,
    states: Vec<ControlState>,
    targets: Vec<i32>,
    executor: ActuationExecutor,
    outcomes: mpsc::UnboundedReceiver<ActuationOutcome>,
    pending: bool,
    degraded: bool,
    fan: Option<FanController>,
    heartbeat: Arc<Heartbeat>,
    emitter: StatusEmitter,
    shutdown: Arc<SafeShutdown>,
    cpu_base: PathBuf,
}

impl<S: CounterSource + 'static> Orchestrator<S> {
    /// Build the loop and start the actuation executor
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(parts: OrchestratorParts<S>) -> Self {
        let OrchestratorParts {
            config,
            counters,
            actuator,
            gate,
            fan,
            heartbeat,
            emitter,
            shutdown,
            cpu_base,
        } = parts;

        let mut cores = config.cores.clone();
        cores.sort_by_key(|c| c.core_id);
        let core_count = cores.len();

        let settings = ExecutorSettings {
            timeout: Duration::from_millis(config.actuator_timeout_ms),
            ..ExecutorSettings::default()
        };
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let executor = ActuationExecutor::spawn(actuator, gate, settings, vec![0; core_count], outcome_tx);

        Self {
            strategy: Strategy::from_config(&config),
            envelope: config.envelope(),
            hysteresis: HysteresisController::new(
                config.dead_band_mv,
                Duration::from_millis(config.min_dwell_ms),
            ),
            ramp: RampLimiter::new(config.ramp_step_mv),
            monitor: LoadMonitor::new(counters, core_count),
            states: vec![ControlState::default(); core_count],
            targets: vec![0; core_count],
            executor,
            outcomes,
            pending: false,
            degraded: false,
            fan,
            heartbeat,
            emitter,
            shutdown,
            cpu_base,
            cores,
            config,
        }
    }

    /// Run until a stop request or an external shutdown, then run the safe
    /// shutdown sequence and return the reason
    pub async fn run(mut self, mut channels: ControlChannels) -> ShutdownReason {
        info!(
            "CONTROL: Loop starting: strategy={}, sample={}ms, status={}ms",
            self.strategy.name(),
            self.config.sample_interval_ms,
            self.config.status_interval_ms
        );

        if let Some(fan) = self.fan.take() {
            match fan.start().await {
                Ok(()) => self.fan = Some(fan),
                // dropping the controller hands the fan back to firmware
                Err(e) => warn!("Fan control unavailable: {} - leaving firmware in control", e),
            }
        }

        let mut load_tick = interval(Duration::from_millis(self.config.sample_interval_ms));
        load_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fan_tick = interval(timing::FAN_TICK);
        fan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_tick = interval(Duration::from_millis(self.config.status_interval_ms));
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.heartbeat.beat();

        let reason = loop {
            if let Some(reason) = self.external_shutdown() {
                break reason;
            }

            tokio::select! {
                biased;

                request = channels.stop.recv() => {
                    let reason = request.unwrap_or(ShutdownReason::Signal);
                    info!("SIGNAL: Stop requested ({})", reason.as_str());
                    break reason;
                }
                Some(outcome) = self.outcomes.recv() => {
                    self.handle_outcome(outcome);
                }
                _ = load_tick.tick() => {
                    if self.shutdown.has_started() { continue; }
                    self.control_tick();
                    self.heartbeat.beat();
                }
                _ = fan_tick.tick(), if self.fan.is_some() => {
                    if self.shutdown.has_started() { continue; }
                    if let Some(fan) = self.fan.as_mut() {
                        fan.tick().await;
                    }
                    self.heartbeat.beat();
                }
                _ = status_tick.tick() => {
                    if self.shutdown.has_started() { continue; }
                    self.emit_status();
                    self.heartbeat.beat();
                }
                Some(()) = channels.status_request.recv() => {
                    if self.shutdown.has_started() { continue; }
                    debug!("SIGNAL: Status requested");
                    self.emit_status();
                }
            }
        };

        self.finish(reason).await
    }

    fn external_shutdown(&self) -> Option<ShutdownReason> {
        if self.shutdown.has_started() {
            Some(self.shutdown.reason().unwrap_or(ShutdownReason::Fault))
        } else {
            None
        }
    }

    async fn finish(self, reason: ShutdownReason) -> ShutdownReason {
        let Self {
            executor,
            shutdown,
            fan,
            ..
        } = self;

        let sequence = shutdown.clone();
        match tokio::task::spawn_blocking(move || sequence.run(reason)).await {
            Ok(true) => {}
            Ok(false) => debug!("Shutdown already performed by another path"),
            Err(e) => warn!("Shutdown task failed: {}", e),
        }
        executor.stop(EXECUTOR_STOP_WAIT).await;
        drop(fan);

        shutdown.reason().unwrap_or(reason)
    }

    /// One pass of the voltage pipeline
    fn control_tick(&mut self) {
        let now = Instant::now();
        let loads = self.monitor.sample().to_vec();

        for (index, core) in self.cores.iter().enumerate() {
            let target = self.strategy.target_mv(loads[index], core, &self.envelope);
            self.targets[index] = target;
            self.hysteresis.filter(&mut self.states[index], target, now);
        }

        // A batch is still in flight; this tick's values are dropped
        if self.pending {
            return;
        }

        let batch: Vec<i32> = self
            .states
            .iter_mut()
            .map(|state| {
                let goal = state.last_target_mv.unwrap_or(state.commanded_mv);
                let next = self.ramp.step(state, goal);
                self.envelope.clamp(next)
            })
            .collect();

        let changed = batch
            .iter()
            .zip(&self.states)
            .any(|(mv, state)| *mv != state.last_applied_mv);
        if changed {
            debug!(?batch, "Submitting actuation batch");
            self.executor.submit(batch);
            self.pending = true;
        }
    }

    fn handle_outcome(&mut self, outcome: ActuationOutcome) {
        self.pending = false;
        match outcome {
            ActuationOutcome::Applied { offsets_mv, attempts } => {
                for (state, mv) in self.states.iter_mut().zip(&offsets_mv) {
                    state.confirm_applied(*mv);
                    state.commanded_mv = *mv;
                }
                if self.degraded {
                    info!("Actuation healthy again after {} attempt(s)", attempts);
                }
                self.degraded = false;
            }
            ActuationOutcome::Failed {
                confirmed_mv,
                consecutive_failures,
                ..
            } => {
                for (state, mv) in self.states.iter_mut().zip(&confirmed_mv) {
                    state.confirm_applied(*mv);
                    state.revert_to_applied();
                }
                debug!(consecutive_failures, "Reverted to confirmed offsets");
                self.degraded = true;
            }
        }
    }

    /// Current status as an unstamped event
    pub fn snapshot(&self) -> StatusEvent {
        let temperature = self.fan.as_ref().and_then(|f| f.temperature());
        let loads = self.monitor.loads();
        let cores = self
            .cores
            .iter()
            .enumerate()
            .map(|(index, core)| CoreStatus {
                core_id: core.core_id,
                load: loads.get(index).copied().unwrap_or(0.0),
                voltage_mv: self.states[index].last_applied_mv,
                target_mv: self.targets[index],
                frequency_mhz: read_frequency_mhz(&self.frequency_path(core.core_id)),
                temperature_c: temperature,
            })
            .collect();

        StatusEvent {
            kind: EventKind::Status,
            seq: 0,
            timestamp_ms: 0,
            uptime_ms: 0,
            strategy: self.strategy.name().to_string(),
            dynamic_active: !self.shutdown.has_started(),
            degraded: self.degraded,
            cores,
            fan: self.fan.as_ref().map(|f| f.status()),
            reason: None,
        }
    }

    fn emit_status(&self) {
        if !self.emitter.emit(self.snapshot()) {
            debug!("Status event not written");
        }
    }

    fn frequency_path(&self, core_id: u8) -> PathBuf {
        self.cpu_base
            .join(format!("cpu{}", core_id))
            .join("cpufreq")
            .join("scaling_cur_freq")
    }
}
