//! Voltage actuation
//!
//! Per-core offsets are applied by running the `ryzenadj` tool once per batch.
//! Every call is bounded by a deadline and serialized through an
//! [`ActuationGate`]; the asynchronous [`ActuationExecutor`] keeps the control
//! loop free of subprocess waits.
//!
//! # Keep-latest policy
//! At most one batch is in flight. A batch submitted while another is running
//! replaces any batch still waiting, so only the newest values reach hardware.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dv_core::constants::{actuation, voltage};
use dv_error::{DeckvoltError, Result};

// ============================================================================
// Actuator
// ============================================================================

/// Something that can apply a batch of per-core offsets
#[cfg_attr(test, mockall::automock)]
pub trait VoltageActuator: Send + Sync {
    /// Apply `offsets_mv[i]` to core `i`, returning within `timeout`
    fn apply(&self, offsets_mv: &[i32], timeout: Duration) -> Result<()>;
}

/// Runs the `ryzenadj` binary with one `--set-coper-N` pair per core
#[derive(Debug, Clone)]
pub struct RyzenadjActuator {
    binary: PathBuf,
}

impl RyzenadjActuator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Resolve the binary, searching PATH for bare names
    ///
    /// Fails with `HardwareNotFound` when nothing executable is found.
    pub fn locate(binary: &Path) -> Result<Self> {
        if binary.components().count() > 1 || binary.is_absolute() {
            if binary.is_file() {
                return Ok(Self::new(binary));
            }
            return Err(DeckvoltError::HardwareNotFound(format!(
                "actuator binary not found: {}",
                binary.display()
            )));
        }

        let search = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&search)
            .map(|dir| dir.join(binary))
            .find(|candidate| candidate.is_file())
            .map(Self::new)
            .ok_or_else(|| {
                DeckvoltError::HardwareNotFound(format!("{} not found in PATH", binary.display()))
            })
    }

    /// Command-line arguments for one batch
    ///
    /// The tool takes magnitudes; every offset is an undervolt.
    pub fn build_args(offsets_mv: &[i32]) -> Vec<String> {
        let mut args = Vec::with_capacity(offsets_mv.len() * 2);
        for (core, mv) in offsets_mv.iter().enumerate() {
            args.push(format!("--set-coper-{}", core));
            args.push(mv.unsigned_abs().to_string());
        }
        args
    }
}

impl VoltageActuator for RyzenadjActuator {
    fn apply(&self, offsets_mv: &[i32], timeout: Duration) -> Result<()> {
        check_envelope(offsets_mv)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(Self::build_args(offsets_mv));
        debug!(binary = %self.binary.display(), ?offsets_mv, "Running actuator");
        run_with_deadline(cmd, timeout)
    }
}

/// Reject overvolt requests before anything is spawned
fn check_envelope(offsets_mv: &[i32]) -> Result<()> {
    match offsets_mv.iter().find(|mv| **mv > voltage::CEILING_MV) {
        Some(&value_mv) => Err(DeckvoltError::HardwareLimit {
            value_mv,
            floor_mv: voltage::ABSOLUTE_FLOOR_MV,
            ceiling_mv: voltage::CEILING_MV,
        }),
        None => Ok(()),
    }
}

/// Spawn `cmd` and wait for it, killing the child once `timeout` passes
fn run_with_deadline(mut cmd: Command, timeout: Duration) -> Result<()> {
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| DeckvoltError::actuation(format!("failed to spawn actuator: {}", e)))?;
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(actuation::CHILD_POLL_MS);

    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(DeckvoltError::actuation(format!(
                    "actuator exited with {}: {}",
                    status,
                    stderr.trim()
                )));
            }
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DeckvoltError::ActuationTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(None) => std::thread::sleep(poll),
            Err(e) => {
                let _ = child.kill();
                return Err(DeckvoltError::actuation(format!("failed to wait for actuator: {}", e)));
            }
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

/// Serializes actuator calls and blocks new ones once shutdown begins
///
/// The shutdown path closes the gate, waits for any in-flight call, and then
/// performs the final reset itself.
#[derive(Debug, Default)]
pub struct ActuationGate {
    lock: Mutex<()>,
    closed: AtomicBool,
}

impl ActuationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` unless the gate is closed
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock();
        if self.is_closed() {
            return Err(DeckvoltError::GateClosed("shutdown in progress".into()));
        }
        f()
    }

    /// Close the gate, wait up to `wait` for an in-flight call, then run `f`
    pub fn close_and_run<T>(&self, wait: Duration, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.closed.store(true, Ordering::SeqCst);
        let guard = self.lock.try_lock_for(wait);
        if guard.is_none() {
            warn!("In-flight actuation did not finish within {:?}; resetting anyway", wait);
        }
        f()
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Retry policy of the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(actuation::DEFAULT_TIMEOUT_MS),
            max_attempts: actuation::MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(actuation::INITIAL_BACKOFF_MS),
        }
    }
}

/// Result of one submitted batch, sent back to the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuationOutcome {
    Applied {
        offsets_mv: Vec<i32>,
        attempts: u32,
    },
    Failed {
        /// Offsets last confirmed on hardware
        confirmed_mv: Vec<i32>,
        error: String,
        consecutive_failures: u32,
    },
}

/// Handle to the executor task
pub struct ActuationExecutor {
    requests: watch::Sender<Option<Vec<i32>>>,
    task: JoinHandle<()>,
}

impl ActuationExecutor {
    /// Start the executor task
    ///
    /// `confirmed_mv` is what hardware is assumed to hold at start (all zero).
    pub fn spawn(
        actuator: Arc<dyn VoltageActuator>,
        gate: Arc<ActuationGate>,
        settings: ExecutorSettings,
        confirmed_mv: Vec<i32>,
        outcomes: mpsc::UnboundedSender<ActuationOutcome>,
    ) -> Self {
        let (requests, rx) = watch::channel(None);
        let worker = Worker {
            actuator,
            gate,
            settings,
            confirmed_mv,
            consecutive_failures: 0,
            outcomes,
        };
        let task = tokio::spawn(worker.run(rx));
        Self { requests, task }
    }

    /// Queue a batch, replacing any batch that has not started yet
    pub fn submit(&self, offsets_mv: Vec<i32>) {
        self.requests.send_replace(Some(offsets_mv));
    }

    /// Stop accepting batches and wait up to `wait` for the task to end
    pub async fn stop(self, wait: Duration) {
        let Self { requests, task } = self;
        drop(requests);
        if tokio::time::timeout(wait, task).await.is_err() {
            warn!("Actuation executor did not stop within {:?}", wait);
        }
    }
}

struct Worker {
    actuator: Arc<dyn VoltageActuator>,
    gate: Arc<ActuationGate>,
    settings: ExecutorSettings,
    confirmed_mv: Vec<i32>,
    consecutive_failures: u32,
    outcomes: mpsc::UnboundedSender<ActuationOutcome>,
}

impl Worker {
    async fn run(mut self, mut rx: watch::Receiver<Option<Vec<i32>>>) {
        debug!("Actuation executor started");
        while rx.changed().await.is_ok() {
            let batch = match rx.borrow_and_update().clone() {
                Some(batch) => batch,
                None => continue,
            };
            if self.gate.is_closed() {
                break;
            }

            let outcome = self.apply_with_retry(batch).await;
            if self.outcomes.send(outcome).is_err() {
                break;
            }
        }
        debug!("Actuation executor stopped");
    }

    async fn apply_with_retry(&mut self, batch: Vec<i32>) -> ActuationOutcome {
        if batch == self.confirmed_mv {
            return ActuationOutcome::Applied {
                offsets_mv: batch,
                attempts: 0,
            };
        }

        let mut backoff = self.settings.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.settings.max_attempts.max(1) {
            let actuator = self.actuator.clone();
            let gate = self.gate.clone();
            let offsets = batch.clone();
            let timeout = self.settings.timeout;

            let result = tokio::task::spawn_blocking(move || gate.run(|| actuator.apply(&offsets, timeout)))
                .await
                .map_err(|e| DeckvoltError::actuation(format!("actuation task panicked: {}", e)))
                .and_then(|r| r);

            match result {
                Ok(()) => {
                    if self.consecutive_failures > 0 {
                        info!("Actuation recovered after {} failed batches", self.consecutive_failures);
                    }
                    self.consecutive_failures = 0;
                    self.confirmed_mv = batch.clone();
                    return ActuationOutcome::Applied {
                        offsets_mv: batch,
                        attempts: attempt,
                    };
                }
                Err(e @ DeckvoltError::GateClosed(_)) => {
                    last_error = e.to_string();
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "ACTION: Actuation attempt failed");
                    last_error = e.to_string();
                    if attempt < self.settings.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= actuation::MAX_CONSECUTIVE_FAILURES {
            error!(
                "ACTION: Actuation failed for {} consecutive batches, holding {:?}: {}",
                self.consecutive_failures, self.confirmed_mv, last_error
            );
        } else {
            warn!("ACTION: Actuation batch abandoned, holding {:?}: {}", self.confirmed_mv, last_error);
        }
        ActuationOutcome::Failed {
            confirmed_mv: self.confirmed_mv.clone(),
            error: last_error,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use mockall::Sequence;

    fn fast_settings() -> ExecutorSettings {
        ExecutorSettings {
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_build_args() {
        assert_eq!(
            RyzenadjActuator::build_args(&[-20, 0, -35, -5]),
            vec![
                "--set-coper-0", "20", "--set-coper-1", "0", "--set-coper-2", "35", "--set-coper-3", "5"
            ]
        );
    }

    #[test]
    fn test_positive_offset_rejected_before_spawn() {
        let actuator = RyzenadjActuator::new("/nonexistent/ryzenadj");
        let err = actuator.apply(&[0, 5, 0, 0], Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DeckvoltError::HardwareLimit { value_mv: 5, .. }));
    }

    #[test]
    fn test_locate_missing_binary() {
        assert!(RyzenadjActuator::locate(Path::new("/nonexistent/ryzenadj")).is_err());
        assert!(RyzenadjActuator::locate(Path::new("definitely-not-a-real-tool-xyz")).is_err());
    }

    #[test]
    fn test_locate_absolute_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("ryzenadj");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        assert_eq!(RyzenadjActuator::locate(&bin).unwrap().binary(), bin.as_path());
    }

    #[test]
    fn test_deadline_kills_slow_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let err = run_with_deadline(cmd, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, DeckvoltError::ActuationTimeout { timeout_ms: 100 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let cmd = Command::new("false");
        assert!(run_with_deadline(cmd, Duration::from_secs(2)).is_err());
        let cmd = Command::new("true");
        assert!(run_with_deadline(cmd, Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_gate_blocks_after_close() {
        let gate = ActuationGate::new();
        assert_eq!(gate.run(|| Ok(1)).unwrap(), 1);
        let reset = gate.close_and_run(Duration::from_millis(10), || Ok("reset")).unwrap();
        assert_eq!(reset, "reset");
        assert!(gate.is_closed());
        assert!(matches!(gate.run(|| Ok(2)), Err(DeckvoltError::GateClosed(_))));
    }

    #[tokio::test]
    async fn test_executor_retries_then_applies() {
        let mut mock = MockVoltageActuator::new();
        let mut seq = Sequence::new();
        mock.expect_apply()
            .with(always(), always())
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DeckvoltError::actuation("busy")));
        mock.expect_apply()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ActuationExecutor::spawn(
            Arc::new(mock),
            Arc::new(ActuationGate::new()),
            fast_settings(),
            vec![0; 4],
            tx,
        );
        executor.submit(vec![-1, -1, -1, -1]);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            outcome,
            ActuationOutcome::Applied {
                offsets_mv: vec![-1, -1, -1, -1],
                attempts: 3
            }
        );
        executor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_executor_exhausted_reports_confirmed() {
        let mut mock = MockVoltageActuator::new();
        mock.expect_apply()
            .times(3)
            .returning(|_, _| Err(DeckvoltError::ActuationTimeout { timeout_ms: 200 }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ActuationExecutor::spawn(
            Arc::new(mock),
            Arc::new(ActuationGate::new()),
            fast_settings(),
            vec![-3; 4],
            tx,
        );
        executor.submit(vec![-4; 4]);

        match rx.recv().await.unwrap() {
            ActuationOutcome::Failed {
                confirmed_mv,
                consecutive_failures,
                ..
            } => {
                assert_eq!(confirmed_mv, vec![-3; 4]);
                assert_eq!(consecutive_failures, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        executor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_executor_skips_unchanged_batch() {
        let mut mock = MockVoltageActuator::new();
        mock.expect_apply().times(0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ActuationExecutor::spawn(
            Arc::new(mock),
            Arc::new(ActuationGate::new()),
            fast_settings(),
            vec![0; 4],
            tx,
        );
        executor.submit(vec![0; 4]);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ActuationOutcome::Applied { attempts: 0, .. }
        ));
        executor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_executor_does_not_retry_closed_gate() {
        let mut mock = MockVoltageActuator::new();
        mock.expect_apply().times(0);

        let gate = Arc::new(ActuationGate::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ActuationExecutor::spawn(Arc::new(mock), gate.clone(), fast_settings(), vec![0; 4], tx);

        gate.close_and_run(Duration::from_millis(10), || Ok(())).unwrap();
        executor.submit(vec![-2; 4]);
        executor.stop(Duration::from_secs(1)).await;
        assert!(rx.recv().await.is_none());
    }
}
