//! Control loop watchdog
//!
//! The control loop stamps a [`Heartbeat`] after every tick. A plain OS
//! thread, independent of the async runtime, checks the stamp and fires its
//! stall handler once if the loop has been silent longer than the timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use dv_error::DeckvoltError;

/// Last time the control loop made progress
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn beat(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::SeqCst);
    }

    /// Time since the last beat (or since creation)
    pub fn silence(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::SeqCst)))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback run once when a stall is detected
pub type StallHandler = Box<dyn FnOnce(Duration) + Send + 'static>;

/// Running watchdog thread
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start watching `heartbeat`
    pub fn spawn(heartbeat: Arc<Heartbeat>, timeout: Duration, poll: Duration, on_stall: StallHandler) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = std::thread::Builder::new()
            .name("deckvolt-watchdog".into())
            .spawn(move || {
                debug!("Watchdog armed (timeout {:?})", timeout);
                while !stop_flag.load(Ordering::SeqCst) {
                    std::thread::sleep(poll);
                    let silence = heartbeat.silence();
                    if silence > timeout && !stop_flag.load(Ordering::SeqCst) {
                        let stall = DeckvoltError::Stall {
                            elapsed_ms: silence.as_millis() as u64,
                            timeout_ms: timeout.as_millis() as u64,
                        };
                        error!("WATCHDOG: {}", stall);
                        on_stall(silence);
                        return;
                    }
                }
                debug!("Watchdog disarmed");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Disarm and join the thread
    pub fn stop(mut self) {
        self.disarm();
    }

    fn disarm(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_heartbeat_silence_resets() {
        let hb = Heartbeat::new();
        std::thread::sleep(Duration::from_millis(30));
        assert!(hb.silence() >= Duration::from_millis(25));
        hb.beat();
        assert!(hb.silence() < Duration::from_millis(25));
    }

    #[test]
    fn test_fires_on_stall() {
        let hb = Arc::new(Heartbeat::new());
        let (tx, rx) = mpsc::channel();
        let _wd = Watchdog::spawn(
            hb,
            Duration::from_millis(100),
            Duration::from_millis(10),
            Box::new(move |silence| {
                let _ = tx.send(silence);
            }),
        )
        .unwrap();

        let silence = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(silence > Duration::from_millis(100));
        // fires once
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_quiet_while_beating() {
        let hb = Arc::new(Heartbeat::new());
        let (tx, rx) = mpsc::channel();
        let wd = Watchdog::spawn(
            hb.clone(),
            Duration::from_millis(200),
            Duration::from_millis(10),
            Box::new(move |silence| {
                let _ = tx.send(silence);
            }),
        )
        .unwrap();

        for _ in 0..30 {
            hb.beat();
            std::thread::sleep(Duration::from_millis(10));
        }
        wd.stop();
        assert!(rx.try_recv().is_err());
    }
}
