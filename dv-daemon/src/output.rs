//! Status stream writer
//!
//! Status events are serialized on the caller's thread and handed to a
//! dedicated writer thread through a bounded queue, so a slow reader on stdout
//! can never stall the control loop. When the queue is full the event is
//! skipped and counted.
//!
//! Sequence numbers and timestamps are assigned under one lock at enqueue
//! time, which keeps both strictly ordered in the written stream.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use dv_protocol::{EventKind, ShutdownReason, StatusEvent};

/// Events waiting for the writer before new ones are skipped
pub const QUEUE_DEPTH: usize = 16;

/// Lock wait used on the shutdown path
const FINAL_LOCK_WAIT: Duration = Duration::from_millis(200);

enum WriterMessage {
    Line(String),
    Flush(mpsc::Sender<()>),
}

struct EmitState {
    next_seq: u64,
    last_timestamp_ms: i64,
    last_event: Option<StatusEvent>,
}

struct EmitterInner {
    queue: SyncSender<WriterMessage>,
    state: Mutex<EmitState>,
    skipped: AtomicU64,
    origin: Instant,
}

/// Cloneable handle to the status stream
#[derive(Clone)]
pub struct StatusEmitter {
    inner: Arc<EmitterInner>,
}

impl StatusEmitter {
    /// Start a writer thread over `sink`
    ///
    /// The thread exits once every handle has been dropped.
    pub fn spawn<W: Write + Send + 'static>(sink: W) -> std::io::Result<Self> {
        let (queue, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("deckvolt-status".into())
            .spawn(move || writer_loop(sink, rx))?;

        Ok(Self {
            inner: Arc::new(EmitterInner {
                queue,
                state: Mutex::new(EmitState {
                    next_seq: 0,
                    last_timestamp_ms: i64::MIN,
                    last_event: None,
                }),
                skipped: AtomicU64::new(0),
                origin: Instant::now(),
            }),
        })
    }

    /// Events dropped because the queue was full
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Most recent event accepted for writing
    pub fn last_event(&self) -> Option<StatusEvent> {
        self.inner
            .state
            .try_lock_for(FINAL_LOCK_WAIT)
            .and_then(|state| state.last_event.clone())
    }

    /// Queue a periodic status event
    ///
    /// `seq`, `timestamp_ms` and `uptime_ms` are filled in here. Returns false
    /// if the event was skipped.
    pub fn emit(&self, event: StatusEvent) -> bool {
        let mut state = self.inner.state.lock();
        self.stamp_and_queue(&mut state, event, None)
    }

    /// Queue the shutdown event and wait up to `timeout` for it to be written
    pub fn emit_final(&self, mut event: StatusEvent, reason: ShutdownReason, timeout: Duration) -> bool {
        event.kind = EventKind::Shutdown;
        event.reason = Some(reason);

        let deadline = Instant::now() + timeout;
        let queued = match self.inner.state.try_lock_for(FINAL_LOCK_WAIT) {
            Some(mut state) => self.stamp_and_queue(&mut state, event, Some(deadline)),
            None => {
                warn!("Status stream locked; final event not written");
                false
            }
        };
        if !queued {
            return false;
        }

        let (ack_tx, ack_rx) = mpsc::channel();
        if !self.send_until(WriterMessage::Flush(ack_tx), deadline) {
            return false;
        }
        ack_rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .is_ok()
    }

    fn stamp_and_queue(&self, state: &mut EmitState, mut event: StatusEvent, deadline: Option<Instant>) -> bool {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().max(state.last_timestamp_ms);
        event.seq = state.next_seq;
        event.timestamp_ms = timestamp_ms;
        event.uptime_ms = self.inner.origin.elapsed().as_millis() as u64;

        if let Err(e) = event.validate() {
            warn!("Refusing to write invalid status event: {}", e);
            return false;
        }
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };

        let sent = match deadline {
            Some(deadline) => self.send_until(WriterMessage::Line(line), deadline),
            None => match self.inner.queue.try_send(WriterMessage::Line(line)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let skipped = self.inner.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(skipped, "Status queue full; event skipped");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        };

        if sent {
            state.next_seq += 1;
            state.last_timestamp_ms = timestamp_ms;
            state.last_event = Some(event);
        }
        sent
    }

    fn send_until(&self, mut message: WriterMessage, deadline: Instant) -> bool {
        loop {
            match self.inner.queue.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(m)) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    message = m;
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        }
    }
}

fn writer_loop<W: Write>(mut sink: W, rx: Receiver<WriterMessage>) {
    let mut failures: u64 = 0;
    for message in rx {
        match message {
            WriterMessage::Line(line) => {
                if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
                    failures += 1;
                    if failures == 1 {
                        warn!("Status stream write failed: {}", e);
                    }
                }
            }
            WriterMessage::Flush(ack) => {
                let _ = sink.flush();
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_protocol::CoreStatus;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Sink that blocks until released
    struct GatedSink(Arc<std::sync::Barrier>);

    impl Write for GatedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.wait();
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn event() -> StatusEvent {
        StatusEvent {
            kind: EventKind::Status,
            seq: 0,
            timestamp_ms: 0,
            uptime_ms: 0,
            strategy: "balanced".into(),
            dynamic_active: true,
            degraded: false,
            cores: vec![CoreStatus {
                core_id: 0,
                load: 10.0,
                voltage_mv: -5,
                target_mv: -5,
                frequency_mhz: None,
                temperature_c: None,
            }],
            fan: None,
            reason: None,
        }
    }

    fn lines(sink: &SharedSink) -> Vec<StatusEvent> {
        let bytes = sink.0.lock().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| StatusEvent::from_line(l).unwrap())
            .collect()
    }

    #[test]
    fn test_seq_and_timestamps_ordered() {
        let sink = SharedSink::default();
        let emitter = StatusEmitter::spawn(sink.clone()).unwrap();
        for _ in 0..5 {
            assert!(emitter.emit(event()));
        }
        assert!(emitter.emit_final(event(), ShutdownReason::Signal, Duration::from_secs(1)));

        let events = lines(&sink);
        assert_eq!(events.len(), 6);
        for (i, pair) in events.windows(2).enumerate() {
            assert_eq!(pair[1].seq, pair[0].seq + 1, "gap at {}", i);
            assert!(pair[1].timestamp_ms >= pair[0].timestamp_ms);
        }
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Shutdown);
        assert_eq!(last.reason, Some(ShutdownReason::Signal));
    }

    #[test]
    fn test_invalid_event_not_written() {
        let sink = SharedSink::default();
        let emitter = StatusEmitter::spawn(sink.clone()).unwrap();
        let mut bad = event();
        bad.cores[0].voltage_mv = 10;
        assert!(!emitter.emit(bad));
        assert!(emitter.emit(event()));
        assert!(emitter.emit_final(event(), ShutdownReason::Fault, Duration::from_secs(1)));
        // the rejected event did not consume a sequence number
        assert_eq!(lines(&sink)[0].seq, 0);
    }

    #[test]
    fn test_full_queue_skips_without_blocking() {
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let emitter = StatusEmitter::spawn(GatedSink(barrier.clone())).unwrap();

        let started = Instant::now();
        let accepted = (0..QUEUE_DEPTH * 3).filter(|_| emitter.emit(event())).count();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(accepted <= QUEUE_DEPTH + 1);
        assert!(emitter.skipped() > 0);

        // let the writer drain so the thread can finish
        for _ in 0..accepted {
            barrier.wait();
        }
    }

    #[test]
    fn test_last_event_tracks_accepted() {
        let sink = SharedSink::default();
        let emitter = StatusEmitter::spawn(sink).unwrap();
        assert!(emitter.last_event().is_none());
        emitter.emit(event());
        assert_eq!(emitter.last_event().unwrap().seq, 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn prop_written_stream_contiguous(valid in prop::collection::vec(any::<bool>(), 0..40)) {
                let sink = SharedSink::default();
                let emitter = StatusEmitter::spawn(sink.clone()).unwrap();

                let mut accepted = 0;
                for ok in &valid {
                    let mut ev = event();
                    if !ok {
                        ev.cores[0].voltage_mv = 10;
                    }
                    if emitter.emit(ev) {
                        prop_assert!(*ok);
                        accepted += 1;
                    }
                }
                prop_assert!(emitter.emit_final(event(), ShutdownReason::Signal, Duration::from_secs(2)));

                let events = lines(&sink);
                prop_assert_eq!(events.len(), accepted + 1);
                for (i, ev) in events.iter().enumerate() {
                    prop_assert_eq!(ev.seq, i as u64);
                    prop_assert!(ev.cores.iter().all(|c| c.voltage_mv <= 0));
                }
                for pair in events.windows(2) {
                    prop_assert!(pair[1].timestamp_ms >= pair[0].timestamp_ms);
                }
                prop_assert_eq!(events.last().unwrap().kind, EventKind::Shutdown);
            }
        }
    }
}
