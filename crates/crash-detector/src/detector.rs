//! Edge-triggered crash detector
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Armed --rising edge--> Suspended --resume--> Armed
//!   any state --stop--> Stopped (terminal)
//! ```
//!
//! The listener runs synchronously on the detector thread, so at most one
//! crash is being handled at any time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::{DetectorError, Level, TriggerInput};

/// Detector lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Constructed, thread not started
    Idle,
    /// Polling for a rising edge
    Armed,
    /// Fired; input ignored until resumed
    Suspended,
    Stopped,
}

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Interval between two samples of the input
    pub poll_interval: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Receives crash events on the detector thread
pub trait CrashListener: Send + Sync {
    /// Called once per rising edge; the detector stays suspended until
    /// [`DetectorHandle::resume`] is called
    fn on_crash(&self, detector: &DetectorHandle);
}

struct Shared {
    state: Mutex<DetectorState>,
    changed: Condvar,
}

/// Cloneable control handle over a detector's state
#[derive(Clone)]
pub struct DetectorHandle {
    shared: Arc<Shared>,
}

impl DetectorHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DetectorState::Idle),
                changed: Condvar::new(),
            }),
        }
    }

    /// Rearm after a crash (no-op unless suspended)
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if *state == DetectorState::Suspended {
            *state = DetectorState::Armed;
            self.shared.changed.notify_all();
            info!(target: "crash_detector", "Detector rearmed");
        }
    }

    pub fn state(&self) -> DetectorState {
        *self.shared.state.lock()
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == DetectorState::Suspended
    }

    fn transition(&self, from: DetectorState, to: DetectorState) -> bool {
        let mut state = self.shared.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        self.shared.changed.notify_all();
        true
    }

    fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        let was_stopped = *state == DetectorState::Stopped;
        *state = DetectorState::Stopped;
        self.shared.changed.notify_all();
        !was_stopped
    }
}

/// Crash detector owning the polling thread
pub struct CrashDetector {
    config: DetectorConfig,
    handle: DetectorHandle,
    trigger: Mutex<Option<Box<dyn TriggerInput>>>,
    listener: Arc<dyn CrashListener>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CrashDetector {
    pub fn new(
        config: DetectorConfig,
        trigger: Box<dyn TriggerInput>,
        listener: Arc<dyn CrashListener>,
    ) -> Self {
        Self {
            config,
            handle: DetectorHandle::new(),
            trigger: Mutex::new(Some(trigger)),
            listener,
            thread: Mutex::new(None),
        }
    }

    /// Start polling (Idle -> Armed); no-op if already running
    pub fn start(&self) -> Result<(), DetectorError> {
        match self.handle.state() {
            DetectorState::Stopped => return Err(DetectorError::Stopped),
            DetectorState::Armed | DetectorState::Suspended => {
                info!(target: "crash_detector", "Start requested while already running");
                return Ok(());
            }
            DetectorState::Idle => {}
        }

        let trigger = self.trigger.lock().take().ok_or(DetectorError::Stopped)?;
        if !self.handle.transition(DetectorState::Idle, DetectorState::Armed) {
            return Err(DetectorError::Stopped);
        }

        let poller = Poller {
            trigger,
            listener: Arc::clone(&self.listener),
            handle: self.handle.clone(),
            poll_interval: self.config.poll_interval,
        };

        let thread = thread::Builder::new()
            .name("crash-detector".to_string())
            .spawn(move || poller.run())
            .map_err(|e| {
                self.handle.stop();
                DetectorError::Spawn(e.to_string())
            })?;

        *self.thread.lock() = Some(thread);
        info!(
            target: "crash_detector",
            "Detector armed, polling every {:?}",
            self.config.poll_interval
        );
        Ok(())
    }

    /// Rearm after a crash (Suspended -> Armed)
    pub fn resume(&self) {
        self.handle.resume();
    }

    /// Stop polling for good
    ///
    /// Blocks until the thread exits, which includes any crash still being
    /// handled. Called from the listener itself, it only flags the stop.
    pub fn stop(&self) {
        if self.handle.stop() {
            info!(target: "crash_detector", "Detector stopping");
        }

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() == thread::current().id() {
                debug!(target: "crash_detector", "Stop requested from the detector thread");
                return;
            }
            if thread.join().is_err() {
                error!(target: "crash_detector", "Detector thread panicked");
            }
        } else if let Some(mut trigger) = self.trigger.lock().take() {
            trigger.release();
        }
    }

    pub fn state(&self) -> DetectorState {
        self.handle.state()
    }

    /// Handle for rearming from other components
    pub fn handle(&self) -> DetectorHandle {
        self.handle.clone()
    }
}

impl Drop for CrashDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Detector thread state
struct Poller {
    trigger: Box<dyn TriggerInput>,
    listener: Arc<dyn CrashListener>,
    handle: DetectorHandle,
    poll_interval: Duration,
}

impl Poller {
    fn run(mut self) {
        let mut previous = self.sample().unwrap_or(Level::Low);
        let mut resample = false;

        loop {
            {
                let mut state = self.handle.shared.state.lock();
                while *state == DetectorState::Suspended {
                    self.handle.shared.changed.wait(&mut state);
                }
                if *state == DetectorState::Stopped {
                    break;
                }

                self.handle
                    .shared
                    .changed
                    .wait_for(&mut state, self.poll_interval);
                if *state != DetectorState::Armed {
                    continue;
                }
            }

            let Some(level) = self.sample() else {
                continue;
            };

            // A level held across the suspension is not a new edge
            if std::mem::take(&mut resample) {
                previous = level;
                continue;
            }

            let rising = previous == Level::Low && level == Level::High;
            previous = level;
            if !rising {
                continue;
            }

            if !self
                .handle
                .transition(DetectorState::Armed, DetectorState::Suspended)
            {
                continue;
            }

            warn!(target: "crash_detector", "Crash detected on {}", self.trigger.name());
            metrics::counter!("crash_triggers").increment(1);
            self.listener.on_crash(&self.handle);
            resample = true;
        }

        self.trigger.release();
        info!(target: "crash_detector", "Detector stopped");
    }

    fn sample(&mut self) -> Option<Level> {
        match self.trigger.read() {
            Ok(level) => Some(level),
            Err(e) => {
                warn!(target: "crash_detector", "Trigger read failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualTrigger, ScriptedTrigger};
    use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn fast() -> DetectorConfig {
        DetectorConfig {
            poll_interval: Duration::from_millis(2),
        }
    }

    /// Counts crashes and rearms immediately
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl CrashListener for Counting {
        fn on_crash(&self, detector: &DetectorHandle) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            detector.resume();
        }
    }

    /// Reports each crash, then holds the detector thread until released
    struct Blocking {
        calls: AtomicUsize,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl CrashListener for Blocking {
        fn on_crash(&self, detector: &DetectorHandle) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            let _ = self.release.recv();
            detector.resume();
        }
    }

    fn settle() {
        thread::sleep(Duration::from_millis(40));
    }

    fn wait_for_calls(counter: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fires_on_rising_edge_only() {
        let listener = Arc::new(Counting::default());
        let trigger = ManualTrigger::new();
        let detector = CrashDetector::new(fast(), Box::new(trigger.clone()), listener.clone());
        detector.start().unwrap();
        settle();

        trigger.set(Level::High);
        wait_for_calls(&listener.calls, 1);
        settle();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        // HIGH -> LOW is not a crash
        trigger.set(Level::Low);
        settle();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        trigger.set(Level::High);
        wait_for_calls(&listener.calls, 2);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_steady_high_at_start_does_not_fire() {
        let listener = Arc::new(Counting::default());
        let trigger = ScriptedTrigger::new([Level::High]);
        let detector = CrashDetector::new(fast(), Box::new(trigger), listener.clone());
        detector.start().unwrap();
        settle();

        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
        assert_eq!(detector.state(), DetectorState::Armed);
    }

    #[test]
    fn test_second_edge_during_handling_is_ignored() {
        let (entered_tx, entered) = unbounded();
        let (release, release_rx) = bounded(1);
        let listener = Arc::new(Blocking {
            calls: AtomicUsize::new(0),
            entered: entered_tx,
            release: release_rx,
        });
        let trigger = ManualTrigger::new();
        let detector = CrashDetector::new(fast(), Box::new(trigger.clone()), listener.clone());
        detector.start().unwrap();
        settle();

        trigger.set(Level::High);
        entered.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(detector.state(), DetectorState::Suspended);

        // Another press while the first crash is being handled
        trigger.set(Level::Low);
        settle();
        trigger.set(Level::High);
        settle();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        settle();
        assert_eq!(detector.state(), DetectorState::Armed);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        trigger.set(Level::Low);
        settle();
        trigger.set(Level::High);
        entered.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
        release.send(()).unwrap();
    }

    #[test]
    fn test_stays_suspended_until_resumed() {
        struct NoRearm(AtomicUsize);
        impl CrashListener for NoRearm {
            fn on_crash(&self, _: &DetectorHandle) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let listener = Arc::new(NoRearm(AtomicUsize::new(0)));
        let trigger = ManualTrigger::new();
        let detector = CrashDetector::new(fast(), Box::new(trigger.clone()), listener.clone());
        detector.start().unwrap();
        settle();

        trigger.set(Level::High);
        wait_for_calls(&listener.0, 1);
        trigger.set(Level::Low);
        settle();
        trigger.set(Level::High);
        settle();
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(detector.state(), DetectorState::Suspended);

        detector.resume();
        trigger.set(Level::Low);
        settle();
        trigger.set(Level::High);
        wait_for_calls(&listener.0, 2);
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_is_terminal() {
        let listener = Arc::new(Counting::default());
        let trigger = ManualTrigger::new();
        let detector = CrashDetector::new(fast(), Box::new(trigger.clone()), listener.clone());
        detector.start().unwrap();
        detector.stop();

        assert_eq!(detector.state(), DetectorState::Stopped);
        assert!(matches!(detector.start(), Err(DetectorError::Stopped)));

        trigger.set(Level::High);
        detector.resume();
        settle();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
        assert_eq!(detector.state(), DetectorState::Stopped);
    }

    #[test]
    fn test_stop_before_start() {
        let detector = CrashDetector::new(
            fast(),
            Box::new(ManualTrigger::new()),
            Arc::new(Counting::default()),
        );
        assert_eq!(detector.state(), DetectorState::Idle);
        detector.stop();
        assert_eq!(detector.state(), DetectorState::Stopped);
    }

    #[test]
    fn test_stop_joins_in_flight_crash() {
        let (entered_tx, entered) = unbounded();
        let (release, release_rx) = bounded(1);
        let listener = Arc::new(Blocking {
            calls: AtomicUsize::new(0),
            entered: entered_tx,
            release: release_rx,
        });
        let trigger = ManualTrigger::new();
        let detector = Arc::new(CrashDetector::new(
            fast(),
            Box::new(trigger.clone()),
            listener.clone(),
        ));
        detector.start().unwrap();
        settle();

        trigger.set(Level::High);
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        let stopper = {
            let detector = Arc::clone(&detector);
            thread::spawn(move || detector.stop())
        };
        settle();
        assert!(!stopper.is_finished());

        release.send(()).unwrap();
        stopper.join().unwrap();
        assert_eq!(detector.state(), DetectorState::Stopped);
    }
}
