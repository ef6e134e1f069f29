//! Capture engine: capture thread, rolling window and freeze handshake
//!
//! The live [`FrameBuffer`] is owned by the capture thread and never shared.
//! Controllers talk to the thread over a command channel:
//!
//! - `suspend()` sends a request and blocks until the thread replies. The reply is
//!   sent between two frames, after the thread has committed to pushing nothing
//!   more until it is resumed.
//! - `snapshot_and_clear()` asks the suspended thread to copy and empty its buffer,
//!   so the thread stays the only mutator of the live window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use rolling_buffer::RollingBuffer;
use tracing::{debug, error, info, warn};

use crate::{CameraConfig, CameraDriver, CaptureError, SharedFrame, VideoEncoder, VideoFrame};

/// Rolling window of captured frames
pub type FrameBuffer = RollingBuffer<SharedFrame>;

/// Sleep used while the thread has nothing to do but wait for saving to end
const IDLE_TICK: Duration = Duration::from_millis(5);

/// Effective capture mode composed from the state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Capture thread spawned, driver not streaming yet
    Uninitialized,
    /// Configured, capture thread not started
    Ready,
    Recording,
    Suspended,
    /// Writing a video; new frames are not taken
    Saving,
    Stopped,
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    started: bool,
    initialized: bool,
    recording: bool,
    suspended: bool,
    saving: bool,
    stopped: bool,
    occupied: usize,
}

/// State shared between the engine and its capture thread
#[derive(Default)]
struct Status {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl Status {
    fn update(&self, apply: impl FnOnce(&mut Flags)) {
        let mut flags = self.flags.lock();
        apply(&mut flags);
        self.changed.notify_all();
    }

    fn current(&self) -> Flags {
        *self.flags.lock()
    }

    fn set_occupied(&self, occupied: usize, full: bool) {
        let mut flags = self.flags.lock();
        flags.occupied = occupied;
        if full {
            self.changed.notify_all();
        }
    }

    fn is_saving(&self) -> bool {
        self.flags.lock().saving
    }
}

enum Command {
    Suspend(Sender<()>),
    Resume,
    Drain(Sender<Result<FrameBuffer, CaptureError>>),
    Stop,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Control {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// Clears the saving flag however the write ends
struct SavingGuard<'a>(&'a Status);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.update(|f| f.saving = false);
    }
}

/// Continuous capture into a rolling window
pub struct CaptureEngine {
    config: CameraConfig,
    capacity: usize,
    capture_dir: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    driver: Mutex<Option<Box<dyn CameraDriver>>>,
    control: Mutex<Option<Control>>,
    status: Arc<Status>,
}

impl CaptureEngine {
    /// Configure the driver and size the window; the engine is then Ready
    pub fn configure(
        config: CameraConfig,
        mut driver: Box<dyn CameraDriver>,
        capture_dir: impl Into<PathBuf>,
        encoder: Box<dyn VideoEncoder>,
    ) -> Result<Self, CaptureError> {
        let capacity = config.capacity();
        if capacity == 0 {
            return Err(CaptureError::Config(format!(
                "window of {}s at {}fps holds no frames",
                config.window_seconds, config.fps
            )));
        }

        driver
            .configure(config.width, config.height, config.fps, config.vflip)
            .map_err(|e| CaptureError::HardwareUnavailable(e.to_string()))?;

        info!(
            target: "camera",
            "Camera {} ready: {}x{} @ {}fps, window of {} frames",
            driver.name(),
            config.width,
            config.height,
            config.fps,
            capacity
        );

        Ok(Self {
            config,
            capacity,
            capture_dir: capture_dir.into(),
            encoder,
            driver: Mutex::new(Some(driver)),
            control: Mutex::new(None),
            status: Arc::new(Status::default()),
        })
    }

    /// Spawn the capture thread (no-op if already recording)
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut control = self.control.lock();
        if control.is_some() {
            info!(target: "camera", "Start requested while already recording");
            return Ok(());
        }
        if self.status.current().stopped {
            return Err(CaptureError::Stopped);
        }

        let driver = self.driver.lock().take().ok_or(CaptureError::Stopped)?;
        let buffer = RollingBuffer::new(self.capacity)
            .map_err(|e| CaptureError::Config(e.to_string()))?;
        let (commands, receiver) = unbounded();

        self.status.update(|f| {
            f.started = true;
            f.recording = true;
        });

        let worker = CaptureWorker {
            driver,
            buffer,
            commands: receiver,
            status: Arc::clone(&self.status),
            frame_timeout: self.config.frame_timeout,
            suspended: false,
        };

        let thread = thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.status.update(|f| {
                    f.recording = false;
                    f.stopped = true;
                });
                CaptureError::HardwareUnavailable(e.to_string())
            })?;

        *control = Some(Control { commands, thread });
        info!(target: "camera", "Started recording");
        Ok(())
    }

    /// Stop the capture thread and release the driver; blocks until the thread exits
    pub fn stop(&self) {
        let control = self.control.lock().take();

        match control {
            Some(control) => {
                let _ = control.commands.send(Command::Stop);
                if control.thread.join().is_err() {
                    error!(target: "camera", "Capture thread panicked");
                }
            }
            None => {
                if let Some(mut driver) = self.driver.lock().take() {
                    driver.stop();
                }
            }
        }

        self.status.update(|f| {
            f.recording = false;
            f.suspended = false;
            f.initialized = false;
            f.stopped = true;
        });
    }

    /// Freeze capture; returns once the capture thread has acknowledged
    ///
    /// After this returns no frame is pushed until [`CaptureEngine::resume`].
    pub fn suspend(&self) -> Result<(), CaptureError> {
        let commands = self.commands()?;
        let (ack, acknowledged) = bounded(1);
        commands
            .send(Command::Suspend(ack))
            .map_err(|_| CaptureError::NotRunning)?;

        match acknowledged.recv_timeout(self.config.handshake_timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                warn!(target: "camera", "Suspend was not acknowledged in time");
                Err(CaptureError::Timeout(self.config.handshake_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::NotRunning),
        }
    }

    /// Let the capture thread push frames again (no-op if not suspended)
    pub fn resume(&self) {
        match self.commands() {
            Ok(commands) => {
                if commands.send(Command::Resume).is_err() {
                    debug!(target: "camera", "Resume ignored, capture thread has exited");
                    return;
                }
                // Commands are handled in order, so waiters may treat capture as live now
                self.status.update(|f| f.suspended = false);
            }
            Err(_) => debug!(target: "camera", "Resume ignored, capture is not running"),
        }
    }

    /// Copy and empty the live window; only valid while suspended
    pub fn snapshot_and_clear(&self) -> Result<FrameBuffer, CaptureError> {
        if !self.status.current().suspended {
            warn!(target: "camera", "Snapshot rejected: capture is not suspended");
            return Err(CaptureError::ConcurrencyViolation);
        }

        let commands = self.commands()?;
        let (reply, replied) = bounded(1);
        commands
            .send(Command::Drain(reply))
            .map_err(|_| CaptureError::NotRunning)?;

        match replied.recv_timeout(self.config.handshake_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(CaptureError::Timeout(self.config.handshake_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::NotRunning),
        }
    }

    /// Block until the window is full, capture stops, or the fill timeout expires
    ///
    /// Returns the number of frames held when the wait ended. Right after start-up
    /// this can be less than a full window.
    pub fn wait_until_full(&self) -> usize {
        let deadline = Instant::now() + self.config.fill_timeout;
        let mut flags = self.status.flags.lock();

        while flags.occupied < self.capacity
            && flags.recording
            && !flags.suspended
            && !flags.stopped
        {
            if self.status.changed.wait_until(&mut flags, deadline).timed_out() {
                warn!(
                    target: "camera",
                    "Window not full after {:?} ({}/{} frames)",
                    self.config.fill_timeout,
                    flags.occupied,
                    self.capacity
                );
                break;
            }
        }

        flags.occupied
    }

    /// Block until the driver is streaming; false on timeout or stop
    pub fn wait_until_initialized(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.status.flags.lock();

        while !flags.initialized && !flags.stopped {
            if self.status.changed.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }

        flags.initialized
    }

    /// Encode a window to `<timestamp_ms>.<ext>` in the capture directory
    ///
    /// The extension is the encoder's container. New frames are not taken while the file is written. Returns the file name.
    pub fn save_to_file(
        &self,
        frames: &FrameBuffer,
        timestamp_ms: u64,
    ) -> Result<String, CaptureError> {
        let filename = format!("{}.{}", timestamp_ms, self.encoder.extension());

        self.status.update(|f| f.saving = true);
        let _saving = SavingGuard(&self.status);

        let path = self.capture_dir.join(&filename);
        info!(
            target: "camera",
            "Saving video: {} frames, {}x{} @ {}fps to {}",
            frames.len(),
            self.config.width,
            self.config.height,
            self.config.fps,
            path.display()
        );

        match self.write_video(frames, &path) {
            Ok(()) => {
                info!(target: "camera", "Video saved to {}", path.display());
                Ok(filename)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                error!(target: "camera", "Could not save video: {}", e);
                Err(e)
            }
        }
    }

    fn write_video(&self, frames: &FrameBuffer, path: &Path) -> Result<(), CaptureError> {
        if frames.is_empty() {
            return Err(CaptureError::CaptureFailure("no frames to encode".to_string()));
        }

        std::fs::create_dir_all(&self.capture_dir).map_err(|e| {
            CaptureError::CaptureFailure(format!(
                "cannot create {}: {}",
                self.capture_dir.display(),
                e
            ))
        })?;

        self.encoder
            .encode(frames, path, self.config.fps)
            .map_err(|e| CaptureError::CaptureFailure(e.to_string()))?;

        let written = std::fs::metadata(path)
            .map_err(|e| CaptureError::CaptureFailure(e.to_string()))?
            .len();
        if written == 0 {
            return Err(CaptureError::CaptureFailure(
                "encoder produced an empty file".to_string(),
            ));
        }

        Ok(())
    }

    /// Current effective mode
    pub fn mode(&self) -> CaptureMode {
        let flags = self.status.current();
        if flags.stopped {
            CaptureMode::Stopped
        } else if !flags.started {
            CaptureMode::Ready
        } else if !flags.initialized {
            CaptureMode::Uninitialized
        } else if flags.saving {
            CaptureMode::Saving
        } else if flags.suspended {
            CaptureMode::Suspended
        } else {
            CaptureMode::Recording
        }
    }

    /// Driver is streaming frames
    pub fn is_initialized(&self) -> bool {
        self.status.current().initialized
    }

    /// Frames currently held in the live window
    pub fn occupied(&self) -> usize {
        self.status.current().occupied
    }

    /// Frames in a full window
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Directory videos are written to
    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn commands(&self) -> Result<Sender<Command>, CaptureError> {
        self.control
            .lock()
            .as_ref()
            .map(|c| c.commands.clone())
            .ok_or(CaptureError::NotRunning)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.control.get_mut().is_some() {
            self.stop();
        }
    }
}

/// Capture thread state; sole owner of the live window
struct CaptureWorker {
    driver: Box<dyn CameraDriver>,
    buffer: FrameBuffer,
    commands: Receiver<Command>,
    status: Arc<Status>,
    frame_timeout: Duration,
    suspended: bool,
}

impl CaptureWorker {
    fn run(mut self) {
        if let Err(e) = self.driver.start_streaming() {
            error!(target: "camera", "Failed to start streaming: {}", e);
            self.status.update(|f| {
                f.recording = false;
                f.stopped = true;
            });
            return;
        }
        self.status.update(|f| f.initialized = true);

        loop {
            let command = if self.suspended {
                // Nothing to capture; sleep until told otherwise
                match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            } else {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            if let Some(command) = command {
                if self.handle(command) == Flow::Exit {
                    break;
                }
                continue;
            }

            if self.status.is_saving() {
                thread::sleep(IDLE_TICK);
                continue;
            }

            match self.driver.read_frame(self.frame_timeout) {
                Ok(Some(frame)) => self.push(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "camera", "Frame read failed: {}", e);
                    thread::sleep(IDLE_TICK);
                }
            }
        }

        self.driver.stop();
        self.status.update(|f| {
            f.recording = false;
            f.initialized = false;
            f.suspended = false;
            f.stopped = true;
        });
        info!(target: "camera", "Stopped recording");
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Suspend(ack) => {
                if !self.suspended {
                    self.suspended = true;
                    self.status.update(|f| f.suspended = true);
                    debug!(target: "camera", "Capture suspended at {} frames", self.buffer.len());
                }
                let _ = ack.send(());
                Flow::Continue
            }
            Command::Resume => {
                if self.suspended {
                    self.suspended = false;
                    self.status.update(|f| f.suspended = false);
                    debug!(target: "camera", "Capture resumed");
                }
                Flow::Continue
            }
            Command::Drain(reply) => {
                let result = if self.suspended {
                    let snapshot = self.buffer.snapshot();
                    self.buffer.clear();
                    self.status.set_occupied(0, false);
                    Ok(snapshot)
                } else {
                    Err(CaptureError::ConcurrencyViolation)
                };
                let _ = reply.send(result);
                Flow::Continue
            }
            Command::Stop => Flow::Exit,
        }
    }

    fn push(&mut self, frame: VideoFrame) {
        self.buffer.push(Arc::new(frame));
        self.status
            .set_occupied(self.buffer.len(), self.buffer.is_full());
        metrics::counter!("camera_frames_captured").increment(1);
    }
}
