//! Crash handling sequence

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accident_reporter::{AccidentRecord, AccidentReporter};
use camera_capture::{CaptureEngine, FrameBuffer};
use chrono::Utc;
use crash_detector::{CrashListener, DetectorHandle};
use gps::LocationProvider;
use rolling_buffer::concat;
use tracing::{error, info, warn};
use vehicle::VehicleInfo;

use crate::{AccidentError, Capability};

/// Destination of finished accident records
pub trait ReportSink: Send + Sync {
    /// True when the accident reached its recipients
    fn report(&self, record: &AccidentRecord) -> bool;
}

impl ReportSink for AccidentReporter {
    fn report(&self, record: &AccidentRecord) -> bool {
        AccidentReporter::report(self, record)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a crash may wait for the camera to start streaming
    pub init_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one handled accident
#[derive(Debug, Clone)]
pub struct AccidentSummary {
    pub record: AccidentRecord,
    /// Frames before and after the trigger
    pub frames_before: usize,
    pub frames_after: usize,
    pub reported: bool,
}

/// Resumes a suspended capture however the sequence ends
struct ResumeGuard<'a>(&'a CaptureEngine);

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        self.0.resume();
    }
}

/// Rearms the detector however the listener returns
struct RearmGuard<'a>(&'a DetectorHandle);

impl Drop for RearmGuard<'_> {
    fn drop(&mut self) {
        self.0.resume();
    }
}

/// Turns a crash into a saved video and a reported accident
pub struct AccidentOrchestrator {
    config: OrchestratorConfig,
    camera: Capability<Arc<CaptureEngine>>,
    location: Arc<dyn LocationProvider>,
    vehicle: VehicleInfo,
    reporter: Arc<dyn ReportSink>,
    handled: AtomicU64,
}

impl AccidentOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        camera: Capability<Arc<CaptureEngine>>,
        location: Arc<dyn LocationProvider>,
        vehicle: VehicleInfo,
        reporter: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            camera,
            location,
            vehicle,
            reporter,
            handled: AtomicU64::new(0),
        }
    }

    /// Run the whole sequence for a crash that happened at `timestamp_ms`
    pub fn handle_accident(&self, timestamp_ms: i64) -> Result<AccidentSummary, AccidentError> {
        let camera = match &self.camera {
            Capability::Present(camera) => camera.as_ref(),
            Capability::Absent { reason } => {
                return Err(AccidentError::CameraAbsent(reason.clone()))
            }
        };

        if !camera.is_initialized() && !camera.wait_until_initialized(self.config.init_timeout) {
            return Err(AccidentError::CameraNotInitialized(self.config.init_timeout));
        }

        // Shortly after start-up the window may not fill; take what is there
        camera.wait_until_full();
        let before = self.take_window(camera)?;
        info!(target: "orchestrator", "Captured {} frames before the crash", before.len());

        camera.wait_until_full();
        let after = self.take_window(camera)?;
        info!(target: "orchestrator", "Captured {} frames after the crash", after.len());

        let frames_before = before.len();
        let frames_after = after.len();
        let combined = concat(before, after);

        let filename = camera.save_to_file(&combined, timestamp_ms.max(0) as u64)?;

        let location = self.location.last_known_location();
        let record = AccidentRecord::new(
            location.latitude,
            location.longitude,
            timestamp_ms,
            filename,
            self.vehicle.clone(),
        );

        let reported = self.reporter.report(&record);
        Ok(AccidentSummary {
            record,
            frames_before,
            frames_after,
            reported,
        })
    }

    /// Freeze capture, drain the live window and let capture run again
    fn take_window(&self, camera: &CaptureEngine) -> Result<FrameBuffer, AccidentError> {
        camera.suspend()?;
        let _resume = ResumeGuard(camera);
        Ok(camera.snapshot_and_clear()?)
    }

    /// Crashes handled since start-up, whatever their outcome
    pub fn accidents_handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }
}

impl CrashListener for AccidentOrchestrator {
    fn on_crash(&self, detector: &DetectorHandle) {
        let _rearm = RearmGuard(detector);
        let timestamp_ms = Utc::now().timestamp_millis();
        metrics::counter!("accidents_detected").increment(1);
        info!(target: "orchestrator", "Handling accident at {}", timestamp_ms);

        match self.handle_accident(timestamp_ms) {
            Ok(summary) if summary.reported => {
                metrics::counter!("accidents_reported").increment(1);
                info!(
                    target: "orchestrator",
                    "Accident {} reported with video {}",
                    timestamp_ms,
                    summary.record.video_filename
                );
            }
            Ok(summary) => {
                metrics::counter!("accidents_failed").increment(1);
                warn!(
                    target: "orchestrator",
                    "Accident video {} saved but not reported",
                    summary.record.video_filename
                );
            }
            Err(AccidentError::CameraAbsent(reason)) => {
                metrics::counter!("accidents_failed").increment(1);
                warn!(target: "orchestrator", "Accident not recorded, no camera: {}", reason);
            }
            Err(e) => {
                metrics::counter!("accidents_failed").increment(1);
                error!(target: "orchestrator", "Accident handling aborted: {}", e);
            }
        }

        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{
        CameraConfig, EncodeError, MjpegEncoder, SyntheticCamera, VideoEncoder,
    };
    use crash_detector::{CrashDetector, DetectorConfig, DetectorState, Level, ManualTrigger};
    use gps::{FixedLocation, Location};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Instant;

    /// Records every report; `rejecting` ones never reach recipients
    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AccidentRecord>>,
        rejecting: bool,
    }

    impl RecordingSink {
        fn rejecting() -> Self {
            Self {
                rejecting: true,
                ..Default::default()
            }
        }
    }

    impl ReportSink for RecordingSink {
        fn report(&self, record: &AccidentRecord) -> bool {
            self.records.lock().push(record.clone());
            !self.rejecting
        }
    }

    struct FailingEncoder;

    impl VideoEncoder for FailingEncoder {
        fn encode(&self, _: &FrameBuffer, _: &Path, _: u32) -> Result<(), EncodeError> {
            Err(EncodeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "codec unavailable",
            )))
        }
    }

    fn camera(dir: &Path, encoder: Box<dyn VideoEncoder>) -> Arc<CaptureEngine> {
        let config = CameraConfig {
            width: 8,
            height: 6,
            fps: 20,
            window_seconds: 1,
            ..CameraConfig::synthetic()
        };
        let engine = CaptureEngine::configure(
            config,
            Box::new(SyntheticCamera::new("stub://test")),
            dir,
            encoder,
        )
        .unwrap();
        engine.start().unwrap();
        Arc::new(engine)
    }

    fn orchestrator(
        camera: Capability<Arc<CaptureEngine>>,
        sink: Arc<RecordingSink>,
    ) -> Arc<AccidentOrchestrator> {
        Arc::new(AccidentOrchestrator::new(
            OrchestratorConfig::default(),
            camera,
            Arc::new(FixedLocation(Location::new(30.5, 31.5))),
            VehicleInfo::default(),
            sink,
        ))
    }

    fn wait_handled(orchestrator: &AccidentOrchestrator, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while orchestrator.accidents_handled() < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// The detector rearms just after the listener counts the accident
    fn wait_armed(detector: &CrashDetector) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while detector.state() != DetectorState::Armed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Raise the trigger from low, as a fresh crash does
    fn crash(trigger: &ManualTrigger) {
        trigger.set(Level::Low);
        std::thread::sleep(Duration::from_millis(20));
        trigger.set(Level::High);
    }

    fn fast_detector(listener: Arc<AccidentOrchestrator>, trigger: &ManualTrigger) -> CrashDetector {
        CrashDetector::new(
            DetectorConfig {
                poll_interval: Duration::from_millis(2),
            },
            Box::new(trigger.clone()),
            listener,
        )
    }

    #[test]
    fn test_handle_accident_saves_both_windows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = camera(dir.path(), Box::new(MjpegEncoder::default()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(Capability::Present(engine.clone()), sink.clone());

        let summary = orchestrator.handle_accident(1_700_000_000_000).unwrap();

        assert_eq!(summary.frames_before, 20);
        assert_eq!(summary.frames_after, 20);
        assert!(summary.reported);
        assert_eq!(summary.record.video_filename, "1700000000000.mjpeg");
        assert_eq!(summary.record.latitude, 30.5);
        assert!(dir.path().join("1700000000000.mjpeg").exists());
        assert_eq!(sink.records.lock().len(), 1);

        // Capture runs again for the next crash
        assert_eq!(engine.mode(), camera_capture::CaptureMode::Recording);
        engine.stop();
    }

    #[test]
    fn test_crash_end_to_end_rearms_detector() {
        let dir = tempfile::tempdir().unwrap();
        let engine = camera(dir.path(), Box::new(MjpegEncoder::default()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(Capability::Present(engine.clone()), sink.clone());
        let trigger = ManualTrigger::new();
        let detector = fast_detector(orchestrator.clone(), &trigger);
        detector.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let before = Utc::now().timestamp_millis();
        trigger.set(Level::High);
        wait_handled(&orchestrator, 1);
        wait_armed(&detector);

        assert_eq!(orchestrator.accidents_handled(), 1);
        assert_eq!(detector.state(), DetectorState::Armed);

        let records = sink.records.lock().clone();
        assert_eq!(records.len(), 1);
        assert!(records[0].timestamp_ms >= before);
        assert!(dir.path().join(&records[0].video_filename).exists());

        detector.stop();
        engine.stop();
    }

    #[test]
    fn test_absent_camera_skips_and_rearms() {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(Capability::absent("no /dev/video0"), sink.clone());
        let trigger = ManualTrigger::new();
        let detector = fast_detector(orchestrator.clone(), &trigger);
        detector.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        trigger.set(Level::High);
        wait_handled(&orchestrator, 1);
        wait_armed(&detector);

        assert_eq!(orchestrator.accidents_handled(), 1);
        assert_eq!(detector.state(), DetectorState::Armed);
        assert!(sink.records.lock().is_empty());
        assert!(matches!(
            orchestrator.handle_accident(1),
            Err(AccidentError::CameraAbsent(_))
        ));
    }

    #[test]
    fn test_save_failure_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = camera(dir.path(), Box::new(FailingEncoder));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(Capability::Present(engine.clone()), sink.clone());

        let result = orchestrator.handle_accident(42);

        assert!(matches!(
            result,
            Err(AccidentError::Capture(camera_capture::CaptureError::CaptureFailure(_)))
        ));
        assert!(sink.records.lock().is_empty());
        assert!(!dir.path().join("42.mp4").exists());
        assert_eq!(engine.mode(), camera_capture::CaptureMode::Recording);
        engine.stop();
    }

    #[test]
    fn test_failed_report_rearms_for_next_crash() {
        let dir = tempfile::tempdir().unwrap();
        let engine = camera(dir.path(), Box::new(MjpegEncoder::default()));
        let sink = Arc::new(RecordingSink::rejecting());
        let orchestrator = orchestrator(Capability::Present(engine.clone()), sink.clone());
        let trigger = ManualTrigger::new();
        let detector = fast_detector(orchestrator.clone(), &trigger);
        detector.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        crash(&trigger);
        wait_handled(&orchestrator, 1);
        wait_armed(&detector);
        assert_eq!(detector.state(), DetectorState::Armed);

        crash(&trigger);
        wait_handled(&orchestrator, 2);
        wait_armed(&detector);

        assert_eq!(orchestrator.accidents_handled(), 2);
        assert_eq!(detector.state(), DetectorState::Armed);
        // Both videos were saved even though neither reached anyone
        let records = sink.records.lock().clone();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|record| dir.path().join(&record.video_filename).exists()));

        detector.stop();
        engine.stop();
    }

    #[test]
    fn test_failed_save_rearms_for_next_crash() {
        let dir = tempfile::tempdir().unwrap();
        let engine = camera(dir.path(), Box::new(FailingEncoder));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(Capability::Present(engine.clone()), sink.clone());
        let trigger = ManualTrigger::new();
        let detector = fast_detector(orchestrator.clone(), &trigger);
        detector.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        crash(&trigger);
        wait_handled(&orchestrator, 1);
        wait_armed(&detector);
        assert_eq!(detector.state(), DetectorState::Armed);

        crash(&trigger);
        wait_handled(&orchestrator, 2);
        wait_armed(&detector);

        assert_eq!(orchestrator.accidents_handled(), 2);
        assert_eq!(detector.state(), DetectorState::Armed);
        assert!(sink.records.lock().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(engine.mode(), camera_capture::CaptureMode::Recording);

        detector.stop();
        engine.stop();
    }
}
