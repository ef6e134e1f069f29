//! Hardware bring-up and shutdown
//!
//! Every hardware component is brought up into a [`Capability`]. A missing camera,
//! trigger or GPS receiver is logged and the unit keeps running without it.

use std::sync::Arc;

use accident_orchestrator::{AccidentOrchestrator, Capability, Health};
use accident_reporter::{AccidentReporter, DirectoryBlobStore, JsonTokenStore, MqttNotifier};
use camera_capture::{
    open_driver, CaptureEngine, CaptureError, FfmpegMp4Encoder, MjpegEncoder, VideoEncoder,
};
use crash_detector::{CrashDetector, ManualTrigger, SysfsGpio, TriggerInput};
use gps::{FixedLocation, GpsService, LocationProvider};
use tracing::{info, warn};
use vehicle::VehicleInfo;

use crate::config::{AppConfig, TriggerBackend, VideoFormat};
use crate::SystemError;

/// Running accident sensing unit
pub struct System {
    camera: Capability<Arc<CaptureEngine>>,
    gps: Capability<GpsService>,
    detector: Capability<CrashDetector>,
    orchestrator: Arc<AccidentOrchestrator>,
    manual_trigger: Option<ManualTrigger>,
}

impl System {
    /// Bring every component up; must run inside a tokio runtime
    pub fn bring_up(config: &AppConfig, vehicle: VehicleInfo) -> Result<Self, SystemError> {
        info!("Bringing up accident sentinel");

        let camera = Capability::from_result("camera", start_camera(config));

        let gps = if config.gps.enabled {
            Capability::from_result("gps", GpsService::open(&config.gps.gps_config()))
        } else {
            Capability::absent("disabled in configuration")
        };
        let location: Arc<dyn LocationProvider> = match &gps {
            Capability::Present(service) => Arc::new(service.location()),
            Capability::Absent { .. } => Arc::new(FixedLocation::default()),
        };

        let reporter = AccidentReporter::new(
            config.reporter.reporter_config(&config.storage.captures_dir),
            Arc::new(DirectoryBlobStore::new(&config.reporter.blob_dir)),
            Arc::new(JsonTokenStore::new(&config.reporter.token_dir)),
            Arc::new(MqttNotifier::connect(&config.reporter.mqtt_config())?),
        );

        let orchestrator = Arc::new(AccidentOrchestrator::new(
            config.camera.orchestrator_config(),
            camera.clone(),
            location,
            vehicle,
            Arc::new(reporter),
        ));

        let (trigger, manual_trigger) = open_trigger(config);
        let detector = match trigger {
            Capability::Present(trigger) => {
                let detector = CrashDetector::new(
                    config.trigger.detector_config(),
                    trigger,
                    orchestrator.clone(),
                );
                detector.start()?;
                Capability::Present(detector)
            }
            Capability::Absent { reason } => Capability::Absent { reason },
        };

        let system = Self {
            camera,
            gps,
            detector,
            orchestrator,
            manual_trigger,
        };

        for health in system.health() {
            if health.present {
                info!("{}", health);
            } else {
                warn!("{}", health);
            }
        }
        Ok(system)
    }

    /// Presence of every hardware component
    pub fn health(&self) -> Vec<Health> {
        vec![
            self.camera.health("camera"),
            self.detector.health("crash trigger"),
            self.gps.health("gps"),
        ]
    }

    /// Fully functional: camera and trigger both present
    pub fn is_degraded(&self) -> bool {
        !(self.camera.is_present() && self.detector.is_present())
    }

    /// Trigger level handle when the manual backend is configured
    pub fn manual_trigger(&self) -> Option<&ManualTrigger> {
        self.manual_trigger.as_ref()
    }

    pub fn orchestrator(&self) -> &AccidentOrchestrator {
        &self.orchestrator
    }

    /// Stop the detector first, waiting for any crash in progress, then the camera
    ///
    /// Blocks on thread joins; call from a blocking context.
    pub fn shutdown(self) {
        info!("Shutting down");

        if let Some(detector) = self.detector.get() {
            detector.stop();
        }
        if let Some(camera) = self.camera.get() {
            camera.stop();
        }
        if let Some(gps) = self.gps.get() {
            gps.stop();
        }

        info!("Shutdown complete");
    }
}

fn start_camera(config: &AppConfig) -> Result<Arc<CaptureEngine>, CaptureError> {
    let camera_config = config.camera.camera_config();
    let driver = open_driver(&camera_config)
        .map_err(|e| CaptureError::HardwareUnavailable(e.to_string()))?;

    let encoder: Box<dyn VideoEncoder> = match config.camera.encoder {
        VideoFormat::Mp4 => Box::new(FfmpegMp4Encoder::new()),
        VideoFormat::Mjpeg => Box::new(MjpegEncoder::new(config.camera.jpeg_quality)),
    };

    let engine = CaptureEngine::configure(
        camera_config,
        driver,
        &config.storage.captures_dir,
        encoder,
    )?;
    engine.start()?;
    Ok(Arc::new(engine))
}

fn open_trigger(config: &AppConfig) -> (Capability<Box<dyn TriggerInput>>, Option<ManualTrigger>) {
    match config.trigger.backend {
        TriggerBackend::Gpio => {
            let gpio = SysfsGpio::open(config.trigger.pin)
                .map(|gpio| Box::new(gpio) as Box<dyn TriggerInput>);
            (Capability::from_result("crash trigger", gpio), None)
        }
        TriggerBackend::Manual => {
            let trigger = ManualTrigger::new();
            (
                Capability::Present(Box::new(trigger.clone()) as Box<dyn TriggerInput>),
                Some(trigger),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crash_detector::Level;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn bench_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.camera.device = "stub://bench".to_string();
        config.camera.width = 16;
        config.camera.height = 12;
        config.camera.fps = 20;
        config.camera.window_seconds = 1;
        config.camera.encoder = VideoFormat::Mjpeg;
        config.trigger.backend = TriggerBackend::Manual;
        config.trigger.poll_interval_ms = 5;
        config.gps.enabled = false;
        config.storage.captures_dir = dir.join("captures");
        config.reporter.blob_dir = dir.join("uploads");
        config.reporter.token_dir = dir.join("data");
        config.reporter.mqtt_port = 1;
        config.reporter.mqtt_ack_timeout_ms = 500;
        config
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bench_bring_up_and_crash() {
        let dir = tempfile::tempdir().unwrap();
        let config = bench_config(dir.path());
        JsonTokenStore::new(&config.reporter.token_dir)
            .publish(
                &config.reporter.token_key,
                1,
                BTreeMap::from([("uid-1".to_string(), "token-1".to_string())]),
            )
            .unwrap();
        let system = System::bring_up(&config, VehicleInfo::default()).unwrap();

        assert!(!system.is_degraded());
        let health = system.health();
        assert!(health[0].present && health[1].present);
        assert!(!health[2].present);

        let trigger = system.manual_trigger().unwrap().clone();
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.set(Level::High);

        let deadline = Instant::now() + Duration::from_secs(10);
        while system.orchestrator().accidents_handled() < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(system.orchestrator().accidents_handled(), 1);

        // Video saved and uploaded even though the broker never acknowledged
        let saved = std::fs::read_dir(dir.path().join("captures")).unwrap().count();
        assert_eq!(saved, 1);
        let uploaded = std::fs::read_dir(dir.path().join("uploads")).unwrap().count();
        assert_eq!(uploaded, 1);

        tokio::task::spawn_blocking(move || system.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_camera_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = bench_config(dir.path());
        config.camera.device = "/dev/does-not-exist-video9".to_string();

        let system = System::bring_up(&config, VehicleInfo::default()).unwrap();
        assert!(system.is_degraded());
        assert!(!system.health()[0].present);

        tokio::task::spawn_blocking(move || system.shutdown())
            .await
            .unwrap();
    }
}
