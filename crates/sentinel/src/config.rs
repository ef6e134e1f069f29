//! Application configuration
//!
//! Layered from an optional TOML file and `SENTINEL__<SECTION>__<KEY>`
//! environment variables, e.g. `SENTINEL__CAMERA__FPS=15`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use accident_orchestrator::OrchestratorConfig;
use accident_reporter::{MqttConfig, ReporterConfig};
use camera_capture::CameraConfig;
use config::{Config, Environment, File};
use crash_detector::DetectorConfig;
use gps::GpsConfig;
use serde::Deserialize;

use crate::SystemError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SENTINEL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraSection,
    pub trigger: TriggerSection,
    pub gps: GpsSection,
    pub reporter: ReporterSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
}

impl AppConfig {
    /// Load `path` (if it exists) overlaid with the environment
    pub fn load(path: &Path) -> Result<Self, SystemError> {
        let config = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<AppConfig>()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component could run with
    pub fn validate(&self) -> Result<(), SystemError> {
        let invalid = |msg: &str| Err(SystemError::Configuration(msg.to_string()));

        if self.camera.fps == 0 || self.camera.window_seconds == 0 {
            return invalid("camera.fps and camera.window_seconds must be positive");
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera resolution must be positive");
        }
        if self.trigger.poll_interval_ms == 0 {
            return invalid("trigger.poll_interval_ms must be positive");
        }
        if self.reporter.upload_attempts == 0 {
            return invalid("reporter.upload_attempts must be at least 1");
        }
        if self.reporter.mqtt_ack_timeout_ms == 0 {
            return invalid("reporter.mqtt_ack_timeout_ms must be positive");
        }
        if self.reporter.token_key.trim().is_empty() {
            return invalid("reporter.token_key must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub window_seconds: u32,
    pub vflip: bool,
    pub encoder: VideoFormat,
    /// Used by the Motion-JPEG encoder only
    pub jpeg_quality: u8,
    pub frame_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub fill_timeout_ms: u64,
    pub init_timeout_ms: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        let defaults = CameraConfig::default();
        Self {
            device: defaults.device,
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps,
            window_seconds: defaults.window_seconds,
            vflip: defaults.vflip,
            encoder: VideoFormat::Mp4,
            jpeg_quality: 85,
            frame_timeout_ms: defaults.frame_timeout.as_millis() as u64,
            handshake_timeout_ms: defaults.handshake_timeout.as_millis() as u64,
            fill_timeout_ms: defaults.fill_timeout.as_millis() as u64,
            init_timeout_ms: 10_000,
        }
    }
}

impl CameraSection {
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            window_seconds: self.window_seconds,
            vflip: self.vflip,
            frame_timeout: Duration::from_millis(self.frame_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            fill_timeout: Duration::from_millis(self.fill_timeout_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
        }
    }
}

/// Container accident videos are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// MPEG-4 in MP4 through the `ffmpeg` binary
    Mp4,
    /// Concatenated JPEGs, no external tools
    Mjpeg,
}

/// Where the crash signal comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerBackend {
    /// sysfs GPIO input
    Gpio,
    /// In-process level, never raised by itself (bench runs)
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    pub backend: TriggerBackend,
    /// BCM pin number
    pub pin: u32,
    pub poll_interval_ms: u64,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            backend: TriggerBackend::Gpio,
            pin: 1,
            poll_interval_ms: DetectorConfig::default().poll_interval.as_millis() as u64,
        }
    }
}

impl TriggerSection {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpsSection {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
}

impl Default for GpsSection {
    fn default() -> Self {
        let defaults = GpsConfig::default();
        Self {
            enabled: true,
            port: defaults.port,
            baud_rate: defaults.baud_rate,
        }
    }
}

impl GpsSection {
    pub fn gps_config(&self) -> GpsConfig {
        GpsConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReporterSection {
    /// Directory videos are uploaded to
    pub blob_dir: PathBuf,
    /// Directory holding token documents
    pub token_dir: PathBuf,
    pub token_key: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub topic_prefix: String,
    /// Broker acknowledgement deadline per notification
    pub mqtt_ack_timeout_ms: u64,
    pub upload_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ReporterSection {
    fn default() -> Self {
        let mqtt = MqttConfig::default();
        let reporter = ReporterConfig::default();
        Self {
            blob_dir: PathBuf::from("uploads"),
            token_dir: PathBuf::from("data"),
            token_key: reporter.token_key,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_client_id: mqtt.client_id,
            topic_prefix: mqtt.topic_prefix,
            mqtt_ack_timeout_ms: mqtt.ack_timeout.as_millis() as u64,
            upload_attempts: reporter.upload_attempts,
            retry_backoff_ms: reporter.retry_backoff.as_millis() as u64,
        }
    }
}

impl ReporterSection {
    pub fn reporter_config(&self, captures_dir: &Path) -> ReporterConfig {
        ReporterConfig {
            captures_dir: captures_dir.to_path_buf(),
            token_key: self.token_key.clone(),
            upload_attempts: self.upload_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            topic_prefix: self.topic_prefix.clone(),
            ack_timeout: Duration::from_millis(self.mqtt_ack_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub captures_dir: PathBuf,
    pub vehicle_file: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            captures_dir: PathBuf::from("captures"),
            vehicle_file: PathBuf::from(vehicle::DEFAULT_VEHICLE_FILE),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// Prometheus scrape address, e.g. "0.0.0.0:9000"; disabled when unset
    pub listen: Option<String>,
}
