//! Accident reporter

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{AccidentRecord, BlobStore, NotificationCache, NotificationSender, TokenStore};

/// Report error types
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Video file missing: {0:?}")]
    MissingVideoFile(String),

    #[error("Cannot read video {path}: {source}")]
    VideoRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reporter configuration
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Directory the videos are saved in
    pub captures_dir: PathBuf,
    /// Token document holding the recipients
    pub token_key: String,
    /// Upload attempts before giving up (at least one)
    pub upload_attempts: u32,
    /// Backoff after the first failed attempt; grows linearly
    pub retry_backoff: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            captures_dir: PathBuf::from("captures"),
            token_key: "fcm_token".to_string(),
            upload_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// What a report achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub uploaded: bool,
    /// Recipients notified
    pub notified: usize,
    /// Recipients that could not be notified
    pub failed: usize,
}

impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        self.uploaded && self.notified > 0
    }
}

/// Uploads accident videos and notifies every recipient
pub struct AccidentReporter {
    config: ReporterConfig,
    blobs: Arc<dyn BlobStore>,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn NotificationSender>,
    cache: Mutex<NotificationCache>,
}

impl AccidentReporter {
    pub fn new(
        config: ReporterConfig,
        blobs: Arc<dyn BlobStore>,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            config,
            blobs,
            tokens,
            notifier,
            cache: Mutex::new(NotificationCache::new()),
        }
    }

    /// Report an accident; true only if the video was uploaded and at least
    /// one recipient was notified
    pub fn report(&self, record: &AccidentRecord) -> bool {
        match self.submit(record) {
            Ok(outcome) if outcome.is_success() => {
                info!(target: "reporter", "Accident reported successfully");
                true
            }
            Ok(outcome) => {
                error!(
                    target: "reporter",
                    "Accident not reported (uploaded: {}, notified: {}, failed: {})",
                    outcome.uploaded,
                    outcome.notified,
                    outcome.failed
                );
                false
            }
            Err(e) => {
                error!(target: "reporter", "Accident not reported: {}", e);
                false
            }
        }
    }

    /// Report an accident and return the detailed outcome
    ///
    /// A missing video fails before any backend is contacted. Upload and
    /// notification failures are part of the outcome, not errors.
    pub fn submit(&self, record: &AccidentRecord) -> Result<ReportOutcome, ReportError> {
        let filename = record.video_filename.trim();
        let path = self.config.captures_dir.join(filename);
        if filename.is_empty() || !path.is_file() {
            return Err(ReportError::MissingVideoFile(filename.to_string()));
        }

        info!(target: "reporter", "Reporting accident at {}", record.timestamp_ms);
        let bytes = fs::read(&path).map_err(|source| ReportError::VideoRead {
            path: path.display().to_string(),
            source,
        })?;

        let uploaded = self.upload(filename, &bytes);
        let (notified, failed) = self.notify(record);

        Ok(ReportOutcome {
            uploaded,
            notified,
            failed,
        })
    }

    fn upload(&self, key: &str, bytes: &[u8]) -> bool {
        let attempts = self.config.upload_attempts.max(1);

        for attempt in 1..=attempts {
            match self.blobs.put(key, bytes) {
                Ok(()) => {
                    info!(target: "reporter", "Video {} uploaded ({} bytes)", key, bytes.len());
                    metrics::counter!("reporter_uploads").increment(1);
                    return true;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        target: "reporter",
                        "Upload attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    thread::sleep(self.config.retry_backoff * attempt);
                }
                Err(e) => {
                    error!(target: "reporter", "Upload of {} failed: {}", key, e);
                }
            }
        }

        metrics::counter!("reporter_upload_failures").increment(1);
        false
    }

    /// Returns (notified, failed)
    fn notify(&self, record: &AccidentRecord) -> (usize, usize) {
        let recipients = {
            let mut cache = self.cache.lock();
            cache.refresh(self.tokens.as_ref(), &self.config.token_key);
            cache.tokens().clone()
        };

        if recipients.is_empty() {
            error!(target: "reporter", "No recipients to notify");
            return (0, 0);
        }

        let payload = record.payload();
        let mut notified = 0;
        let mut failed = 0;

        for (uid, token) in &recipients {
            if token.trim().is_empty() {
                continue;
            }
            match self.notifier.send(token, &payload) {
                Ok(message_id) => {
                    info!(target: "reporter", "Notified {} ({})", uid, message_id);
                    notified += 1;
                }
                Err(e) => {
                    warn!(target: "reporter", "Could not notify {}: {}", uid, e);
                    failed += 1;
                }
            }
        }

        metrics::counter!("notifications_sent").increment(notified as u64);
        metrics::counter!("notifications_failed").increment(failed as u64);
        (notified, failed)
    }

    /// Full token fetches performed so far
    pub fn token_fetches(&self) -> u64 {
        self.cache.lock().fetches()
    }
}
