//! Accident Reporting
//!
//! Hands a saved accident off to the companion app:
//! - Uploads the video to a blob store, retrying transient failures
//! - Keeps a cache of recipient tokens, refreshed only when it changes upstream
//! - Fans a notification out to every recipient, isolating per-recipient failures

pub mod backend;
pub mod cache;
pub mod mqtt;
pub mod record;
pub mod reporter;

pub use backend::{
    BackendError, BlobStore, DirectoryBlobStore, JsonTokenStore, NotificationSender, TokenSnapshot,
    TokenStore,
};
pub use cache::NotificationCache;
pub use mqtt::{MqttConfig, MqttNotifier};
pub use record::{AccidentPayload, AccidentRecord};
pub use reporter::{AccidentReporter, ReportError, ReportOutcome, ReporterConfig};
