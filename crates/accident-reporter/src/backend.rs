//! Reporting backend seams and local implementations

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::AccidentPayload;

/// Backend error types
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Remote object storage for accident videos
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BackendError>;
}

/// Recipient tokens and the marker that changes whenever they do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSnapshot {
    /// Recipient id to push token
    pub tokens: BTreeMap<String, String>,
    /// Opaque version marker
    pub version: String,
}

/// Remote store of recipient tokens
pub trait TokenStore: Send + Sync {
    /// Current version marker, cheap to query
    fn version(&self, key: &str) -> Result<String, BackendError>;

    /// Full token map with its marker
    fn get(&self, key: &str) -> Result<TokenSnapshot, BackendError>;
}

/// Push channel to a single recipient
pub trait NotificationSender: Send + Sync {
    /// Deliver `payload`; returns the message id
    fn send(&self, token: &str, payload: &AccidentPayload) -> Result<String, BackendError>;
}

/// Blob store rooted in a local or mounted directory
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for DirectoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(BackendError::InvalidKey(key.to_string()));
        }

        fs::create_dir_all(&self.root)?;
        let staging = self.root.join(format!(".{}.partial", key));
        fs::write(&staging, bytes)?;
        fs::rename(&staging, self.root.join(key))?;

        debug!(target: "reporter", "Stored blob {} ({} bytes)", key, bytes.len());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    version: serde_json::Value,
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// Token store backed by `<root>/<key>.json` documents
///
/// ```json
/// { "version": 3, "tokens": { "uid-1": "token-1" } }
/// ```
#[derive(Debug, Clone)]
pub struct JsonTokenStore {
    root: PathBuf,
}

impl JsonTokenStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write a token document, replacing any previous one
    pub fn publish(
        &self,
        key: &str,
        version: impl Into<serde_json::Value>,
        tokens: BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        let document = TokenDocument {
            version: version.into(),
            tokens,
        };
        fs::create_dir_all(&self.root)?;
        fs::write(self.path(key), serde_json::to_vec_pretty(&document)?)?;
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    fn read(&self, key: &str) -> Result<TokenDocument, BackendError> {
        let path = self.path(key);
        if !path.exists() {
            return Err(BackendError::NotFound(path.display().to_string()));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

impl TokenStore for JsonTokenStore {
    fn version(&self, key: &str) -> Result<String, BackendError> {
        Ok(self.read(key)?.version.to_string())
    }

    fn get(&self, key: &str) -> Result<TokenSnapshot, BackendError> {
        let document = self.read(key)?;
        Ok(TokenSnapshot {
            version: document.version.to_string(),
            tokens: document.tokens,
        })
    }
}
