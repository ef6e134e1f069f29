//! Recipient token cache

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{TokenSnapshot, TokenStore};

/// Last fetched recipient tokens plus their version marker
#[derive(Debug, Default)]
pub struct NotificationCache {
    tokens: BTreeMap<String, String>,
    version: Option<String>,
    fetches: u64,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the cache up to date with `store`
    ///
    /// The full token map is fetched only when the upstream marker differs
    /// from the cached one. Any backend failure keeps the cached tokens.
    pub fn refresh(&mut self, store: &dyn TokenStore, key: &str) {
        let upstream = match store.version(key) {
            Ok(version) => version,
            Err(e) => {
                warn!(target: "reporter", "Token version query failed, using cache: {}", e);
                return;
            }
        };

        if self.version.as_deref() == Some(upstream.as_str()) {
            debug!(target: "reporter", "Tokens unchanged ({})", upstream);
            return;
        }

        match store.get(key) {
            Ok(snapshot) => self.replace(snapshot),
            Err(e) => warn!(target: "reporter", "Token fetch failed, using cache: {}", e),
        }
    }

    fn replace(&mut self, snapshot: TokenSnapshot) {
        self.fetches += 1;
        info!(
            target: "reporter",
            "Tokens refreshed: {} recipients, version {}",
            snapshot.tokens.len(),
            snapshot.version
        );
        self.tokens = snapshot.tokens;
        self.version = Some(snapshot.version);
    }

    pub fn tokens(&self) -> &BTreeMap<String, String> {
        &self.tokens
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of full fetches performed
    pub fn fetches(&self) -> u64 {
        self.fetches
    }
}
