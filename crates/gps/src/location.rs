//! Location types and providers

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Reported until the receiver has a fix
    pub const FALLBACK: Location = Location {
        latitude: 30.0346762,
        longitude: 31.4295489,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Source of the position attached to accident records
pub trait LocationProvider: Send + Sync {
    fn last_known_location(&self) -> Location;
}

/// Position shared between the GPS task and its readers
#[derive(Debug, Clone, Default)]
pub struct LastKnownLocation {
    inner: Arc<RwLock<Option<Location>>>,
}

impl LastKnownLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, location: Location) {
        *self.inner.write() = Some(location);
    }

    /// A fix has been received since start-up
    pub fn has_fix(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl LocationProvider for LastKnownLocation {
    fn last_known_location(&self) -> Location {
        (*self.inner.read()).unwrap_or(Location::FALLBACK)
    }
}

/// Constant position, used when no receiver is fitted
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

impl Default for FixedLocation {
    fn default() -> Self {
        Self(Location::FALLBACK)
    }
}

impl LocationProvider for FixedLocation {
    fn last_known_location(&self) -> Location {
        self.0
    }
}
