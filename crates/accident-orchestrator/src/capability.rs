//! Optional hardware components

use std::fmt;

use tracing::{info, warn};

/// Hardware component that may be missing
///
/// The system keeps running without absent components and reports them in
/// its health summary.
#[derive(Debug, Clone)]
pub enum Capability<T> {
    Present(T),
    Absent { reason: String },
}

/// Health line for one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub component: &'static str,
    pub present: bool,
    pub detail: String,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.present { "present" } else { "absent" };
        write!(f, "{}: {} ({})", self.component, status, self.detail)
    }
}

impl<T> Capability<T> {
    /// Wrap a bring-up result, logging the outcome
    pub fn from_result<E: fmt::Display>(component: &'static str, result: Result<T, E>) -> Self {
        match result {
            Ok(value) => {
                info!("{} available", component);
                Capability::Present(value)
            }
            Err(e) => {
                warn!("{} unavailable, running without it: {}", component, e);
                Capability::Absent {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn absent(reason: impl Into<String>) -> Self {
        Capability::Absent {
            reason: reason.into(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Capability::Present(value) => Some(value),
            Capability::Absent { .. } => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Capability::Present(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Capability::Present(_) => None,
            Capability::Absent { reason } => Some(reason),
        }
    }

    pub fn health(&self, component: &'static str) -> Health {
        Health {
            component,
            present: self.is_present(),
            detail: self.reason().unwrap_or("ok").to_string(),
        }
    }
}
