//! Rolling Frame Buffer
//!
//! Provides a fixed-capacity FIFO store that evicts the oldest element when full.
//! Used by the capture thread to hold the most recent video window.

mod buffer;

pub use buffer::{concat, RollingBuffer};

use thiserror::Error;

/// Buffer error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A rolling buffer must be able to hold at least one element
    #[error("Rolling buffer capacity must be greater than zero")]
    ZeroCapacity,
}
