//! Vehicle Identity
//!
//! Identity of the vehicle the unit is mounted in, as attached to every
//! accident report:
//! - Chassis id, model and owner
//! - One required and one optional emergency contact
//! - Persistence in a `key,value` file and first-run provisioning

pub mod info;
pub mod provision;
pub mod store;

pub use info::{EmergencyContacts, VehicleField, VehicleInfo};
pub use provision::{ensure_provisioned, provision};
pub use store::{VehicleStore, DEFAULT_VEHICLE_FILE};

use thiserror::Error;

/// Vehicle identity error types
#[derive(Error, Debug)]
pub enum VehicleError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
