//! Identity file persistence
//!
//! One `key,value` line per field:
//!
//! ```text
//! id,JT123
//! model,Corolla
//! owner,Mona
//! emergency,0100,0122
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{EmergencyContacts, VehicleError, VehicleField, VehicleInfo};

/// Default location of the identity file
pub const DEFAULT_VEHICLE_FILE: &str = "data/config.csv";

/// Identity file on disk
#[derive(Debug, Clone)]
pub struct VehicleStore {
    path: PathBuf,
}

impl Default for VehicleStore {
    fn default() -> Self {
        Self::new(DEFAULT_VEHICLE_FILE)
    }
}

impl VehicleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the identity; a missing file yields an empty identity
    pub fn load(&self) -> Result<VehicleInfo, VehicleError> {
        if !self.path.exists() {
            debug!(target: "vehicle", "No identity file at {}", self.path.display());
            return Ok(VehicleInfo::default());
        }

        info!(target: "vehicle", "Reading vehicle identity from {}", self.path.display());
        let contents = fs::read_to_string(&self.path)?;
        Ok(parse(&contents))
    }

    /// Write the identity, creating the parent directory if needed
    pub fn save(&self, info: &VehicleInfo) -> Result<(), VehicleError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, render(info))?;
        info!(target: "vehicle", "Vehicle identity saved to {}", self.path.display());
        Ok(())
    }
}

/// Parse identity lines; unknown keys and blank lines are skipped
pub fn parse(contents: &str) -> VehicleInfo {
    let mut info = VehicleInfo::default();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(',') else {
            warn!(target: "vehicle", "Ignoring malformed identity line: {}", line);
            continue;
        };

        match VehicleField::from_key(key.trim()) {
            Some(VehicleField::ChassisId) => info.chassis_id = value.trim().to_string(),
            Some(VehicleField::Model) => info.model = value.trim().to_string(),
            Some(VehicleField::Owner) => info.owner = value.trim().to_string(),
            Some(VehicleField::Emergency) => info.emergency = EmergencyContacts::parse(value),
            None => debug!(target: "vehicle", "Ignoring unknown identity key {}", key),
        }
    }

    info
}

/// Render the identity in file form
pub fn render(info: &VehicleInfo) -> String {
    format!(
        "{},{}\n{},{}\n{},{}\n{},{}\n",
        VehicleField::ChassisId.key(),
        info.chassis_id,
        VehicleField::Model.key(),
        info.model,
        VehicleField::Owner.key(),
        info.owner,
        VehicleField::Emergency.key(),
        info.emergency,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_file() {
        let info = parse("id,JT123\nmodel,Corolla\n\nowner, Mona \ncolor,red\nemergency,0100,0122\n");

        assert_eq!(info.chassis_id, "JT123");
        assert_eq!(info.model, "Corolla");
        assert_eq!(info.owner, "Mona");
        assert_eq!(info.emergency.primary, "0100");
        assert_eq!(info.emergency.secondary.as_deref(), Some("0122"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = VehicleStore::new(dir.path().join("data/config.csv"));
        let info = VehicleInfo {
            chassis_id: "JT123".to_string(),
            model: "Corolla".to_string(),
            owner: "Mona".to_string(),
            emergency: EmergencyContacts::new("0100", None),
        };

        store.save(&info).unwrap();
        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.ends_with("emergency,0100,\n"));
        assert_eq!(store.load().unwrap(), info);
    }

    #[test]
    fn test_missing_file_is_empty_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = VehicleStore::new(dir.path().join("absent.csv"));
        let info = store.load().unwrap();
        assert_eq!(info.missing_fields().len(), 4);
    }
}
