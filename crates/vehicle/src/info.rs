//! Vehicle identity types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field of the vehicle identity, keyed as in the identity file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleField {
    ChassisId,
    Model,
    Owner,
    Emergency,
}

impl VehicleField {
    pub const ALL: [VehicleField; 4] = [
        VehicleField::ChassisId,
        VehicleField::Model,
        VehicleField::Owner,
        VehicleField::Emergency,
    ];

    /// Key used in the identity file and the accident payload
    pub fn key(self) -> &'static str {
        match self {
            VehicleField::ChassisId => "id",
            VehicleField::Model => "model",
            VehicleField::Owner => "owner",
            VehicleField::Emergency => "emergency",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }
}

/// Emergency contacts; the secondary one is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContacts {
    pub primary: String,
    pub secondary: Option<String>,
}

impl EmergencyContacts {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Parse the `primary,secondary` form
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(2, ',');
        let primary = parts.next().unwrap_or_default().trim().to_string();
        let secondary = parts.next().map(|s| s.trim().to_string());
        Self::new(primary, secondary)
    }

    pub fn is_empty(&self) -> bool {
        self.primary.trim().is_empty()
    }
}

impl fmt::Display for EmergencyContacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}",
            self.primary,
            self.secondary.as_deref().unwrap_or_default()
        )
    }
}

/// Identity attached to every accident report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub chassis_id: String,
    pub model: String,
    pub owner: String,
    pub emergency: EmergencyContacts,
}

impl VehicleInfo {
    /// Fields that still have to be provisioned
    pub fn missing_fields(&self) -> Vec<VehicleField> {
        VehicleField::ALL
            .into_iter()
            .filter(|field| match field {
                VehicleField::ChassisId => self.chassis_id.trim().is_empty(),
                VehicleField::Model => self.model.trim().is_empty(),
                VehicleField::Owner => self.owner.trim().is_empty(),
                VehicleField::Emergency => self.emergency.is_empty(),
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}
