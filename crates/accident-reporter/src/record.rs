//! Accident record and notification payload

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vehicle::{VehicleField, VehicleInfo};

/// Payload delivered to each recipient
pub type AccidentPayload = BTreeMap<String, String>;

/// A recorded accident; built only once its video is on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// Trigger instant, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Video file name inside the capture directory
    pub video_filename: String,
    pub vehicle: VehicleInfo,
}

impl AccidentRecord {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp_ms: i64,
        video_filename: impl Into<String>,
        vehicle: VehicleInfo,
    ) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            video_filename: video_filename.into(),
            vehicle,
        }
    }

    /// Flat string map sent with every notification
    pub fn payload(&self) -> AccidentPayload {
        let vehicle = &self.vehicle;
        [
            ("lat", self.latitude.to_string()),
            ("lng", self.longitude.to_string()),
            ("timestamp", self.timestamp_ms.to_string()),
            ("video", self.video_filename.clone()),
            (VehicleField::ChassisId.key(), vehicle.chassis_id.clone()),
            (VehicleField::Model.key(), vehicle.model.clone()),
            (VehicleField::Owner.key(), vehicle.owner.clone()),
            (VehicleField::Emergency.key(), vehicle.emergency.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}
