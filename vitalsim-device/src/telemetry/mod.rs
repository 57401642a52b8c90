//! Vital-sign telemetry for the simulated bedside monitor
//!
//! Provides:
//! - `VitalSignReading`: one clamped sample of heart rate, SpO2 and temperature
//! - `TelemetryMessage`: a reading annotated for the D2C topic
//! - `TelemetryGenerator`: gaussian baseline with bounded anomaly injection

pub mod generator;

pub use generator::{AnomalyProfile, TelemetryGenerator};

use crate::alert::{Classification, Priority};
use serde::Serialize;

pub const HEART_RATE_RANGE: (f64, f64) = (40.0, 200.0);
pub const SPO2_RANGE: (f64, f64) = (70.0, 100.0);
pub const TEMPERATURE_RANGE: (f64, f64) = (35.0, 42.0);

/// Device status reported with every reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
}

/// Which vital was overridden by anomaly injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    Tachycardia,
    Bradycardia,
    Hypoxemia,
    Fever,
}

/// One synthetic sample (matches the D2C telemetry schema)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSignReading {
    pub heart_rate: f64,
    pub spo2: f64,
    pub temperature: f64,
    pub status: DeviceStatus,
    pub timestamp: String,
    pub sequence_number: u64,
    #[serde(skip)]
    pub injected: Option<Anomaly>,
}

/// Payload published on `devices/{deviceId}/messages/events/`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    #[serde(flatten)]
    pub reading: VitalSignReading,
    pub device_id: String,
    pub message_id: String,
    pub alert: bool,
    pub priority: Priority,
}

impl TelemetryMessage {
    pub fn new(device_id: &str, reading: VitalSignReading, classification: &Classification) -> Self {
        Self {
            reading,
            device_id: device_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            alert: classification.is_alert,
            priority: classification.priority,
        }
    }

    /// Canonical JSON body sent to the broker
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertClassifier;

    fn reading(heart_rate: f64) -> VitalSignReading {
        VitalSignReading {
            heart_rate,
            spo2: 97.0,
            temperature: 36.5,
            status: DeviceStatus::Online,
            timestamp: "2025-11-03T10:00:00.000000Z".to_string(),
            sequence_number: 7,
            injected: None,
        }
    }

    #[test]
    fn test_payload_schema() {
        let r = reading(110.0);
        let c = AlertClassifier::default().classify(&r);
        let msg = TelemetryMessage::new("thing_001", r, &c);

        let json: serde_json::Value = serde_json::from_slice(&msg.to_payload().unwrap()).unwrap();
        assert_eq!(json["deviceId"], "thing_001");
        assert_eq!(json["heartRate"], 110.0);
        assert_eq!(json["spo2"], 97.0);
        assert_eq!(json["temperature"], 36.5);
        assert_eq!(json["status"], "online");
        assert_eq!(json["sequenceNumber"], 7);
        assert_eq!(json["alert"], true);
        assert_eq!(json["priority"], "high");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(json.get("injected").is_none());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let c = AlertClassifier::default().classify(&reading(75.0));
        let a = TelemetryMessage::new("thing_001", reading(75.0), &c);
        let b = TelemetryMessage::new("thing_001", reading(75.0), &c);
        assert_ne!(a.message_id, b.message_id);
    }
}
