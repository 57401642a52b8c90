/*!
Helpers pour valider le contrat JSON de télémétrie D2C

Le payload publié sur `devices/{deviceId}/messages/events/` doit contenir
exactement ces champs (camelCase), avec des valeurs dans les bornes
physiologiques et une priorité cohérente avec le flag d'alerte.
*/

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Vue typée d'un payload de télémétrie publié
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TelemetryPayload {
    pub heart_rate: f64,
    pub spo2: f64,
    pub temperature: f64,
    pub status: String,
    pub timestamp: String,
    pub sequence_number: u64,
    pub device_id: String,
    pub message_id: String,
    pub alert: bool,
    pub priority: String,
}

impl TelemetryPayload {
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(&self.timestamp)?.with_timezone(&Utc))
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !(min..=max).contains(&value) {
        bail!("{} out of range: {} not in [{}, {}]", name, value, min, max);
    }
    Ok(())
}

/// Valide un payload contre le contrat et le retourne typé
pub fn validate_telemetry(json: &Value) -> Result<TelemetryPayload> {
    let payload: TelemetryPayload = serde_json::from_value(json.clone())?;

    check_range("heartRate", payload.heart_rate, 40.0, 200.0)?;
    check_range("spo2", payload.spo2, 70.0, 100.0)?;
    check_range("temperature", payload.temperature, 35.0, 42.0)?;

    if payload.status != "online" {
        bail!("Unexpected status: {}", payload.status);
    }
    let expected_priority = if payload.alert { "high" } else { "normal" };
    if payload.priority != expected_priority {
        bail!(
            "Priority {} inconsistent with alert={}",
            payload.priority,
            payload.alert
        );
    }
    if payload.message_id.is_empty() {
        bail!("Empty messageId");
    }
    if !payload.timestamp.ends_with('Z') {
        bail!("Timestamp is not UTC: {}", payload.timestamp);
    }
    payload.timestamp()?;

    log::debug!("✅ Telemetry #{} conforms to contract", payload.sequence_number);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "heartRate": 72.4,
            "spo2": 97.8,
            "temperature": 36.61,
            "status": "online",
            "timestamp": "2025-01-01T12:00:00.000000Z",
            "sequenceNumber": 3,
            "deviceId": "thing_001",
            "messageId": "5f1c2c1e-0000-4000-8000-000000000000",
            "alert": false,
            "priority": "normal"
        })
    }

    #[test]
    fn test_valid_payload() {
        let payload = validate_telemetry(&sample()).unwrap();
        assert_eq!(payload.sequence_number, 3);
        assert_eq!(payload.device_id, "thing_001");
    }

    #[test]
    fn test_inconsistent_priority_rejected() {
        let mut json = sample();
        json["alert"] = json!(true);
        assert!(validate_telemetry(&json).is_err());
    }

    #[test]
    fn test_unknown_or_missing_fields_rejected() {
        let mut extra = sample();
        extra["patientName"] = json!("x");
        assert!(validate_telemetry(&extra).is_err());

        let mut missing = sample();
        missing.as_object_mut().unwrap().remove("messageId");
        assert!(validate_telemetry(&missing).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut json = sample();
        json["spo2"] = json!(101.0);
        assert!(validate_telemetry(&json).is_err());
    }
}
