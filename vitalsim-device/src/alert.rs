//! Alert classification for vital-sign readings
//!
//! The same classification drives the `alert`/`priority` fields of the
//! published message and the console highlighting.

use crate::telemetry::VitalSignReading;
use serde::Serialize;

/// Message priority tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

/// Vital that tripped a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    HeartRate,
    Spo2,
    Temperature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_alert: bool,
    pub priority: Priority,
    pub reasons: Vec<AlertReason>,
}

impl Classification {
    pub fn flags(&self, reason: AlertReason) -> bool {
        self.reasons.contains(&reason)
    }
}

/// Alert thresholds. A reading is anomalous when any vital falls outside its bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub heart_rate_high: f64,
    pub heart_rate_low: f64,
    pub spo2_low: f64,
    pub temperature_high: f64,
    /// Hypothermia rule, off unless explicitly enabled
    pub temperature_low: Option<f64>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heart_rate_high: 100.0,
            heart_rate_low: 60.0,
            spo2_low: 90.0,
            temperature_high: 37.5,
            temperature_low: None,
        }
    }
}

impl AlertThresholds {
    pub fn with_low_temperature(mut self) -> Self {
        self.temperature_low = Some(36.0);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlertClassifier {
    thresholds: AlertThresholds,
}

impl AlertClassifier {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    pub fn classify(&self, reading: &VitalSignReading) -> Classification {
        self.classify_values(reading.heart_rate, reading.spo2, reading.temperature)
    }

    pub fn classify_values(&self, heart_rate: f64, spo2: f64, temperature: f64) -> Classification {
        let t = &self.thresholds;
        let mut reasons = Vec::new();

        if heart_rate > t.heart_rate_high || heart_rate < t.heart_rate_low {
            reasons.push(AlertReason::HeartRate);
        }
        if spo2 < t.spo2_low {
            reasons.push(AlertReason::Spo2);
        }
        let too_cold = t.temperature_low.is_some_and(|low| temperature < low);
        if temperature > t.temperature_high || too_cold {
            reasons.push(AlertReason::Temperature);
        }

        let is_alert = !reasons.is_empty();
        Classification {
            is_alert,
            priority: if is_alert { Priority::High } else { Priority::Normal },
            reasons,
        }
    }
}
