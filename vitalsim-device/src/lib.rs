//! Vitalsim Device - simulated vital-sign monitor
//!
//! Publishes synthetic patient telemetry to a cloud IoT broker over MQTT/TLS,
//! authenticating with an X.509 client certificate.

pub mod alert;
pub mod config;
pub mod error;
pub mod publisher;
pub mod report;
pub mod session;
pub mod telemetry;

pub use alert::{AlertClassifier, AlertReason, AlertThresholds, Classification, Priority};
pub use config::{Cli, DeviceIdentity, ResolvedConfig, SimulationSettings, TlsMaterial};
pub use error::{ConfigurationError, ConnectionError, PublishError, TransportError};
pub use publisher::{LoopOutcome, LoopSummary, PublishLoop, TickOutcome};
pub use session::{
    EventStream, ExponentialBackoff, InboundMessage, MqttTransport, NoReconnect, PublishAck, ReconnectPolicy,
    SessionManager, SessionState, StatsSnapshot, Transport, TransportEvent,
};
pub use telemetry::{AnomalyProfile, TelemetryGenerator, TelemetryMessage, VitalSignReading};
