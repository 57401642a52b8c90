/*!
# Vitalsim DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant les tests du simulateur sans broker:
- Transport MQTT en mémoire (`MockTransport`)
- Validation du contrat JSON de télémétrie
- Harness avec identité de device et certificats temporaires
*/

pub mod mqtt_stub;
pub mod contract_helpers;
pub mod test_utils;

pub use mqtt_stub::{ConnectBehaviour, MockTransport, PublishedMessage};
pub use contract_helpers::{validate_telemetry, TelemetryPayload};
pub use test_utils::TestHarness;
