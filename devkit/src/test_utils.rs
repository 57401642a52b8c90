/*!
Test Harness pour le simulateur Vitalsim

Facilite l'écriture de tests avec:
- Identité de device complète (certificats temporaires)
- `SessionManager` branché sur le `MockTransport`
- Boucle de publication déterministe (générateur à graine fixe)
*/

use crate::mqtt_stub::MockTransport;
use anyhow::{Context, Result};
use std::time::Duration;
use tempfile::TempDir;
use vitalsim_device::session::DEFAULT_CONNECT_TIMEOUT;
use vitalsim_device::{
    AlertClassifier, AnomalyProfile, DeviceIdentity, PublishLoop, SessionManager,
    TelemetryGenerator,
};

pub const TEST_DEVICE_ID: &str = "thing_test";
pub const TEST_HOSTNAME: &str = "test-hub.azure-devices.net";
pub const TEST_KEEP_ALIVE: Duration = Duration::from_secs(60);
const TEST_SEED: u64 = 42;

/// Harness de test complet pour une session simulée
pub struct TestHarness {
    pub transport: MockTransport,
    pub session: SessionManager<MockTransport>,
    pub identity: DeviceIdentity,
    _certs: TempDir,
}

impl TestHarness {
    /// Crée un harness avec un broker qui accepte la connexion
    pub fn new() -> Result<Self> {
        Self::with_transport(MockTransport::new(), DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_transport(transport: MockTransport, connect_timeout: Duration) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let certs = tempfile::tempdir().context("Failed to create cert dir")?;
        let write = |name: &str| -> Result<std::path::PathBuf> {
            let path = certs.path().join(name);
            std::fs::write(&path, format!("-----BEGIN TEST-----\n{name}\n-----END TEST-----\n"))?;
            Ok(path)
        };
        let cert = write("device-cert.pem")?;
        let key = write("device-key.pem")?;
        let ca = write("root-ca.pem")?;

        let identity = DeviceIdentity::new(TEST_DEVICE_ID, TEST_HOSTNAME, 8883, cert, key, ca)?;
        let session = SessionManager::new(&identity, transport.clone(), connect_timeout);

        Ok(Self {
            transport,
            session,
            identity,
            _certs: certs,
        })
    }

    /// Harness déjà connecté
    pub async fn connected() -> Result<Self> {
        let harness = Self::new()?;
        harness.session.connect(TEST_KEEP_ALIVE).await?;
        log::info!("🔗 Harness connected");
        Ok(harness)
    }

    /// Boucle de publication reproductible sur la session du harness
    pub fn publish_loop(
        &self,
        interval: Duration,
        duration: Option<Duration>,
        anomalies: AnomalyProfile,
    ) -> PublishLoop<'_, MockTransport> {
        PublishLoop::new(
            &self.session,
            TelemetryGenerator::seeded(TEST_SEED, anomalies),
            AlertClassifier::default(),
            interval,
        )
        .with_duration(duration)
    }
}

/// Attend qu'une condition devienne vraie (5s max)
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("Timed out waiting for: {what}"))
}
