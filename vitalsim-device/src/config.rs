//! Configuration resolution
//!
//! Handles:
//! - CLI flags and environment variables (a `.env` file is loaded first by `main`)
//! - Default certificate layout `certs/devices/{device_id}/device-{cert,key}.pem`
//! - Validation before any connection attempt (hostname, files, numeric ranges)

use crate::alert::AlertThresholds;
use crate::error::ConfigurationError;
use crate::session::reconnect::ExponentialBackoff;
use crate::telemetry::AnomalyProfile;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

const IOT_HUB_API_VERSION: &str = "2021-04-12";
const MIN_KEEP_ALIVE_SECS: u64 = 5;
/// Upper bound for interval and duration: one year
const MAX_SPAN_SECS: u64 = 365 * 24 * 3600;

/// Command line / environment surface
#[derive(Debug, Clone, Parser)]
#[command(name = "vitalsim-device")]
#[command(about = "Simulated vital-sign monitor publishing over MQTT with X.509 client certificates")]
#[command(version)]
pub struct Cli {
    /// Device identifier (thing id)
    #[arg(value_name = "DEVICE_ID", env = "DEVICE_ID", default_value = "thing_001")]
    pub device_id: String,

    /// Broker hostname (e.g. my-hub.azure-devices.net)
    #[arg(long, env = "IOTHUB_HOSTNAME")]
    pub hostname: Option<String>,

    /// MQTT over TLS port
    #[arg(long, env = "MQTT_PORT", default_value_t = 8883)]
    pub port: u16,

    /// Device certificate (PEM)
    #[arg(long, env = "CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// Device private key (PEM)
    #[arg(long, env = "KEY_PATH")]
    pub key_path: Option<PathBuf>,

    /// CA bundle used to verify the broker (PEM)
    #[arg(long, env = "CA_PATH", default_value = "certs/root-ca.pem")]
    pub ca_path: PathBuf,

    /// Seconds between telemetry messages
    #[arg(long, env = "TELEMETRY_INTERVAL", default_value_t = 5)]
    pub interval: u64,

    /// Total run time in seconds (runs until Ctrl+C when omitted)
    #[arg(long, env = "SIMULATION_DURATION")]
    pub duration: Option<u64>,

    /// Inject anomalous vitals
    #[arg(long, env = "ENABLE_ANOMALIES", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub enable_anomalies: bool,

    /// Probability of injecting one anomaly per reading
    #[arg(long, env = "ANOMALY_PROBABILITY", default_value_t = 0.10)]
    pub anomaly_probability: f64,

    /// Also flag temperature below 36.0 °C as an alert
    #[arg(long, env = "ALERT_LOW_TEMPERATURE", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub alert_low_temperature: bool,

    /// MQTT keep-alive in seconds
    #[arg(long, env = "MQTT_KEEP_ALIVE", default_value_t = 60)]
    pub keep_alive: u64,

    /// Seconds to wait for the connection acknowledgment
    #[arg(long, env = "CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Consecutive reconnect attempts before giving up (0 = retry forever)
    #[arg(long, env = "RECONNECT_MAX_ATTEMPTS", default_value_t = 5)]
    pub reconnect_max_attempts: u32,
}

/// Who the device is and where it connects. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
    hostname: String,
    port: u16,
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_path: PathBuf,
}

/// PEM bytes handed to the TLS layer
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &self.ca.len())
            .field("client_cert", &self.client_cert.len())
            .field("client_key", &"<redacted>")
            .finish()
    }
}

impl DeviceIdentity {
    /// Builds the identity, failing when a certificate, key or CA file is missing.
    pub fn new(
        device_id: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Result<Self, ConfigurationError> {
        let device_id = device_id.into().trim().to_string();
        if device_id.is_empty() {
            return Err(ConfigurationError::EmptyDeviceId);
        }
        let hostname = hostname.into().trim().to_string();
        if hostname.is_empty() {
            return Err(ConfigurationError::MissingHostname);
        }

        let identity = Self {
            device_id,
            hostname,
            port,
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: ca_path.into(),
        };
        require_file("Certificate", &identity.cert_path)?;
        require_file("Private key", &identity.key_path)?;
        require_file("CA bundle", &identity.ca_path)?;
        Ok(identity)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    /// IoT Hub username; authentication itself relies on the client certificate.
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.hostname, self.device_id, IOT_HUB_API_VERSION
        )
    }

    /// Device-to-cloud topic
    pub fn telemetry_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.device_id)
    }

    /// Cloud-to-device subscription filter
    pub fn devicebound_filter(&self) -> String {
        format!("devices/{}/messages/devicebound/#", self.device_id)
    }

    pub fn load_tls(&self) -> Result<TlsMaterial, ConfigurationError> {
        Ok(TlsMaterial {
            ca: read_file("CA bundle", &self.ca_path)?,
            client_cert: read_file("Certificate", &self.cert_path)?,
            client_key: read_file("Private key", &self.key_path)?,
        })
    }
}

/// Run-time knobs of the simulation
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub interval: Duration,
    pub duration: Option<Duration>,
    pub anomalies: AnomalyProfile,
    pub thresholds: AlertThresholds,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ExponentialBackoff,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub identity: DeviceIdentity,
    pub settings: SimulationSettings,
}

impl Cli {
    /// Default certificate location for a device
    pub fn default_cert_path(device_id: &str) -> PathBuf {
        PathBuf::from(format!("certs/devices/{device_id}/device-cert.pem"))
    }

    /// Default private key location for a device
    pub fn default_key_path(device_id: &str) -> PathBuf {
        PathBuf::from(format!("certs/devices/{device_id}/device-key.pem"))
    }

    pub fn settings(&self) -> Result<SimulationSettings, ConfigurationError> {
        if self.interval == 0 {
            return Err(invalid("TELEMETRY_INTERVAL", "must be at least 1 second"));
        }
        if self.interval > MAX_SPAN_SECS {
            return Err(invalid("TELEMETRY_INTERVAL", "must not exceed one year"));
        }
        if self.duration.is_some_and(|d| d > MAX_SPAN_SECS) {
            return Err(invalid("SIMULATION_DURATION", "must not exceed one year"));
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return Err(invalid("ANOMALY_PROBABILITY", "must be between 0 and 1"));
        }
        if self.keep_alive < MIN_KEEP_ALIVE_SECS {
            return Err(invalid("MQTT_KEEP_ALIVE", "must be at least 5 seconds"));
        }
        if self.connect_timeout == 0 {
            return Err(invalid("CONNECT_TIMEOUT", "must be at least 1 second"));
        }

        let thresholds = if self.alert_low_temperature {
            AlertThresholds::default().with_low_temperature()
        } else {
            AlertThresholds::default()
        };

        Ok(SimulationSettings {
            interval: Duration::from_secs(self.interval),
            duration: self.duration.map(Duration::from_secs),
            anomalies: AnomalyProfile {
                enabled: self.enable_anomalies,
                probability: self.anomaly_probability,
            },
            thresholds,
            keep_alive: Duration::from_secs(self.keep_alive),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            reconnect: ExponentialBackoff {
                max_attempts: (self.reconnect_max_attempts > 0).then_some(self.reconnect_max_attempts),
                ..ExponentialBackoff::default()
            },
        })
    }

    /// Validate everything and build the immutable identity.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigurationError> {
        let settings = self.settings()?;
        let hostname = self.hostname.clone().ok_or(ConfigurationError::MissingHostname)?;
        let cert_path = self
            .cert_path
            .clone()
            .unwrap_or_else(|| Self::default_cert_path(&self.device_id));
        let key_path = self
            .key_path
            .clone()
            .unwrap_or_else(|| Self::default_key_path(&self.device_id));

        let identity = DeviceIdentity::new(
            self.device_id,
            hostname,
            self.port,
            cert_path,
            key_path,
            self.ca_path,
        )?;
        Ok(ResolvedConfig { identity, settings })
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

fn require_file(kind: &'static str, path: &Path) -> Result<(), ConfigurationError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigurationError::MissingFile {
            kind,
            path: path.to_path_buf(),
        })
    }
}

fn read_file(kind: &'static str, path: &Path) -> Result<Vec<u8>, ConfigurationError> {
    std::fs::read(path).map_err(|source| ConfigurationError::UnreadableFile {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cert_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["device-cert.pem", "device-key.pem", "root-ca.pem"] {
            std::fs::write(dir.path().join(name), format!("-----BEGIN {name}-----\n")).unwrap();
        }
        dir
    }

    fn cli(dir: &TempDir, extra: &[&str]) -> Cli {
        let p = |name: &str| dir.path().join(name).to_string_lossy().to_string();
        let mut args = vec![
            "vitalsim-device".to_string(),
            "thing_042".to_string(),
            "--hostname".to_string(),
            "hub.example.net".to_string(),
            "--cert-path".to_string(),
            p("device-cert.pem"),
            "--key-path".to_string(),
            p("device-key.pem"),
            "--ca-path".to_string(),
            p("root-ca.pem"),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_resolve_valid_config() {
        let dir = cert_dir();
        let resolved = cli(&dir, &["--interval", "2", "--duration", "30"]).resolve().unwrap();

        let id = &resolved.identity;
        assert_eq!(id.device_id(), "thing_042");
        assert_eq!(id.port(), 8883);
        assert_eq!(id.telemetry_topic(), "devices/thing_042/messages/events/");
        assert_eq!(id.devicebound_filter(), "devices/thing_042/messages/devicebound/#");
        assert_eq!(id.username(), "hub.example.net/thing_042/?api-version=2021-04-12");

        let s = &resolved.settings;
        assert_eq!(s.interval, Duration::from_secs(2));
        assert_eq!(s.duration, Some(Duration::from_secs(30)));
        assert!(s.anomalies.enabled);
        assert_eq!(s.thresholds.temperature_low, None);
        assert_eq!(s.reconnect.max_attempts, Some(5));
    }

    #[test]
    fn test_tls_material_is_loaded() {
        let dir = cert_dir();
        let resolved = cli(&dir, &[]).resolve().unwrap();
        let tls = resolved.identity.load_tls().unwrap();
        assert!(tls.client_cert.starts_with(b"-----BEGIN device-cert.pem"));
        assert!(!format!("{tls:?}").contains("device-key"));
    }

    #[test]
    fn test_missing_hostname_is_fatal() {
        let dir = cert_dir();
        let mut c = cli(&dir, &[]);
        c.hostname = None;
        assert!(matches!(c.resolve(), Err(ConfigurationError::MissingHostname)));
    }

    #[test]
    fn test_missing_certificate_is_fatal() {
        let dir = cert_dir();
        std::fs::remove_file(dir.path().join("device-cert.pem")).unwrap();
        match cli(&dir, &[]).resolve() {
            Err(ConfigurationError::MissingFile { kind, .. }) => assert_eq!(kind, "Certificate"),
            other => panic!("expected missing certificate, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let dir = cert_dir();
        assert!(cli(&dir, &["--interval", "0"]).settings().is_err());
        assert!(cli(&dir, &["--anomaly-probability", "1.5"]).settings().is_err());
        assert!(cli(&dir, &["--keep-alive", "2"]).settings().is_err());
    }

    #[test]
    fn test_oversized_spans_rejected() {
        let dir = cert_dir();
        match cli(&dir, &["--duration", "18446744073709551615"]).settings() {
            Err(ConfigurationError::InvalidSetting { name, .. }) => assert_eq!(name, "SIMULATION_DURATION"),
            other => panic!("expected invalid duration, got {other:?}"),
        }
        match cli(&dir, &["--interval", "18446744073709551615"]).settings() {
            Err(ConfigurationError::InvalidSetting { name, .. }) => assert_eq!(name, "TELEMETRY_INTERVAL"),
            other => panic!("expected invalid interval, got {other:?}"),
        }

        let year = (365 * 24 * 3600).to_string();
        let s = cli(&dir, &["--duration", &year]).settings().unwrap();
        assert_eq!(s.duration, Some(Duration::from_secs(365 * 24 * 3600)));
    }

    #[test]
    fn test_flags_and_unlimited_reconnect() {
        let dir = cert_dir();
        let s = cli(
            &dir,
            &[
                "--enable-anomalies",
                "false",
                "--alert-low-temperature",
                "true",
                "--reconnect-max-attempts",
                "0",
            ],
        )
        .settings()
        .unwrap();
        assert!(!s.anomalies.enabled);
        assert_eq!(s.thresholds.temperature_low, Some(36.0));
        assert_eq!(s.reconnect.max_attempts, None);
    }

    #[test]
    fn test_default_certificate_layout() {
        assert_eq!(
            Cli::default_cert_path("thing_001"),
            PathBuf::from("certs/devices/thing_001/device-cert.pem")
        );
        assert_eq!(
            Cli::default_key_path("thing_001"),
            PathBuf::from("certs/devices/thing_001/device-key.pem")
        );
    }
}
