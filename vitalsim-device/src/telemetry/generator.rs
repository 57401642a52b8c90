use super::{
    Anomaly, DeviceStatus, VitalSignReading, HEART_RATE_RANGE, SPO2_RANGE, TEMPERATURE_RANGE,
};
use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// (mean, standard deviation)
type Gaussian = (f64, f64);

const BASELINE_HEART_RATE: Gaussian = (75.0, 10.0);
const BASELINE_SPO2: Gaussian = (97.0, 2.0);
const BASELINE_TEMPERATURE: Gaussian = (36.5, 0.5);

const TACHYCARDIA: Gaussian = (120.0, 5.0);
const BRADYCARDIA: Gaussian = (45.0, 5.0);
const HYPOXEMIA: Gaussian = (88.0, 2.0);
const FEVER: Gaussian = (38.5, 0.3);

pub const DEFAULT_ANOMALY_PROBABILITY: f64 = 0.10;

/// Controls deliberate out-of-range readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyProfile {
    pub enabled: bool,
    /// Must lie in [0, 1]; validated when the configuration is resolved.
    pub probability: f64,
}

impl Default for AnomalyProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: DEFAULT_ANOMALY_PROBABILITY,
        }
    }
}

impl AnomalyProfile {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            probability: 0.0,
        }
    }
}

/// Synthetic vital-sign source
pub struct TelemetryGenerator<R = StdRng> {
    rng: R,
    profile: AnomalyProfile,
}

impl TelemetryGenerator<StdRng> {
    pub fn new(profile: AnomalyProfile) -> Self {
        Self::with_rng(StdRng::from_entropy(), profile)
    }

    /// Reproducible generator for tests and replays
    pub fn seeded(seed: u64, profile: AnomalyProfile) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), profile)
    }
}

impl<R: Rng> TelemetryGenerator<R> {
    pub fn with_rng(rng: R, profile: AnomalyProfile) -> Self {
        Self { rng, profile }
    }

    pub fn profile(&self) -> AnomalyProfile {
        self.profile
    }

    /// Produce one reading stamped with `sequence_number` and the current UTC time.
    pub fn generate(&mut self, sequence_number: u64) -> VitalSignReading {
        let mut heart_rate = self.draw(BASELINE_HEART_RATE);
        let mut spo2 = self.draw(BASELINE_SPO2);
        let mut temperature = self.draw(BASELINE_TEMPERATURE);

        let injected = self.pick_anomaly();
        match injected {
            Some(Anomaly::Tachycardia) => heart_rate = self.draw(TACHYCARDIA),
            Some(Anomaly::Bradycardia) => heart_rate = self.draw(BRADYCARDIA),
            Some(Anomaly::Hypoxemia) => spo2 = self.draw(HYPOXEMIA),
            Some(Anomaly::Fever) => temperature = self.draw(FEVER),
            None => {}
        }

        VitalSignReading {
            heart_rate: round_to(clamp(heart_rate, HEART_RATE_RANGE), 1),
            spo2: round_to(clamp(spo2, SPO2_RANGE), 1),
            temperature: round_to(clamp(temperature, TEMPERATURE_RANGE), 2),
            status: DeviceStatus::Online,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            sequence_number,
            injected,
        }
    }

    fn pick_anomaly(&mut self) -> Option<Anomaly> {
        if !self.profile.enabled || !self.rng.gen_bool(self.profile.probability) {
            return None;
        }
        let anomaly = match self.rng.gen_range(0..3) {
            0 if self.rng.gen_bool(0.5) => Anomaly::Tachycardia,
            0 => Anomaly::Bradycardia,
            1 => Anomaly::Hypoxemia,
            _ => Anomaly::Fever,
        };
        Some(anomaly)
    }

    fn draw(&mut self, (mean, std_dev): Gaussian) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * z
    }
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    value.clamp(min, max)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(value: f64, (min, max): (f64, f64)) -> bool {
        value >= min && value <= max
    }

    #[test]
    fn test_readings_stay_within_physical_bounds() {
        for profile in [
            AnomalyProfile::disabled(),
            AnomalyProfile::default(),
            AnomalyProfile { enabled: true, probability: 1.0 },
        ] {
            let mut generator = TelemetryGenerator::seeded(11, profile);
            for seq in 0..10_000 {
                let r = generator.generate(seq);
                assert!(in_range(r.heart_rate, HEART_RATE_RANGE), "heart rate {}", r.heart_rate);
                assert!(in_range(r.spo2, SPO2_RANGE), "spo2 {}", r.spo2);
                assert!(in_range(r.temperature, TEMPERATURE_RANGE), "temperature {}", r.temperature);
            }
        }
    }

    #[test]
    fn test_injection_rate_near_ten_percent() {
        let mut generator = TelemetryGenerator::seeded(2025, AnomalyProfile::default());
        let total = 20_000;
        let injected = (0..total)
            .filter(|seq| generator.generate(*seq).injected.is_some())
            .count();
        let rate = injected as f64 / total as f64;
        assert!((0.08..=0.12).contains(&rate), "injection rate {rate}");
    }

    #[test]
    fn test_disabled_profile_never_injects() {
        let mut generator = TelemetryGenerator::seeded(3, AnomalyProfile::disabled());
        assert!((0..5_000).all(|seq| generator.generate(seq).injected.is_none()));
    }

    #[test]
    fn test_every_anomaly_kind_occurs() {
        let mut generator =
            TelemetryGenerator::seeded(5, AnomalyProfile { enabled: true, probability: 1.0 });
        let kinds: Vec<Anomaly> = (0..2_000).filter_map(|seq| generator.generate(seq).injected).collect();
        for kind in [Anomaly::Tachycardia, Anomaly::Bradycardia, Anomaly::Hypoxemia, Anomaly::Fever] {
            assert!(kinds.contains(&kind), "{kind:?} never injected");
        }
    }

    #[test]
    fn test_rounding_and_stamping() {
        let mut generator = TelemetryGenerator::seeded(9, AnomalyProfile::default());
        for seq in 0..1_000 {
            let r = generator.generate(seq);
            assert_eq!(r.sequence_number, seq);
            assert!(((r.heart_rate * 10.0).round() - r.heart_rate * 10.0).abs() < 1e-6);
            assert!(((r.spo2 * 10.0).round() - r.spo2 * 10.0).abs() < 1e-6);
            assert!(((r.temperature * 100.0).round() - r.temperature * 100.0).abs() < 1e-6);
            assert!(r.timestamp.ends_with('Z'));
            assert!(chrono::DateTime::parse_from_rfc3339(&r.timestamp).is_ok());
        }
    }

    #[test]
    fn test_same_seed_same_vitals() {
        let mut a = TelemetryGenerator::seeded(77, AnomalyProfile::default());
        let mut b = TelemetryGenerator::seeded(77, AnomalyProfile::default());
        for seq in 0..100 {
            let (ra, rb) = (a.generate(seq), b.generate(seq));
            assert_eq!(ra.heart_rate, rb.heart_rate);
            assert_eq!(ra.spo2, rb.spo2);
            assert_eq!(ra.temperature, rb.temperature);
        }
    }
}
