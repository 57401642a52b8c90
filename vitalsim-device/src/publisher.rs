//! Telemetry publish loop
//!
//! One tick every `interval`: generate → classify → publish → report.
//! Stops when the configured duration is used up, when the shutdown future
//! resolves, or when the session can never publish again. Always ends with a
//! graceful disconnect.

use crate::alert::{AlertClassifier, Classification};
use crate::error::PublishError;
use crate::session::{PublishAck, SessionManager, Transport};
use crate::telemetry::{TelemetryGenerator, TelemetryMessage};
use rand::rngs::StdRng;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    DurationElapsed,
    Cancelled,
    SessionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub outcome: LoopOutcome,
    /// Publish attempts made, successful or not
    pub attempted: u64,
}

/// Everything that happened in one tick
#[derive(Debug)]
pub struct TickOutcome {
    pub message: TelemetryMessage,
    pub classification: Classification,
    pub result: Result<PublishAck, PublishError>,
}

impl TickOutcome {
    pub fn sequence_number(&self) -> u64 {
        self.message.reading.sequence_number
    }
}

/// Longest span the loop schedules; `Instant` arithmetic overflows beyond it.
const MAX_SPAN: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

fn bounded(span: Duration) -> Duration {
    span.min(MAX_SPAN)
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

type TickObserver<'a> = Box<dyn FnMut(&TickOutcome) + Send + 'a>;

pub struct PublishLoop<'a, T: Transport, R: Rng = StdRng> {
    session: &'a SessionManager<T>,
    generator: TelemetryGenerator<R>,
    classifier: AlertClassifier,
    interval: Duration,
    duration: Option<Duration>,
    next_sequence: u64,
    observer: Option<TickObserver<'a>>,
}

impl<'a, T: Transport, R: Rng> PublishLoop<'a, T, R> {
    pub fn new(
        session: &'a SessionManager<T>,
        generator: TelemetryGenerator<R>,
        classifier: AlertClassifier,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            generator,
            classifier,
            interval,
            duration: None,
            next_sequence: 0,
            observer: None,
        }
    }

    /// Bounded run; `None` runs until cancelled
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Called after every tick, e.g. to print a console line
    pub fn on_tick(mut self, observer: impl FnMut(&TickOutcome) + Send + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Number of ticks that fit in the configured duration
    pub fn planned_ticks(&self) -> Option<u64> {
        let interval = bounded(self.interval).as_nanos().max(1);
        self.duration.map(|d| (bounded(d).as_nanos() / interval) as u64)
    }

    /// Ticks at `interval, 2·interval, …`. A tick whose publish is still in
    /// flight is abandoned on shutdown and not counted in the statistics.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> LoopSummary {
        tokio::pin!(shutdown);

        let start = Instant::now();
        let interval = bounded(self.interval);
        let deadline = self.duration.map(|d| start + bounded(d));
        let planned = self.planned_ticks();
        let mut ticker = tokio::time::interval_at(start + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting telemetry: interval {:?}, duration {}",
            self.interval,
            self.duration.map_or("unbounded".to_string(), |d| format!("{d:?}"))
        );

        let mut attempted: u64 = 0;
        let outcome = loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break LoopOutcome::DurationElapsed;
            }
            if planned.is_some_and(|planned| attempted >= planned) {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break LoopOutcome::Cancelled,
                    _ = expiry(deadline) => break LoopOutcome::DurationElapsed,
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break LoopOutcome::Cancelled,
                _ = ticker.tick() => {}
                _ = expiry(deadline) => break LoopOutcome::DurationElapsed,
            }

            attempted += 1;
            let tick = tokio::select! {
                biased;
                _ = &mut shutdown => break LoopOutcome::Cancelled,
                tick = self.tick() => tick,
            };
            let lost = matches!(tick.result, Err(PublishError::SessionClosed));
            if let Some(observer) = self.observer.as_mut() {
                observer(&tick);
            }
            if lost {
                break LoopOutcome::SessionLost;
            }
        };

        match outcome {
            LoopOutcome::DurationElapsed => info!("Duration completed after {} messages", attempted),
            LoopOutcome::Cancelled => info!("Simulation stopped by user"),
            LoopOutcome::SessionLost => warn!("Session lost, stopping simulation"),
        }
        self.session.disconnect().await;

        LoopSummary { outcome, attempted }
    }

    async fn tick(&mut self) -> TickOutcome {
        let sequence_number = self.next_sequence;
        self.next_sequence += 1;

        let reading = self.generator.generate(sequence_number);
        let classification = self.classifier.classify(&reading);
        let message = TelemetryMessage::new(self.session.device_id(), reading, &classification);

        let result = self.session.publish(&message).await;
        match &result {
            Ok(ack) => debug!("Message #{} queued ({} bytes)", sequence_number, ack.bytes),
            Err(e) => warn!("Message #{} not sent: {}", sequence_number, e),
        }

        TickOutcome {
            message,
            classification,
            result,
        }
    }
}
