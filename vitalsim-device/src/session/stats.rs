use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Running counters for one simulator process. Updated from both the
/// foreground publish path and the background event pump.
#[derive(Debug, Default)]
pub struct SessionStatistics {
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    messages_acknowledged: AtomicU64,
    messages_received: AtomicU64,
    connection_attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
    last_message_at: Mutex<Option<DateTime<Utc>>>,
}

/// Read-only copy handed to the caller at shutdown
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub messages_acknowledged: u64,
    pub messages_received: u64,
    pub connection_attempts: u32,
    pub last_error: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.lock() = Some(Utc::now());
    }

    pub fn record_failed(&self, error: impl ToString) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    pub fn record_acknowledged(&self) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: impl ToString) {
        *self.last_error.lock() = Some(error.to_string());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            last_message_at: *self.last_message_at.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let snap = SessionStatistics::new().snapshot();
        assert_eq!(snap.messages_sent, 0);
        assert_eq!(snap.messages_failed, 0);
        assert_eq!(snap.connection_attempts, 0);
        assert!(snap.last_error.is_none());
        assert!(snap.last_message_at.is_none());
    }

    #[test]
    fn test_failure_records_last_error() {
        let stats = SessionStatistics::new();
        stats.record_sent();
        stats.record_failed("Not connected - message not sent");
        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_failed, 1);
        assert_eq!(snap.last_error.as_deref(), Some("Not connected - message not sent"));
        assert!(snap.last_message_at.is_some());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(SessionStatistics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        stats.record_sent();
                        stats.record_acknowledged();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 4_000);
        assert_eq!(snap.messages_acknowledged, 4_000);
    }
}
