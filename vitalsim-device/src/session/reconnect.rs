use std::time::Duration;

/// Decides whether, and after how long, the transport retries a lost
/// connection. `attempt` counts consecutive failures starting at 1 and
/// resets after every accepted connection.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Delay doubles on every failure up to `max_delay`; gives up after
/// `max_attempts` when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        let delay = self.initial_delay.saturating_mul(factor);
        Some(delay.min(self.max_delay))
    }
}

/// Never retry: the first connection error closes the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        };
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.next_delay(n).unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.next_delay(200), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_backoff_gives_up_after_max_attempts() {
        let policy = ExponentialBackoff::default();
        assert!(policy.next_delay(5).is_some());
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn test_no_reconnect() {
        assert_eq!(NoReconnect.next_delay(1), None);
    }
}
