//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of the push channel to open.
    pub channel_name: String,
    /// Reconnect configuration.
    pub retry: RetryConfig,
    /// Upper bound on a single bulk load. `None` waits indefinitely.
    pub load_timeout: Option<Duration>,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            retry: RetryConfig::default(),
            load_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the bulk load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Disables the bulk load timeout.
    pub fn without_load_timeout(mut self) -> Self {
        self.load_timeout = None;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("bookmarks-changes")
    }
}

/// Configuration for reconnect behavior.
///
/// The default is a fixed 5 second delay between attempts. Setting a
/// multiplier above 1.0 turns it into exponential backoff capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a fixed-delay configuration.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before reconnect attempt `attempt` (1-indexed:
    /// the first retry after a failure is attempt 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .max(1.0)
                .powi(attempt.saturating_sub(1) as i32);

        let cap = self.max_delay.max(self.initial_delay).as_secs_f64();
        let delay_secs = base_delay.min(cap);

        if self.add_jitter {
            // Up to 25% extra
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5)).with_max_delay(Duration::from_secs(60))
    }
}

/// Cheap pseudo-random fraction in `[0, 1)` from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("my-channel")
            .with_retry(RetryConfig::fixed(Duration::from_millis(250)))
            .with_load_timeout(Duration::from_secs(5));

        assert_eq!(config.channel_name, "my-channel");
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.load_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.without_load_timeout().load_timeout, None);
    }

    #[test]
    fn default_retry_is_fixed_five_seconds() {
        let config = RetryConfig::default();
        for attempt in 1..6 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn retry_delay_backoff() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = RetryConfig::fixed(Duration::from_millis(400)).with_jitter(true);
        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(500));
    }
}
