use crate::config::CircuitBreakerConfig;
use crate::types::Source;
use chrono::{DateTime, Duration, Utc};

/// Admission check for persistently failing sources.
///
/// A source is skipped while it has failed at least `failure_threshold` times
/// in a row and its last successful fetch is more recent than `reset_after`
/// (or it never had one). The breaker only reads source state.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker {
    pub failure_threshold: u32,
    pub reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.reset_after())
    }

    pub fn is_open(&self, source: &Source) -> bool {
        self.is_open_at(source, Utc::now())
    }

    pub fn is_open_at(&self, source: &Source, now: DateTime<Utc>) -> bool {
        if source.consecutive_failures < i64::from(self.failure_threshold) {
            return false;
        }

        match source.last_fetched_at {
            None => true,
            Some(last) => now.signed_duration_since(last) < self.reset_after,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}
