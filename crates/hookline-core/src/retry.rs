//! Retry policy for failed sends

use chrono::Duration;
use hookline_common::config::RetryConfig;
use hookline_storage::Backoff;

/// How many times an entry is retried and how long to wait between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: i32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::new(base, cap),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::seconds(config.backoff_base_secs as i64),
            Duration::seconds(config.backoff_cap_secs as i64),
        )
    }

    /// Delay applied after a transient failure at `retry_count`
    pub fn delay(&self, retry_count: i32) -> Duration {
        self.backoff.delay(retry_count)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_retries: 5,
            backoff_base_secs: 30,
            backoff_cap_secs: 300,
        });

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay(0), Duration::seconds(30));
        assert_eq!(policy.delay(2), Duration::seconds(120));
        assert_eq!(policy.delay(4), Duration::seconds(300));
    }
}
