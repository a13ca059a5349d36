//! Tuning knobs for the sync and commit paths.

use std::time::Duration;

/// Configuration shared by the coordinator, scheduler, and commit engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Updates shorter than this many bytes are declined as truncated
    pub min_update_len: usize,

    /// Append attempts before a revise gives up with excess contention
    pub max_attempts: u32,

    /// Backoff after the first conflict; doubles on each further conflict
    pub retry_backoff: Duration,

    /// Upper bound for a single backoff sleep
    pub max_retry_backoff: Duration,

    /// TTL of the debounce lock; bursts inside it collapse into one commit
    pub commit_debounce: Duration,

    /// Extra delay after the debounce TTL before the commit job runs
    pub commit_delay_slack: Duration,

    /// How long a commit waits for the commit mutex before deferring
    pub commit_lock_timeout: Duration,

    /// Lease length of the commit mutex
    pub commit_lock_ttl: Duration,

    /// Actor name used for automated content writes
    pub system_actor: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_update_len: 4,
            max_attempts: 8,
            retry_backoff: Duration::from_millis(10),
            max_retry_backoff: Duration::from_millis(500),
            commit_debounce: Duration::from_secs(10),
            commit_delay_slack: Duration::from_secs(1),
            commit_lock_timeout: Duration::from_secs(30),
            commit_lock_ttl: Duration::from_secs(60),
            system_actor: "system".to_string(),
        }
    }
}

impl SyncConfig {
    /// Backoff to sleep after the `attempt`-th conflict (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1 << shift)
            .min(self.max_retry_backoff)
    }

    /// Delay before a scheduled commit job runs.
    #[must_use]
    pub fn commit_delay(&self) -> Duration {
        self.commit_debounce + self.commit_delay_slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(10));
        assert_eq!(config.backoff_for(2), Duration::from_millis(20));
        assert_eq!(config.backoff_for(4), Duration::from_millis(80));
        assert_eq!(config.backoff_for(30), Duration::from_millis(500));
    }

    #[test]
    fn commit_runs_after_debounce_expires() {
        let config = SyncConfig::default();
        assert!(config.commit_delay() > config.commit_debounce);
    }
}
