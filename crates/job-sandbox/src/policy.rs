//! Expiry policy for job workspaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decides when an idle job workspace may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryPolicy {
    /// Idle time after which a job is eligible for deletion
    ttl: Duration,
    /// Whether sweeping is enabled at all
    enabled: bool,
}

impl ExpiryPolicy {
    /// Expire jobs that have been idle for longer than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, enabled: true }
    }

    /// Never expire anything.
    pub fn disabled() -> Self {
        Self {
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Sweep cadence scaled to the TTL, so expiry drift stays small relative to it.
    ///
    /// - ttl <= 1 hour: every minute
    /// - ttl <= 1 day: every 5 minutes
    /// - ttl <= 7 days: every hour
    /// - ttl <= 30 days: every 4 hours
    /// - longer: every 12 hours
    pub fn recommended_sweep_interval(&self) -> Duration {
        match self.ttl.as_secs() {
            0..=3600 => Duration::from_secs(60),
            3601..=86400 => Duration::from_secs(300),
            86401..=604800 => Duration::from_secs(3600),
            604801..=2592000 => Duration::from_secs(14400),
            _ => Duration::from_secs(43200),
        }
    }

    /// Whether a job last touched at `last_access` is expired right now.
    pub fn is_expired(&self, last_access: DateTime<Utc>) -> bool {
        self.is_expired_at(last_access, Utc::now())
    }

    /// Whether a job last touched at `last_access` is expired at `now`.
    pub fn is_expired_at(&self, last_access: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return false;
        };
        now - last_access > ttl
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_expiry_against_ttl() {
        let policy = ExpiryPolicy::new(Duration::from_secs(60 * 60));
        let now = Utc::now();

        assert!(policy.is_expired_at(now - ChronoDuration::hours(2), now));
        assert!(!policy.is_expired_at(now - ChronoDuration::minutes(30), now));
        // Exactly at the TTL is still alive
        assert!(!policy.is_expired_at(now - ChronoDuration::hours(1), now));
    }

    #[test]
    fn test_zero_ttl_expires_anything_older_than_now() {
        let policy = ExpiryPolicy::new(Duration::ZERO);
        let now = Utc::now();
        assert!(policy.is_expired_at(now - ChronoDuration::milliseconds(1), now));
    }

    #[test]
    fn test_disabled_never_expires() {
        let policy = ExpiryPolicy::disabled();
        let ancient = Utc::now() - ChronoDuration::days(365);
        assert!(!policy.is_expired(ancient));
    }

    #[test]
    fn test_recommended_sweep_interval() {
        assert_eq!(
            ExpiryPolicy::new(Duration::from_secs(3600)).recommended_sweep_interval(),
            Duration::from_secs(60)
        );
        assert_eq!(
            ExpiryPolicy::new(Duration::from_secs(6 * 3600)).recommended_sweep_interval(),
            Duration::from_secs(300)
        );
        assert_eq!(
            ExpiryPolicy::new(Duration::from_secs(90 * 86400)).recommended_sweep_interval(),
            Duration::from_secs(43200)
        );
    }
}
