//! Per-connector outbound rate limiting, distinct from the Scheduler's
//! per-org admission gate: this throttles how fast one connector dials a
//! single upstream provider, independent of which organization's
//! execution triggered the call.
//!
//! Grounded on the teacher's `RateLimiter` wrapper in
//! `knhk-workflow-engine/book/src/resilience/rate_limit.rs` (a thin
//! `governor::RateLimiter` facade with a polling `wait`).

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};

/// Outbound request ceiling for one connector's upstream calls.
pub struct ConnectorRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    poll_interval: Duration,
}

impl ConnectorRateLimiter {
    /// `requests_per_second` must be nonzero; callers size it from the
    /// provider's documented rate limit (falls back to a conservative
    /// default when a provider doesn't document one).
    pub fn new(requests_per_second: u32) -> Option<Self> {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second)?);
        Some(Self { limiter: GovernorRateLimiter::direct(quota), poll_interval: Duration::from_millis(50) })
    }

    /// Non-blocking check: `true` if a call may proceed now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Blocks until the next call is allowed under the configured rate.
    pub async fn acquire(&self) {
        loop {
            if self.limiter.check().is_ok() {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_within_quota_is_immediate() {
        let limiter = ConnectorRateLimiter::new(5).unwrap();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn exhausted_quota_rejects_further_immediate_calls() {
        let limiter = ConnectorRateLimiter::new(1).unwrap();
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn zero_requests_per_second_is_rejected_at_construction() {
        assert!(ConnectorRateLimiter::new(0).is_none());
    }

    #[tokio::test]
    async fn acquire_eventually_resolves_after_quota_refills() {
        let limiter = ConnectorRateLimiter::new(1).unwrap();
        assert!(limiter.try_acquire());
        tokio::time::timeout(Duration::from_secs(3), limiter.acquire())
            .await
            .expect("acquire should resolve once the quota refills");
    }
}
