//! Weighted token bucket limiter.

use std::time::Duration;
use tracing::{debug, trace};

use super::counter::TokenBuckets;
use super::key::BucketKey;
use super::outcome::{Admission, Release};
use crate::error::Result;

/// Token bucket where each admission is charged `weight * weight_multiplier`.
///
/// Admission itself only requires that the key has any tokens left, so a
/// single heavy request may be admitted with one token remaining and drive
/// the counter negative. The key is then rejected until the next replenish.
pub struct WeightedTokenBucket {
    buckets: TokenBuckets,
    weight_multiplier: i64,
}

impl WeightedTokenBucket {
    /// Create the limiter and start its replenish task.
    pub fn new(max_tokens: i64, weight_multiplier: i64, replenish_interval: Duration) -> Result<Self> {
        Ok(Self {
            buckets: TokenBuckets::start("weighted_token_bucket", max_tokens, replenish_interval)?,
            weight_multiplier,
        })
    }

    /// Admit one request of the given weight for `key`. Never waits.
    pub fn admit(&self, key: &BucketKey, weight: u32) -> Admission {
        let cost = i64::from(weight).saturating_mul(self.weight_multiplier);

        match self.buckets.consume(key, cost) {
            Ok(remaining) => {
                trace!(key = %key, cost = cost, remaining = remaining, "Request allowed");
                Admission::Allowed(Release::ready())
            }
            Err(remaining) => {
                debug!(key = %key, cost = cost, remaining = remaining, "Rate limit exceeded");
                Admission::Rejected {
                    retry_after: Some(self.buckets.replenish_interval()),
                }
            }
        }
    }

    /// Current tokens for `key`, if the key has been seen.
    pub fn remaining(&self, key: &str) -> Option<i64> {
        self.buckets.remaining(key)
    }

    pub fn key_count(&self) -> usize {
        self.buckets.key_count()
    }

    pub fn weight_multiplier(&self) -> i64 {
        self.weight_multiplier
    }

    pub fn replenish_interval(&self) -> Duration {
        self.buckets.replenish_interval()
    }

    pub async fn stop(&self) -> Result<()> {
        self.buckets.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heavy_request_drives_counter_negative() {
        let limiter = WeightedTokenBucket::new(4, 1, Duration::from_secs(1)).unwrap();
        let key = BucketKey::new("app");

        assert!(limiter.admit(&key, 10).is_allowed());
        assert_eq!(limiter.remaining("app"), Some(-6));

        for _ in 0..5 {
            assert!(limiter.admit(&key, 1).is_rejected());
        }
        assert_eq!(limiter.remaining("app"), Some(-6));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(limiter.remaining("app"), Some(4));
        assert!(limiter.admit(&key, 1).is_allowed());

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_admitted_with_single_token_left() {
        let limiter = WeightedTokenBucket::new(4, 1, Duration::from_secs(60)).unwrap();
        let key = BucketKey::new("app");

        assert!(limiter.admit(&key, 3).is_allowed());
        assert_eq!(limiter.remaining("app"), Some(1));

        // Gate only checks that a token remains, not that the cost fits
        assert!(limiter.admit(&key, 5).is_allowed());
        assert_eq!(limiter.remaining("app"), Some(-4));

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_multiplier_scales_cost() {
        let limiter = WeightedTokenBucket::new(10, 3, Duration::from_secs(60)).unwrap();
        let key = BucketKey::new("app");

        assert!(limiter.admit(&key, 2).is_allowed());
        assert_eq!(limiter.remaining("app"), Some(4));
        assert_eq!(limiter.weight_multiplier(), 3);

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_weight_is_free() {
        let limiter = WeightedTokenBucket::new(1, 1, Duration::from_secs(60)).unwrap();
        let key = BucketKey::new("app");

        for _ in 0..3 {
            assert!(limiter.admit(&key, 0).is_allowed());
        }
        assert_eq!(limiter.remaining("app"), Some(1));

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_carries_replenish_hint() {
        let limiter = WeightedTokenBucket::new(1, 1, Duration::from_millis(750)).unwrap();
        let key = BucketKey::new("app");

        limiter.admit(&key, 1);
        assert_eq!(
            limiter.admit(&key, 1).retry_hint(),
            Some(Duration::from_millis(750))
        );

        limiter.stop().await.unwrap();
    }
}
