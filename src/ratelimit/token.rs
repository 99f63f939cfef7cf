//! Token bucket limiter.

use std::time::Duration;
use tracing::{debug, trace};

use super::counter::TokenBuckets;
use super::key::BucketKey;
use super::outcome::{Admission, Release};
use crate::error::Result;

/// Each admission costs exactly one token; every key is reset to
/// `max_tokens` once per replenish interval.
pub struct TokenBucket {
    buckets: TokenBuckets,
}

impl TokenBucket {
    /// Create the limiter and start its replenish task.
    pub fn new(max_tokens: i64, replenish_interval: Duration) -> Result<Self> {
        Ok(Self {
            buckets: TokenBuckets::start("token_bucket", max_tokens, replenish_interval)?,
        })
    }

    /// Admit one request for `key`. Never waits.
    pub fn admit(&self, key: &BucketKey) -> Admission {
        match self.buckets.consume(key, 1) {
            Ok(remaining) => {
                trace!(key = %key, remaining = remaining, "Request allowed");
                Admission::Allowed(Release::ready())
            }
            Err(remaining) => {
                debug!(key = %key, remaining = remaining, "Rate limit exceeded");
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
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_allows_max_then_rejects_until_replenish() {
        let limiter = TokenBucket::new(4, Duration::from_secs(1)).unwrap();
        let key = BucketKey::new("app");

        for i in 1..=4 {
            assert!(limiter.admit(&key).is_allowed(), "Request {} should be allowed", i);
        }

        let rejected = limiter.admit(&key);
        assert!(rejected.is_rejected());
        assert_eq!(rejected.retry_hint(), Some(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(1050)).await;

        for i in 1..=4 {
            assert!(limiter.admit(&key).is_allowed(), "Request {} after replenish", i);
        }
        assert!(limiter.admit(&key).is_rejected());

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_does_not_mutate() {
        let limiter = TokenBucket::new(1, Duration::from_secs(60)).unwrap();
        let key = BucketKey::new("app");

        assert!(limiter.admit(&key).is_allowed());
        for _ in 0..10 {
            assert!(limiter.admit(&key).is_rejected());
        }
        assert_eq!(limiter.remaining("app"), Some(0));

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = TokenBucket::new(1, Duration::from_secs(60)).unwrap();

        assert!(limiter.admit(&BucketKey::new("a")).is_allowed());
        assert!(limiter.admit(&BucketKey::new("a")).is_rejected());
        assert!(limiter.admit(&BucketKey::new("b")).is_allowed());
        assert_eq!(limiter.key_count(), 2);

        limiter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_stops_cleanly() {
        let limiter = TokenBucket::new(4, Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        limiter.stop().await.unwrap();
        assert_eq!(limiter.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_replenish_after_stop() {
        let limiter = TokenBucket::new(2, Duration::from_millis(100)).unwrap();
        let key = BucketKey::new("app");

        limiter.stop().await.unwrap();

        assert!(limiter.admit(&key).is_allowed());
        assert!(limiter.admit(&key).is_allowed());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(limiter.remaining("app"), Some(0));
        assert!(limiter.admit(&key).is_rejected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_use_never_over_admits() {
        let limiter = Arc::new(TokenBucket::new(50, Duration::from_secs(60)).unwrap());
        let key = BucketKey::new("contended");

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let key = key.clone();
                tokio::spawn(async move { limiter.admit(&key).is_allowed() })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 50);
        assert_eq!(limiter.key_count(), 1);
        assert_eq!(limiter.remaining("contended"), Some(0));

        limiter.stop().await.unwrap();
    }
}
