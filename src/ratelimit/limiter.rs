//! Uniform admission interface over the three limiter algorithms.

use std::future::Future;
use std::time::Duration;
use tracing::info;

use super::key::BucketKey;
use super::leaky::LeakyBucket;
use super::outcome::Admission;
use super::token::TokenBucket;
use super::weighted::WeightedTokenBucket;
use crate::config::{Algorithm, LimiterSettings};
use crate::error::Result;

/// Weight applied when a caller does not supply one.
pub const DEFAULT_WEIGHT: u32 = 1;

/// The configured limiter.
///
/// The algorithm is chosen once, at construction. Callers use
/// [`admit`](Self::admit) and [`stop`](Self::stop) without caring which
/// variant is behind them.
pub enum RateLimiter {
    Token(TokenBucket),
    Weighted(WeightedTokenBucket),
    Leaky(LeakyBucket),
}

impl RateLimiter {
    /// Build the limiter named by `settings.algorithm`.
    ///
    /// Token variants start their replenish task here, so this must run
    /// inside a tokio runtime.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self> {
        let limiter = match settings.algorithm {
            Algorithm::TokenBucket => RateLimiter::Token(TokenBucket::new(
                settings.max_tokens,
                settings.replenish_interval,
            )?),
            Algorithm::WeightedTokenBucket => RateLimiter::Weighted(WeightedTokenBucket::new(
                settings.max_tokens,
                settings.weight_multiplier,
                settings.replenish_interval,
            )?),
            Algorithm::LeakyBucket => RateLimiter::Leaky(LeakyBucket::new(
                settings.queue_capacity,
                settings.leak_interval,
            )),
        };

        info!(algorithm = %limiter.algorithm(), "Rate limiter initialized");
        Ok(limiter)
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            RateLimiter::Token(_) => Algorithm::TokenBucket,
            RateLimiter::Weighted(_) => Algorithm::WeightedTokenBucket,
            RateLimiter::Leaky(_) => Algorithm::LeakyBucket,
        }
    }

    /// Offer one unit of work for `key`.
    ///
    /// `weight` is only used by the weighted token bucket and defaults to
    /// [`DEFAULT_WEIGHT`]. `cancel` is only awaited by the leaky bucket,
    /// which may wait for queue capacity; the token variants answer
    /// immediately.
    pub async fn admit<C>(&self, key: &BucketKey, weight: Option<u32>, cancel: C) -> Result<Admission>
    where
        C: Future<Output = ()>,
    {
        match self {
            RateLimiter::Token(limiter) => Ok(limiter.admit(key)),
            RateLimiter::Weighted(limiter) => {
                Ok(limiter.admit(key, weight.unwrap_or(DEFAULT_WEIGHT)))
            }
            RateLimiter::Leaky(limiter) => limiter.admit(key, cancel).await,
        }
    }

    /// How long a rejected caller should wait before retrying.
    ///
    /// Exact for the token variants, which reset on a fixed interval. The
    /// leaky bucket has no fixed answer: when capacity frees up depends on
    /// queue depth, so no hint is given.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            RateLimiter::Token(limiter) => Some(limiter.replenish_interval()),
            RateLimiter::Weighted(limiter) => Some(limiter.replenish_interval()),
            RateLimiter::Leaky(_) => None,
        }
    }

    /// Get the number of keys seen so far.
    pub fn key_count(&self) -> usize {
        match self {
            RateLimiter::Token(limiter) => limiter.key_count(),
            RateLimiter::Weighted(limiter) => limiter.key_count(),
            RateLimiter::Leaky(limiter) => limiter.key_count(),
        }
    }

    /// Remaining tokens for `key` on token variants.
    pub fn remaining(&self, key: &str) -> Option<i64> {
        match self {
            RateLimiter::Token(limiter) => limiter.remaining(key),
            RateLimiter::Weighted(limiter) => limiter.remaining(key),
            RateLimiter::Leaky(_) => None,
        }
    }

    /// Occupied queue slots for `key` on the leaky bucket.
    pub fn queue_len(&self, key: &str) -> Option<usize> {
        match self {
            RateLimiter::Leaky(limiter) => limiter.queue_len(key),
            _ => None,
        }
    }

    /// Stop every background task and wait for them to exit.
    pub async fn stop(&self) -> Result<()> {
        let result = match self {
            RateLimiter::Token(limiter) => limiter.stop().await,
            RateLimiter::Weighted(limiter) => limiter.stop().await,
            RateLimiter::Leaky(limiter) => limiter.stop().await,
        };
        info!(algorithm = %self.algorithm(), "Rate limiter stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use std::future::pending;

    fn settings(algorithm: Algorithm) -> LimiterSettings {
        LimiterConfig {
            algorithm,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_settings_selects_algorithm() {
        for algorithm in [
            Algorithm::TokenBucket,
            Algorithm::WeightedTokenBucket,
            Algorithm::LeakyBucket,
        ] {
            let limiter = RateLimiter::from_settings(&settings(algorithm)).unwrap();
            assert_eq!(limiter.algorithm(), algorithm);
            assert_eq!(limiter.key_count(), 0);
            limiter.stop().await.unwrap();
        }
    }

    #[test]
    fn test_token_limiter_requires_runtime() {
        let result = RateLimiter::from_settings(&settings(Algorithm::TokenBucket));
        assert!(matches!(result, Err(crate::error::LimiterError::Internal(_))));
    }

    #[tokio::test]
    async fn test_token_adapter_rejects_with_hint() {
        let limiter = RateLimiter::from_settings(&settings(Algorithm::TokenBucket)).unwrap();
        let key = BucketKey::new("app");

        for _ in 0..4 {
            let admission = limiter.admit(&key, None, pending()).await.unwrap();
            assert!(admission.is_allowed());
        }

        let admission = limiter.admit(&key, None, pending()).await.unwrap();
        assert!(admission.is_rejected());
        assert_eq!(admission.retry_hint(), Some(Duration::from_secs(1)));
        assert_eq!(limiter.retry_hint(), Some(Duration::from_secs(1)));
        assert_eq!(limiter.remaining("app"), Some(0));

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_weighted_adapter_applies_weight() {
        let limiter =
            RateLimiter::from_settings(&settings(Algorithm::WeightedTokenBucket)).unwrap();
        let key = BucketKey::new("app");

        limiter.admit(&key, Some(10), pending()).await.unwrap();
        assert_eq!(limiter.remaining("app"), Some(-6));
        assert!(limiter.admit(&key, None, pending()).await.unwrap().is_rejected());

        limiter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_weighted_adapter_defaults_weight() {
        let limiter =
            RateLimiter::from_settings(&settings(Algorithm::WeightedTokenBucket)).unwrap();
        let key = BucketKey::new("app");

        limiter.admit(&key, None, pending()).await.unwrap();
        assert_eq!(limiter.remaining("app"), Some(4 - i64::from(DEFAULT_WEIGHT)));

        limiter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaky_adapter_cancels_without_hint() {
        let limiter = RateLimiter::from_settings(&settings(Algorithm::LeakyBucket)).unwrap();
        let key = BucketKey::new("app");

        for _ in 0..4 {
            assert!(limiter.admit(&key, None, pending()).await.unwrap().is_allowed());
        }

        let admission = limiter
            .admit(&key, None, tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(admission.is_cancelled());
        assert_eq!(admission.retry_hint(), None);
        assert_eq!(limiter.retry_hint(), None);
        assert_eq!(limiter.queue_len("app"), Some(4));
        assert_eq!(limiter.remaining("app"), None);

        limiter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_all_state_changes() {
        let limiter = RateLimiter::from_settings(&settings(Algorithm::LeakyBucket)).unwrap();
        let key = BucketKey::new("app");

        limiter.admit(&key, None, pending()).await.unwrap();
        limiter.admit(&key, None, pending()).await.unwrap();
        limiter.stop().await.unwrap();

        let before = limiter.queue_len("app");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.queue_len("app"), before);
    }
}
