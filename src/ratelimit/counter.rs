//! Token counters and the replenish loop shared by the token bucket variants.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};

use super::key::BucketKey;
use super::registry::Registry;
use super::scheduler::TaskGroup;
use crate::error::Result;

/// Per-key token counter.
///
/// This counter is designed to be thread-safe and uses atomic operations
/// for lock-free updates. `remaining` is reset to `max` on every replenish
/// and may go negative between replenishes when admissions cost more than
/// one token.
#[derive(Debug)]
pub struct TokenState {
    remaining: AtomicI64,
    max: i64,
}

impl TokenState {
    /// Create a full counter.
    pub fn new(max: i64) -> Self {
        Self {
            remaining: AtomicI64::new(max),
            max,
        }
    }

    /// Charge `cost` tokens if any tokens remain.
    ///
    /// The gate only looks at whether the counter is positive; the charge is
    /// applied in full once the gate passes. Returns the new remaining count
    /// on success, or the unchanged count on rejection.
    pub fn try_consume(&self, cost: i64) -> std::result::Result<i64, i64> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > 0).then(|| current.saturating_sub(cost))
            })
            .map(|previous| previous.saturating_sub(cost))
    }

    /// Overwrite the counter with the maximum.
    pub fn replenish(&self) {
        self.remaining.store(self.max, Ordering::SeqCst);
    }

    /// Get the remaining tokens.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Get the maximum for this counter.
    pub fn max(&self) -> i64 {
        self.max
    }
}

/// Registry of token counters plus the single task that replenishes them.
pub struct TokenBuckets {
    counters: Arc<Registry<TokenState>>,
    max_tokens: i64,
    replenish_interval: Duration,
    tasks: TaskGroup,
}

impl TokenBuckets {
    /// Create the registry and start its replenish task.
    ///
    /// Requires a running tokio runtime.
    pub fn start(name: &'static str, max_tokens: i64, replenish_interval: Duration) -> Result<Self> {
        let counters = Arc::new(Registry::new());
        let tasks = TaskGroup::new(name);

        let shared = Arc::clone(&counters);
        tasks.spawn_periodic("replenish", replenish_interval, move || {
            replenish_all(&shared);
        })?;

        info!(
            limiter = name,
            max_tokens = max_tokens,
            replenish_interval = ?replenish_interval,
            "Token limiter started"
        );

        Ok(Self {
            counters,
            max_tokens,
            replenish_interval,
            tasks,
        })
    }

    /// Charge `cost` tokens against `key`, creating a full counter on first use.
    pub fn consume(&self, key: &BucketKey, cost: i64) -> std::result::Result<i64, i64> {
        let max_tokens = self.max_tokens;
        self.counters
            .get_or_create(key, || TokenState::new(max_tokens))
            .try_consume(cost)
    }

    /// Reset every known key to the maximum.
    pub fn replenish(&self) {
        replenish_all(&self.counters);
    }

    /// Current tokens for `key`, if the key has been seen.
    pub fn remaining(&self, key: &str) -> Option<i64> {
        self.counters.get(key).map(|c| c.remaining())
    }

    pub fn key_count(&self) -> usize {
        self.counters.len()
    }

    pub fn replenish_interval(&self) -> Duration {
        self.replenish_interval
    }

    /// Stop the replenish task and wait for it to exit.
    pub async fn stop(&self) -> Result<()> {
        self.tasks.stop().await
    }
}

fn replenish_all(counters: &Registry<TokenState>) {
    counters.for_each(|_, counter| counter.replenish());
    trace!(keys = counters.len(), "Tokens replenished");
}
