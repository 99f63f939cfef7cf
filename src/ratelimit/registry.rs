//! Lazily populated per-key state shared by all limiters.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::key::BucketKey;

/// A key to state mapping, populated on first use.
///
/// Lookups of existing keys take a shared lock on a single shard, so readers
/// of different keys do not contend. Creation goes through the shard's
/// exclusive entry lock: callers racing on the same unseen key observe
/// exactly one initialization.
pub struct Registry<S> {
    entries: DashMap<BucketKey, Arc<S>>,
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get the state for `key`, creating it with `init` if absent.
    pub fn get_or_create<F>(&self, key: &BucketKey, init: F) -> Arc<S>
    where
        F: FnOnce() -> S,
    {
        match self.get_or_try_create(key, || Ok::<_, std::convert::Infallible>(Arc::new(init()))) {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }

    /// Get the state for `key`, creating it with a fallible `init` if absent.
    ///
    /// `init` runs at most once per key and while the entry is exclusively
    /// held; if it fails nothing is inserted. It returns the shared handle
    /// so that it can hand clones to work started alongside the state.
    pub fn get_or_try_create<F, E>(&self, key: &BucketKey, init: F) -> Result<Arc<S>, E>
    where
        F: FnOnce() -> Result<Arc<S>, E>,
    {
        if let Some(existing) = self.entries.get(key.as_str()) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let state = init()?;
                debug!(key = %key, "Creating bucket state");
                entry.insert(Arc::clone(&state));
                Ok(state)
            }
        }
    }

    /// Get the state for `key` without creating it.
    pub fn get(&self, key: &str) -> Option<Arc<S>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Visit every entry. Per-key visits happen in no particular order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&BucketKey, &S),
    {
        for entry in self.entries.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Number of keys that have been seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}
