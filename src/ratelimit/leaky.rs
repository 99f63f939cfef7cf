//! Leaky bucket limiter.
//!
//! Each key owns a bounded FIFO queue that a dedicated background task drains
//! by one slot per leak interval. Admission is two-phase: a caller first gets
//! a slot in the queue (waiting for capacity if the queue is full), then its
//! [`Release`] fires when the drain task removes that slot.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, trace};

use super::key::BucketKey;
use super::outcome::{Admission, Release};
use super::registry::Registry;
use super::scheduler::TaskGroup;
use crate::error::{LimiterError, Result};

/// How often a caller waiting on a full queue retries, in addition to being
/// woken by each drain.
const ENQUEUE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Slots {
    pending: VecDeque<oneshot::Sender<()>>,
    /// Set once by `close`; no slot is handed out afterwards
    closed: bool,
}

/// A bounded queue of release signals for one key.
#[derive(Debug)]
struct LeakyQueue {
    slots: Mutex<Slots>,
    capacity: usize,
    drained: Notify,
}

impl LeakyQueue {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                pending: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            drained: Notify::new(),
        }
    }

    /// Take a slot if the queue has room, returning its release and the new length.
    ///
    /// Fails with [`LimiterError::Stopped`] once the queue has been closed.
    fn try_enqueue(&self) -> Result<Option<(Release, usize)>> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(LimiterError::Stopped);
        }
        if slots.pending.len() >= self.capacity {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        slots.pending.push_back(tx);
        Ok(Some((Release::pending(rx), slots.pending.len())))
    }

    /// Remove the oldest slot and release its owner.
    fn drain_one(&self) -> bool {
        let Some(slot) = self.slots.lock().pending.pop_front() else {
            return false;
        };
        // The owner may have stopped listening; the slot is freed either way
        let _ = slot.send(());
        self.drained.notify_one();
        true
    }

    /// Drop every slot so pending releases resolve as stopped, and refuse
    /// any further enqueue.
    fn close(&self) {
        {
            let mut slots = self.slots.lock();
            slots.closed = true;
            slots.pending.clear();
        }
        self.drained.notify_waiters();
    }

    fn len(&self) -> usize {
        self.slots.lock().pending.len()
    }
}

/// Leaky bucket limiter with one queue and one drain task per key.
pub struct LeakyBucket {
    queues: Registry<LeakyQueue>,
    queue_capacity: usize,
    leak_interval: Duration,
    tasks: TaskGroup,
}

impl LeakyBucket {
    /// Create the limiter. Drain tasks are started lazily, per key.
    pub fn new(queue_capacity: usize, leak_interval: Duration) -> Self {
        info!(
            queue_capacity = queue_capacity,
            leak_interval = ?leak_interval,
            "Leaky bucket limiter created"
        );
        Self {
            queues: Registry::new(),
            queue_capacity,
            leak_interval,
            tasks: TaskGroup::new("leaky_bucket"),
        }
    }

    /// Get the queue for `key`, creating it and starting its drain task on first use.
    fn queue_for(&self, key: &BucketKey) -> Result<Arc<LeakyQueue>> {
        if self.tasks.is_stopped() {
            return Err(LimiterError::Stopped);
        }

        self.queues.get_or_try_create(key, || {
            let queue = Arc::new(LeakyQueue::new(self.queue_capacity));
            let drained = Arc::clone(&queue);
            self.tasks
                .spawn_periodic(format!("drain:{key}"), self.leak_interval, move || {
                    drained.drain_one();
                })?;
            Ok(queue)
        })
    }

    /// Admit one request for `key`.
    ///
    /// If the queue has room the caller is admitted at once. Otherwise the
    /// call waits for a drain to free a slot, or for `cancel` to resolve.
    /// When a slot frees up at the same moment `cancel` fires, the slot wins;
    /// `Cancelled` is only reported when cancellation came first, and a
    /// cancelled caller never holds a slot.
    pub async fn admit<C>(&self, key: &BucketKey, cancel: C) -> Result<Admission>
    where
        C: Future<Output = ()>,
    {
        let queue = self.queue_for(key)?;

        if let Some((release, len)) = queue.try_enqueue()? {
            trace!(key = %key, queue_len = len, "Request allowed");
            return Ok(Admission::Allowed(release));
        }

        debug!(key = %key, queue_len = queue.len(), "Queue full, waiting for capacity");
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;
                _ = queue.drained.notified() => {}
                _ = tokio::time::sleep(ENQUEUE_RETRY_INTERVAL) => {}
                _ = &mut cancel => {
                    debug!(key = %key, "Admission cancelled while waiting for capacity");
                    return Ok(Admission::Cancelled);
                }
            }

            if self.tasks.is_stopped() {
                return Err(LimiterError::Stopped);
            }

            if let Some((release, len)) = queue.try_enqueue()? {
                trace!(key = %key, queue_len = len, "Request allowed after waiting");
                return Ok(Admission::Allowed(release));
            }
        }
    }

    /// Number of occupied slots for `key`, if the key has been seen.
    pub fn queue_len(&self, key: &str) -> Option<usize> {
        self.queues.get(key).map(|q| q.len())
    }

    pub fn key_count(&self) -> usize {
        self.queues.len()
    }

    /// Number of running drain tasks.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every drain task and wait for them to exit.
    ///
    /// Callers still holding a queued slot see their release fail with
    /// [`LimiterError::Stopped`]; callers waiting for capacity get the same
    /// error from `admit`.
    pub async fn stop(&self) -> Result<()> {
        let result = self.tasks.stop().await;
        self.queues.for_each(|_, queue| queue.close());
        result
    }
}
