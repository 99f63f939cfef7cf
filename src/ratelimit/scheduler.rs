//! Background task lifecycle for limiter timers.
//!
//! Every replenish or drain loop a limiter runs is spawned through a
//! [`TaskGroup`]. The group owns the shutdown signal and the join handles,
//! so [`TaskGroup::stop`] can signal every loop and wait for all of them.

use futures::future::join_all;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{LimiterError, Result};

struct Tasks {
    handles: Vec<(String, JoinHandle<()>)>,
    stopped: bool,
}

/// A set of periodic background tasks sharing one stop signal.
pub struct TaskGroup {
    /// Name used in log output
    name: &'static str,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            shutdown,
            tasks: Mutex::new(Tasks {
                handles: Vec::new(),
                stopped: false,
            }),
        }
    }

    /// Spawn a task that calls `tick` every `period` until the group stops.
    ///
    /// The first tick fires one full period after the task starts. Ticks
    /// never overlap; a late tick delays the following ones instead of
    /// bursting to catch up.
    pub fn spawn_periodic<F>(&self, task: impl Into<String>, period: Duration, mut tick: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let task = task.into();
        let runtime = Handle::try_current().map_err(|e| {
            LimiterError::Internal(format!("cannot start background task {task}: {e}"))
        })?;

        let mut tasks = self.tasks.lock();
        if tasks.stopped {
            return Err(LimiterError::Stopped);
        }

        let mut shutdown = self.shutdown.subscribe();
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    // Err means the group was dropped without stop()
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => tick(),
                }
            }
        });

        debug!(group = self.name, task = %task, "Background task started");
        tasks.handles.push((task, handle));
        Ok(())
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.tasks.lock().stopped
    }

    /// Number of tasks started and not yet stopped.
    pub fn len(&self) -> usize {
        self.tasks.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every task to exit and wait until all of them have.
    ///
    /// A second call returns immediately. If a task panicked, the first
    /// failure is returned after all tasks have been joined.
    pub async fn stop(&self) -> Result<()> {
        let handles = {
            let mut tasks = self.tasks.lock();
            if tasks.stopped {
                return Ok(());
            }
            tasks.stopped = true;
            std::mem::take(&mut tasks.handles)
        };

        self.shutdown.send_replace(true);

        let count = handles.len();
        let results = join_all(
            handles
                .into_iter()
                .map(|(task, handle)| async move { (task, handle.await) }),
        )
        .await;

        let mut failure = None;
        for (task, result) in results {
            if let Err(e) = result {
                error!(group = self.name, task = %task, error = %e, "Background task failed");
                failure.get_or_insert(LimiterError::TaskFailed {
                    task,
                    reason: e.to_string(),
                });
            }
        }

        info!(group = self.name, tasks = count, "Background tasks stopped");
        failure.map_or(Ok(()), Err)
    }
}
