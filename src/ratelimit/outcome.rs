//! Admission outcomes.

use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{LimiterError, Result};

/// The result of offering one unit of work to a limiter.
#[derive(Debug)]
pub enum Admission {
    /// The work may proceed once the release signal fires.
    Allowed(Release),
    /// Over limit. `retry_after` hints when a retry might succeed.
    Rejected { retry_after: Option<Duration> },
    /// The caller's cancellation fired while it was waiting for capacity.
    Cancelled,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Admission::Cancelled)
    }

    /// Retry hint for a rejected caller. Cancelled callers never get one.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Admission::Rejected { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Second phase of an admission.
///
/// Token bucket admissions are released immediately. A leaky bucket
/// admission is released when the drain tick removes the caller's slot from
/// the queue.
#[derive(Debug)]
pub struct Release {
    signal: Option<oneshot::Receiver<()>>,
}

impl Release {
    pub(crate) fn ready() -> Self {
        Self { signal: None }
    }

    pub(crate) fn pending(signal: oneshot::Receiver<()>) -> Self {
        Self {
            signal: Some(signal),
        }
    }

    /// Whether the release has already happened, without waiting.
    pub fn is_released(&mut self) -> bool {
        let released = match self.signal.as_mut() {
            None => return true,
            Some(signal) => signal.try_recv().is_ok(),
        };
        if released {
            self.signal = None;
        }
        released
    }

    /// Wait for the release.
    ///
    /// Fails with [`LimiterError::Stopped`] if the limiter was stopped before
    /// the slot drained.
    pub async fn wait(self) -> Result<()> {
        match self.signal {
            None => Ok(()),
            Some(signal) => signal.await.map_err(|_| LimiterError::Stopped),
        }
    }
}
