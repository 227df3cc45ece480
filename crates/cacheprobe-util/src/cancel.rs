//! Cooperative cancellation and deadlines for a single reconciliation pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::UtilError;

/// A cancellation token shared by every blocking step of a pass.
///
/// Clones share the same flag, so a caller can hand one clone to the pass and
/// keep another to cancel it. An optional deadline turns into
/// [`UtilError::DeadlineExceeded`] once it has passed.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl Cancellation {
    /// A token that is never cancelled unless [`Cancellation::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some((Instant::now() + timeout, timeout)),
        }
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    /// Return an error if the pass must stop now.
    ///
    /// # Errors
    /// Returns [`UtilError::Cancelled`] after [`Cancellation::cancel`], or
    /// [`UtilError::DeadlineExceeded`] once the deadline has passed.
    pub fn check(&self) -> Result<(), UtilError> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(UtilError::Cancelled);
        }
        if let Some((at, timeout)) = self.deadline {
            if Instant::now() >= at {
                return Err(UtilError::DeadlineExceeded { timeout });
            }
        }
        Ok(())
    }
}
