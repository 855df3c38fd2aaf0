//! One-shot protocol timers.
//!
//! A [`Timer`] is plain state owned by an event loop: an optional deadline.
//! The loop polls [`Timer::fired`] in its `select!` and disarms or re-arms
//! the timer in the branch handler, so there is never a task to cancel.
//!
//! ```ignore
//! tokio::select! {
//!     _ = self.t_progress.fired() => {
//!         self.t_progress.disarm();
//!         self.event_change_leader();
//!     }
//!     ...
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// An optional deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// A disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `after` from now, replacing any earlier deadline.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Never fire.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is set.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The current deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes at the deadline; pending forever while disarmed.
    ///
    /// The returned future does not borrow the timer, so it can sit in a
    /// `select!` next to branches that borrow the owning state mutably.
    pub fn fired(&self) -> impl Future<Output = ()> + Send + 'static {
        sleep_until_opt(self.deadline)
    }
}

/// Sleep until `deadline`, or forever if there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
