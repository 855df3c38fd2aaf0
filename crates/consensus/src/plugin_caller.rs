//! Instrumented calls into application code.
//!
//! Every call into the reporting plugin or the contract transmitter goes
//! through [`call_plugin`]. A watchdog logs an error once the call runs
//! `max_duration + grace` without finishing. With [`Deadline::Hard`] the call
//! is also aborted at `max_duration`.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Span};

/// Grace period before the watchdog complains about a plugin call.
pub const PLUGIN_WATCHDOG_GRACE: Duration = Duration::from_millis(100);

/// Grace period before the watchdog complains about a transmit call.
pub const TRANSMITTER_WATCHDOG_GRACE: Duration = Duration::from_millis(50);

/// How `max_duration` is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Only log when the call overruns
    Soft,
    /// Abort the call at `max_duration`
    Hard,
}

/// Logs an error unless stopped before `after` elapses.
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Arm a watchdog for the call `name`.
    pub fn start(name: &'static str, max_duration: Duration, after: Duration) -> Self {
        let handle = tokio::spawn(
            async move {
                tokio::time::sleep(after).await;
                error!(
                    call = name,
                    max_duration_ms = max_duration.as_millis() as u64,
                    "Call to {} is taking too long",
                    name
                );
            }
            .instrument(Span::current()),
        );
        Self { handle }
    }

    /// Disarm the watchdog.
    pub fn stop(self) {}
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run `fut` under a watchdog.
///
/// Returns `None` when the call errors, times out or is cancelled. Errors and
/// timeouts are logged; cancellation through `cancel` is not.
pub async fn call_plugin<T, F>(
    name: &'static str,
    max_duration: Duration,
    deadline: Deadline,
    grace: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    debug!(call = name, max_duration_ms = max_duration.as_millis() as u64, "Calling {}", name);

    let watchdog = Watchdog::start(name, max_duration, max_duration + grace);

    let call = async {
        match deadline {
            Deadline::Soft => Ok(fut.await),
            Deadline::Hard => tokio::time::timeout(max_duration, fut).await,
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(call = name, "Call cancelled");
            return None;
        }
        result = call => result,
    };

    watchdog.stop();

    match result {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            if !cancel.is_cancelled() {
                error!(call = name, error = %e, "Call to {} errored", name);
            }
            None
        }
        Err(_) => {
            warn!(
                call = name,
                max_duration_ms = max_duration.as_millis() as u64,
                "Call to {} timed out",
                name
            );
            None
        }
    }
}
