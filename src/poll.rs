//! Bounded polling.
//!
//! Every waiting operation in the crate (stack terminal state, service
//! stabilisation, endpoint liveness) goes through [`poll_until`] instead of
//! its own sleep loop. The first poll runs immediately; subsequent polls are
//! separated by `interval` until `timeout` elapses.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;

/// What a single poll observed.
#[derive(Debug)]
pub enum Poll<T, S> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet; carries the observed state for reporting.
    Pending(S),
}

/// Final outcome of a bounded wait.
#[derive(Debug)]
pub enum PollOutcome<T, S> {
    /// The condition was met.
    Ready {
        /// Value produced by the final poll.
        value: T,
        /// Number of polls issued, including the successful one.
        attempts: u32,
    },
    /// The deadline passed first.
    TimedOut {
        /// Last observed pending state, if any poll completed.
        last: Option<S>,
        /// Number of polls issued.
        attempts: u32,
        /// Wall-clock time spent waiting.
        elapsed: Duration,
    },
}

impl<T, S> PollOutcome<T, S> {
    /// Returns true if the condition was met.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Number of polls issued.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Polls `probe` until it reports [`Poll::Ready`] or `timeout` elapses.
///
/// Retryable errors (throttling, transient network) are logged and the poll
/// is repeated after `interval`. Any other error is returned immediately.
///
/// # Errors
///
/// Returns the first non-retryable error raised by `probe`.
pub async fn poll_until<T, S, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<PollOutcome<T, S>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T, S>>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last = None;

    loop {
        attempts += 1;

        match probe().await {
            Ok(Poll::Ready(value)) => return Ok(PollOutcome::Ready { value, attempts }),
            Ok(Poll::Pending(state)) => {
                debug!("Poll {attempts} pending");
                last = Some(state);
            }
            Err(e) if e.is_retryable() => {
                warn!("Poll {attempts} hit a transient error, will retry: {e}");
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(PollOutcome::TimedOut {
                last,
                attempts,
                elapsed,
            });
        }

        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}
