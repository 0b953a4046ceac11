//! Condition poller
//!
//! Evaluates a predicate on a fixed cadence until it holds, fails, the
//! deadline passes, or the caller cancels. Evaluations never overlap.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

// =============================================================================
// Poll Spec
// =============================================================================

/// Cadence and budget of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    /// Delay between evaluations
    pub interval: Duration,
    /// Total budget, measured from the first tick. Zero means a single
    /// attempt without waiting.
    pub timeout: Duration,
    /// Evaluate once before the first interval elapses
    pub immediate: bool,
}

impl PollSpec {
    /// Immediate poll with the given interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Configuration("poll interval must be positive".into()));
        }
        Ok(Self {
            interval,
            timeout,
            immediate: true,
        })
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Zero timeout: evaluate once and do not wait for convergence
    pub fn is_single_attempt(&self) -> bool {
        self.timeout.is_zero()
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one predicate evaluation
#[derive(Debug)]
pub enum ConditionResult {
    /// Not there yet, evaluate again after the interval
    Pending,
    /// Done
    Satisfied,
    /// Stop now, no further evaluations
    Fatal(Error),
}

/// Successful end of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held on evaluation number `attempts`
    Satisfied { attempts: u32, elapsed: Duration },
    /// Single-attempt mode and the predicate was still pending
    NotAwaited,
}

/// Unsuccessful end of a poll
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("condition not met after {attempts} attempts ({elapsed:?})")]
    DeadlineExceeded { attempts: u32, elapsed: Duration },

    #[error("cancelled after {attempts} attempts ({elapsed:?})")]
    Cancelled { attempts: u32, elapsed: Duration },

    #[error("attempt {attempts} failed: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: Error,
    },
}

// =============================================================================
// Poll Loop
// =============================================================================

enum Pause {
    Elapsed,
    Cancelled,
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> Pause {
    tokio::select! {
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = sleep(duration) => Pause::Elapsed,
    }
}

/// Poll `condition` according to `spec` until it is satisfied.
pub async fn poll_until<F, Fut>(
    spec: &PollSpec,
    cancel: &CancellationToken,
    mut condition: F,
) -> std::result::Result<PollOutcome, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConditionResult>,
{
    let mut start = Instant::now();
    let mut attempts = 0u32;

    if spec.is_single_attempt() {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts,
                elapsed: start.elapsed(),
            });
        }
        attempts += 1;
        return match condition().await {
            ConditionResult::Satisfied => Ok(PollOutcome::Satisfied {
                attempts,
                elapsed: start.elapsed(),
            }),
            ConditionResult::Fatal(source) => Err(PollError::Fatal { attempts, source }),
            ConditionResult::Pending => Ok(PollOutcome::NotAwaited),
        };
    }

    // The budget runs from the first tick
    if !spec.immediate {
        if let Pause::Cancelled = pause(spec.interval, cancel).await {
            return Err(PollError::Cancelled {
                attempts,
                elapsed: start.elapsed(),
            });
        }
        start = Instant::now();
    }
    let deadline = start + spec.timeout;
    let mut wait_first = false;

    loop {
        if wait_first {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < spec.interval {
                // The next tick would land past the deadline.
                if let Pause::Cancelled = pause(remaining, cancel).await {
                    return Err(PollError::Cancelled {
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                return Err(PollError::DeadlineExceeded {
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
            if let Pause::Cancelled = pause(spec.interval, cancel).await {
                return Err(PollError::Cancelled {
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
        }
        wait_first = true;

        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts,
                elapsed: start.elapsed(),
            });
        }

        attempts += 1;
        match condition().await {
            ConditionResult::Satisfied => {
                return Ok(PollOutcome::Satisfied {
                    attempts,
                    elapsed: start.elapsed(),
                })
            }
            ConditionResult::Fatal(source) => return Err(PollError::Fatal { attempts, source }),
            ConditionResult::Pending => {
                trace!("condition pending after attempt {}", attempts);
            }
        }
    }
}
