//! Waiter - the poller bound to a budget and a cancellation token
//!
//! Orchestrators go through a `Waiter` so that every poll failure comes
//! back as a crate `Error` naming the operation and the resource.

use super::classify::{classify, Intent};
use super::poller::{poll_until, ConditionResult, PollError, PollOutcome, PollSpec};
use crate::domain::ports::ResourceRef;
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Waiter {
    spec: PollSpec,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(spec: PollSpec, cancel: CancellationToken) -> Self {
        Self { spec, cancel }
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Same budget and token, different cadence
    pub fn with_interval(&self, interval: Duration) -> Self {
        Self::new(self.spec.with_interval(interval), self.cancel.clone())
    }

    /// Same cadence and token, different budget
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self::new(self.spec.with_timeout(timeout), self.cancel.clone())
    }

    /// Wait one interval before the first evaluation
    pub fn deferred(&self) -> Self {
        Self::new(self.spec.immediate(false), self.cancel.clone())
    }

    /// Await `condition` for `operation` on `resource`.
    pub async fn until<F, Fut>(&self, operation: &str, resource: &ResourceRef, condition: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConditionResult>,
    {
        match poll_until(&self.spec, &self.cancel, condition).await {
            Ok(PollOutcome::Satisfied { attempts, elapsed }) => {
                debug!(
                    "{} of {} done after {} attempt(s) ({:.1}s)",
                    operation,
                    resource,
                    attempts,
                    elapsed.as_secs_f64()
                );
                Ok(())
            }
            Ok(PollOutcome::NotAwaited) => {
                info!("Not waiting for {} of {} (zero timeout)", operation, resource);
                Ok(())
            }
            Err(err) => Err(self.context(err, operation, resource)),
        }
    }

    /// Submit one mutating call.
    ///
    /// Transient errors are retried within the budget (not in single-attempt
    /// mode). An error that means the intent already holds, AlreadyExists on
    /// create or NotFound on delete, yields `Ok(None)`.
    pub async fn submit<T, F, Fut>(
        &self,
        operation: &str,
        resource: &ResourceRef,
        intent: Intent,
        mut call: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, kube::Error>>,
    {
        let produced: RefCell<Option<T>> = RefCell::new(None);
        let slot = &produced;
        let retry_transient = !self.spec.is_single_attempt();

        let result = poll_until(&self.spec, &self.cancel, move || {
            let attempt = call();
            async move {
                match attempt.await {
                    Ok(obj) => {
                        *slot.borrow_mut() = Some(obj);
                        ConditionResult::Satisfied
                    }
                    Err(err) => {
                        let kind = classify(&err, intent);
                        if kind.is_success() {
                            debug!("{} of {} already fulfilled: {}", operation, resource, err);
                            ConditionResult::Satisfied
                        } else if kind.is_retryable() && retry_transient {
                            warn!("{} of {} failed, will retry: {}", operation, resource, err);
                            ConditionResult::Pending
                        } else {
                            ConditionResult::Fatal(Error::Kube(err))
                        }
                    }
                }
            }
        })
        .await;

        match result {
            Ok(_) => Ok(produced.into_inner()),
            Err(err) => Err(self.context(err, operation, resource)),
        }
    }

    fn context(&self, err: PollError, operation: &str, resource: &ResourceRef) -> Error {
        match err {
            PollError::DeadlineExceeded { .. } => Error::DeadlineExceeded {
                operation: operation.to_string(),
                resource: resource.to_string(),
                timeout: self.spec.timeout,
            },
            PollError::Cancelled { .. } => Error::Cancelled {
                operation: operation.to_string(),
                resource: resource.to_string(),
            },
            PollError::Fatal { source, .. } => source.in_operation(operation, resource),
        }
    }
}
