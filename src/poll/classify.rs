//! API error classification
//!
//! Decides what an error from the Kubernetes API means for a poll loop:
//! retry, treat as success, or abort. The verdict depends on what the call
//! was trying to do, so a 404 while deleting is success but a 404 while
//! waiting for a claim to appear is just "not yet".

use super::poller::ConditionResult;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages that indicate a transient failure regardless of status code
const TRANSIENT_MESSAGES: &[&str] = &[
    "context deadline exceeded",
    "etcdserver: request timed out",
    "etcdserver: leader changed",
    "connection reset by peer",
    "connection refused",
    "unexpected eof",
    "http2: client connection lost",
    "broken pipe",
    "i/o timeout",
    "tls handshake timeout",
];

// =============================================================================
// Intent
// =============================================================================

/// What the failing call was trying to achieve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Submitting a new object
    Create,
    /// Reading an object that should exist (or is about to)
    Observe,
    /// Removing an object, or waiting for it to disappear
    Delete,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Create => write!(f, "create"),
            Intent::Observe => write!(f, "observe"),
            Intent::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classification of one observed API error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryableErrorKind {
    /// Connection-level failure talking to the API server
    NetworkTransient,
    /// The server gave up on the request (504, ServerTimeout)
    ServerTimeout,
    /// The server is up but cannot serve right now (500, 503)
    ServerUnavailable,
    /// Rate limited (429)
    Throttled,
    /// Optimistic concurrency conflict (409 Conflict)
    Conflict,
    /// 404 while the object is expected to show up
    NotFoundDuringCreation,
    /// 404 while removing the object: the goal is reached
    NotFoundDuringDeletion,
    /// 409 AlreadyExists while creating: the goal is reached
    AlreadyExistsDuringCreation,
    /// Anything else: bad input, forbidden, invalid
    PermanentClientError,
}

impl RetryableErrorKind {
    /// The same call may succeed if repeated after a delay
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RetryableErrorKind::NetworkTransient
                | RetryableErrorKind::ServerTimeout
                | RetryableErrorKind::ServerUnavailable
                | RetryableErrorKind::Throttled
                | RetryableErrorKind::Conflict
        )
    }

    /// The error means the intent is already fulfilled
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RetryableErrorKind::NotFoundDuringDeletion
                | RetryableErrorKind::AlreadyExistsDuringCreation
        )
    }

    /// Poll verdict for this kind
    pub fn condition(self, err: kube::Error) -> ConditionResult {
        if self.is_success() {
            ConditionResult::Satisfied
        } else if self.is_retryable() || self == RetryableErrorKind::NotFoundDuringCreation {
            ConditionResult::Pending
        } else {
            ConditionResult::Fatal(Error::Kube(err))
        }
    }
}

/// Classify an API error in the context of what the call intended
pub fn classify(err: &kube::Error, intent: Intent) -> RetryableErrorKind {
    match err {
        kube::Error::Api(resp) => classify_status(resp.code, &resp.reason, &resp.message, intent),
        kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_) => {
            RetryableErrorKind::NetworkTransient
        }
        other => {
            if has_transient_message(&other.to_string()) {
                RetryableErrorKind::NetworkTransient
            } else {
                RetryableErrorKind::PermanentClientError
            }
        }
    }
}

fn classify_status(code: u16, reason: &str, message: &str, intent: Intent) -> RetryableErrorKind {
    match (code, reason) {
        (404, _) => match intent {
            Intent::Delete => RetryableErrorKind::NotFoundDuringDeletion,
            Intent::Create | Intent::Observe => RetryableErrorKind::NotFoundDuringCreation,
        },
        (409, "AlreadyExists") => match intent {
            Intent::Create => RetryableErrorKind::AlreadyExistsDuringCreation,
            Intent::Observe | Intent::Delete => RetryableErrorKind::PermanentClientError,
        },
        (409, _) => RetryableErrorKind::Conflict,
        (429, _) | (_, "TooManyRequests") => RetryableErrorKind::Throttled,
        (504, _) | (_, "Timeout") | (_, "ServerTimeout") => RetryableErrorKind::ServerTimeout,
        (500, _) | (503, _) | (_, "ServiceUnavailable") => RetryableErrorKind::ServerUnavailable,
        _ if has_transient_message(message) => RetryableErrorKind::NetworkTransient,
        _ => RetryableErrorKind::PermanentClientError,
    }
}

/// Error text carries one of the known transient markers
pub fn has_transient_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| lower.contains(m))
}

/// Retry-worthy regardless of intent
pub fn is_retryable_api_error(err: &kube::Error) -> bool {
    classify(err, Intent::Observe).is_retryable()
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Poll verdict for an error observed inside a readiness predicate
pub fn condition_for(err: kube::Error, intent: Intent) -> ConditionResult {
    classify(&err, intent).condition(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::api_error;
    use assert_matches::assert_matches;

    #[test]
    fn test_server_side_transients_are_retryable() {
        let cases = [
            (504, "Timeout", RetryableErrorKind::ServerTimeout),
            (500, "ServerTimeout", RetryableErrorKind::ServerTimeout),
            (500, "InternalError", RetryableErrorKind::ServerUnavailable),
            (503, "ServiceUnavailable", RetryableErrorKind::ServerUnavailable),
            (429, "TooManyRequests", RetryableErrorKind::Throttled),
            (409, "Conflict", RetryableErrorKind::Conflict),
        ];

        for (code, reason, expected) in cases {
            let err = api_error(code, reason, "try again");
            let kind = classify(&err, Intent::Observe);
            assert_eq!(kind, expected, "{} {}", code, reason);
            assert!(kind.is_retryable());
            assert!(is_retryable_api_error(&err));
        }
    }

    #[test]
    fn test_context_deadline_exceeded_is_transient() {
        let err = api_error(
            400,
            "BadRequest",
            "rpc error: code = Unknown desc = context deadline exceeded",
        );
        assert_eq!(classify(&err, Intent::Create), RetryableErrorKind::NetworkTransient);

        let etcd = api_error(400, "", "etcdserver: request timed out");
        assert!(is_retryable_api_error(&etcd));
    }

    #[test]
    fn test_transport_errors_are_transient() {
        let reset = kube::Error::Service(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert_eq!(classify(&reset, Intent::Delete), RetryableErrorKind::NetworkTransient);

        let eof = kube::Error::ReadEvents(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected EOF",
        ));
        assert!(is_retryable_api_error(&eof));
    }

    #[test]
    fn test_not_found_depends_on_intent() {
        let err = api_error(404, "NotFound", "persistentvolumeclaims \"rbd-pvc\" not found");

        assert_eq!(classify(&err, Intent::Delete), RetryableErrorKind::NotFoundDuringDeletion);
        assert!(classify(&err, Intent::Delete).is_success());

        assert_eq!(classify(&err, Intent::Observe), RetryableErrorKind::NotFoundDuringCreation);
        assert!(!classify(&err, Intent::Observe).is_retryable());
        assert_matches!(condition_for(err, Intent::Observe), ConditionResult::Pending);
    }

    #[test]
    fn test_already_exists_depends_on_intent() {
        let err = api_error(409, "AlreadyExists", "storageclasses \"csi-rbd-sc\" already exists");
        assert!(is_already_exists(&err));
        assert_eq!(
            classify(&err, Intent::Create),
            RetryableErrorKind::AlreadyExistsDuringCreation
        );
        assert_matches!(condition_for(err, Intent::Create), ConditionResult::Satisfied);

        let err = api_error(409, "AlreadyExists", "already exists");
        assert_matches!(condition_for(err, Intent::Observe), ConditionResult::Fatal(_));
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for (code, reason) in [(400, "BadRequest"), (403, "Forbidden"), (422, "Invalid"), (401, "Unauthorized")] {
            let err = api_error(code, reason, "rejected");
            assert_eq!(classify(&err, Intent::Create), RetryableErrorKind::PermanentClientError);
            assert_matches!(
                condition_for(err, Intent::Create),
                ConditionResult::Fatal(Error::Kube(_))
            );
        }
    }
}
