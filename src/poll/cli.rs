//! CLI output classification
//!
//! `kubectl` gives no structured error, only text. This stage pattern-matches
//! the combined output of a failed run. It sits apart from the API
//! classifier so it can be replaced once the tool reports structured errors.

use super::classify::has_transient_message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server messages kubectl prints for retry-worthy failures
const TRANSIENT_CLI_MESSAGES: &[&str] = &[
    "the object has been modified",
    "too many requests",
    "serviceunavailable",
    "the server is currently unable to handle the request",
    "unable to connect to the server",
];

/// What a kubectl invocation is meant to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KubectlAction {
    Create,
    Delete,
}

impl KubectlAction {
    pub fn verb(self) -> &'static str {
        match self {
            KubectlAction::Create => "create",
            KubectlAction::Delete => "delete",
        }
    }
}

impl fmt::Display for KubectlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Verdict on a failed kubectl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerdict {
    /// The action's goal already holds
    Success,
    /// Try the same invocation again
    Retry,
    /// Give up
    Fatal,
}

pub fn is_retryable_cli_output(output: &str) -> bool {
    if has_transient_message(output) {
        return true;
    }
    let lower = output.to_lowercase();
    TRANSIENT_CLI_MESSAGES.iter().any(|m| lower.contains(m))
}

pub fn is_already_exists_output(output: &str) -> bool {
    output.to_lowercase().contains("already exists")
}

pub fn is_not_found_output(output: &str) -> bool {
    output.to_lowercase().contains("not found")
}

/// Classify the output of a failed kubectl run
pub fn classify_output(output: &str, action: KubectlAction) -> CliVerdict {
    if is_retryable_cli_output(output) {
        return CliVerdict::Retry;
    }
    match action {
        KubectlAction::Create if is_already_exists_output(output) => CliVerdict::Success,
        KubectlAction::Delete if is_not_found_output(output) => CliVerdict::Success,
        _ => CliVerdict::Fatal,
    }
}
