//! Error types for the load-generation core.
//!
//! Only [`ConfigError`] and [`ThresholdParseError`] ever stop the tool, and
//! only before a run starts. Everything raised while VUs are running is
//! recorded as a failed sample and the VU moves on.

use std::time::Duration;
use thiserror::Error;

/// Transport-layer failures reported by an [`HttpExecutor`](crate::http::HttpExecutor).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not reach the target
    #[error("Connection failed to {endpoint}: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    /// No response within the executor's timeout
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// The request could not be built or sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a single workflow step failed.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A status outside the step's accepted set
    #[error("unexpected status {actual} (expected one of {expected:?})")]
    UnexpectedStatus {
        expected: &'static [u16],
        actual: u16,
    },

    /// Malformed JSON or a field of the wrong type
    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("response field `{0}` is missing or empty")]
    MissingField(&'static str),

    #[error("response field `{field}` has unexpected value {value:?}")]
    UnexpectedValue { field: &'static str, value: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl StepError {
    /// Transport failures abort the iteration; the rest only skip dependent steps.
    pub fn is_transport(&self) -> bool {
        matches!(self, StepError::Transport(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity field `{0}` must not be empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("account {0} is already in the identity pool")]
    DuplicateAccount(String),
}

/// Invalid run configuration, detected before any traffic is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },

    #[error(transparent)]
    Threshold(#[from] ThresholdParseError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid threshold {expression:?} on {metric}: {reason}")]
pub struct ThresholdParseError {
    pub metric: String,
    pub expression: String,
    pub reason: String,
}
