//! Error types for the fetch adapter.
//!
//! # Design
//! Every failure a caller can observe arrives as the `Err` side of a request
//! handle. `Aborted` is the sentinel produced by `abort()`. Non-ok responses
//! and transport failures both land in `Rejected` carrying an
//! [`ErrorEnvelope`], so callers match on one variant for "the server or the
//! network said no".

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::http::HttpResponse;

/// Failure value delivered by a request handle.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The caller invoked `abort()` before the request settled.
    #[error("abort")]
    Aborted,

    /// The transport failed or the server answered with a non-ok status.
    #[error("request rejected: {0}")]
    Rejected(ErrorEnvelope),

    /// The request `data` could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The `method` option did not name a supported HTTP method.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// Options or configuration were not a JSON object of the expected shape.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The request task ended without settling the handle (runtime shutdown
    /// or a panicking transport).
    #[error("request interrupted before settling")]
    Interrupted,

    /// A verb method was called outside a Tokio runtime.
    #[error("no Tokio runtime available to run the request")]
    NoRuntime,
}

impl AdapterError {
    pub fn is_abort(&self) -> bool {
        matches!(self, AdapterError::Aborted)
    }

    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            AdapterError::Rejected(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Errors reported by a `Transport` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Failure shape delivered on rejection.
///
/// `response` is the raw transport response when one exists (non-ok status);
/// it is `None` when the transport itself failed. `error` is the value
/// produced by the error-unwrap policy, `{}` when the body was missing or not
/// JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEnvelope {
    pub response: Option<HttpResponse>,
    pub error: Value,
}

impl ErrorEnvelope {
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "HTTP {status}: {}", self.error),
            None => write!(f, "transport failure: {}", self.error),
        }
    }
}
