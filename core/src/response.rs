//! Response normalizer: decides success or failure and shapes the value the
//! request handle settles with.
//!
//! # Design
//! Success is the transport's ok flag (2xx). The body of a successful
//! response is parsed as JSON, with an empty body resolving to `null`.
//! Everything else becomes [`AdapterError::Rejected`]: the failure body is
//! parsed if it can be, handed to the configured [`ErrorUnwrap`] policy, and
//! packaged with the raw response. A body that is missing or not JSON never
//! surfaces as a parse error; the policy sees `None` and the default policy
//! answers `{}`.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AdapterError, ErrorEnvelope, TransportError};
use crate::http::HttpResponse;
use crate::options::Options;

/// Split responses on the transport's ok flag.
pub fn check_status(response: HttpResponse) -> Result<HttpResponse, HttpResponse> {
    if response.ok() {
        Ok(response)
    } else {
        Err(response)
    }
}

/// What the unwrap policy knows about the failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Path as passed to the verb method, without the url root.
    pub path: String,
    /// Merged options before GET/HEAD data was moved into the URL.
    pub options: Options,
}

/// Policy that extracts the error payload from a parsed failure body.
///
/// `error` is `None` when the body was empty, not JSON, or no response
/// exists. Any `Fn(Option<&Value>, &RequestContext) -> Value` works.
pub trait ErrorUnwrap: Send + Sync {
    fn unwrap_error(&self, error: Option<&Value>, context: &RequestContext) -> Value;
}

impl<F> ErrorUnwrap for F
where
    F: Fn(Option<&Value>, &RequestContext) -> Value + Send + Sync,
{
    fn unwrap_error(&self, error: Option<&Value>, context: &RequestContext) -> Value {
        self(error, context)
    }
}

/// Default policy: the `errors` field when present and truthy, else `{}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorsField;

impl ErrorUnwrap for ErrorsField {
    fn unwrap_error(&self, error: Option<&Value>, _context: &RequestContext) -> Value {
        error
            .and_then(|e| e.get("errors"))
            .filter(|errors| is_truthy(errors))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Turn a transport outcome into the value a handle settles with.
pub fn normalize(
    outcome: Result<HttpResponse, TransportError>,
    unwrap: &dyn ErrorUnwrap,
    context: &RequestContext,
) -> Result<Value, AdapterError> {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, path = %context.path, "transport failed");
            return Err(AdapterError::Rejected(ErrorEnvelope {
                response: None,
                error: unwrap.unwrap_error(None, context),
            }));
        }
    };

    match check_status(response) {
        Ok(response) => {
            if response.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            match serde_json::from_str(&response.body) {
                Ok(value) => Ok(value),
                Err(err) => {
                    warn!(status = response.status, error = %err, "ok response body is not JSON");
                    Err(AdapterError::Rejected(ErrorEnvelope {
                        error: unwrap.unwrap_error(None, context),
                        response: Some(response),
                    }))
                }
            }
        }
        Err(response) => {
            let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
            if parsed.is_none() {
                warn!(status = response.status, "failure body is not JSON");
            }
            let error = unwrap.unwrap_error(parsed.as_ref(), context);
            Err(AdapterError::Rejected(ErrorEnvelope {
                response: Some(response),
                error,
            }))
        }
    }
}
