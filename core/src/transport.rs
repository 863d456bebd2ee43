//! The network seam.
//!
//! # Design
//! The adapter never performs I/O itself; it hands an `HttpRequest` to a
//! [`Transport`] and gets an `HttpResponse` back. Non-ok statuses are data,
//! not errors: `TransportError` is reserved for failures where no response
//! exists at all.
//!
//! Every call receives a `CancellationToken` that fires when the caller
//! aborts. Transports that can stop in-flight work should watch it; the
//! adapter rejects the handle on abort whether or not they do.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Executes request descriptors.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Issue `request` exactly once.
    async fn fetch(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "ureq")]
pub use self::blocking::UreqTransport;

#[cfg(feature = "ureq")]
mod blocking {
    use super::*;
    use crate::http::{Headers, Method};

    /// Transport backed by a blocking `ureq` agent.
    ///
    /// Requests run on Tokio's blocking pool. A blocking call cannot be
    /// interrupted: on abort the handle rejects immediately, the call runs to
    /// completion in the background and its response is dropped.
    #[derive(Clone)]
    pub struct UreqTransport {
        agent: ureq::Agent,
    }

    impl fmt::Debug for UreqTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "ureq transport")
        }
    }

    impl Default for UreqTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UreqTransport {
        /// Agent with status-as-error disabled so 4xx/5xx come back as data.
        pub fn new() -> Self {
            let agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build()
                .new_agent();
            Self { agent }
        }

        /// Use a preconfigured agent. It must not treat statuses as errors.
        pub fn with_agent(agent: ureq::Agent) -> Self {
            Self { agent }
        }
    }

    #[async_trait]
    impl Transport for UreqTransport {
        async fn fetch(
            &self,
            request: HttpRequest,
            cancel: CancellationToken,
        ) -> Result<HttpResponse, TransportError> {
            let agent = self.agent.clone();
            let task = tokio::task::spawn_blocking(move || execute(&agent, request));
            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                joined = task => joined.map_err(|e| TransportError::Network(e.to_string()))?,
            }
        }
    }

    fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &Headers) -> ureq::RequestBuilder<B> {
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        builder
    }

    fn execute(agent: &ureq::Agent, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        if !req.extra.is_empty() {
            tracing::trace!(keys = ?req.extra.keys().collect::<Vec<_>>(), "ureq ignores passthrough options");
        }

        let url = req.url.as_str();
        let result = match (req.method, req.body) {
            (Method::Get, _) => with_headers(agent.get(url), &req.headers).call(),
            (Method::Head, _) => with_headers(agent.head(url), &req.headers).call(),
            (Method::Delete, None) => with_headers(agent.delete(url), &req.headers).call(),
            (Method::Delete, Some(body)) => with_headers(agent.delete(url), &req.headers)
                .force_send_body()
                .send(body.as_bytes()),
            (method, body) => {
                let builder = match method {
                    Method::Put => agent.put(url),
                    Method::Patch => agent.patch(url),
                    _ => agent.post(url),
                };
                let builder = with_headers(builder, &req.headers);
                match body {
                    Some(body) => builder.send(body.as_bytes()),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = if req.method == Method::Head {
            String::new()
        } else {
            response
                .body_mut()
                .read_to_string()
                .map_err(|e| TransportError::Network(e.to_string()))?
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
