//! Client-side JSON request adapter over a pluggable HTTP transport.
//!
//! # Overview
//! [`Adapter`] exposes `get`/`post`/`put`/`patch`/`head`/`del`. Each call
//! merges the adapter's defaults with per-call options, builds a plain-data
//! [`HttpRequest`], hands it to a [`Transport`] on a spawned task and returns
//! a [`RequestHandle`] at once. Awaiting the handle yields the parsed JSON
//! body, or an [`AdapterError`] whose `Rejected` variant carries the
//! response and the unwrapped error payload.
//!
//! # Design
//! - Request building ([`build_request`]) and response normalization
//!   ([`normalize`]) are pure functions over plain data, so they are tested
//!   without any network.
//! - The transport is the only I/O boundary. [`UreqTransport`] is the
//!   default implementation; tests substitute scripted transports.
//! - A handle settles exactly once: transport completion, `abort()` or a
//!   build failure, whichever comes first.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fetch_adapter::AdapterError> {
//! use fetch_adapter::{Adapter, UreqTransport};
//! use serde_json::json;
//!
//! let api = Adapter::builder(UreqTransport::new())
//!     .url_root("http://localhost:3000")
//!     .build();
//! let _user = api.post("/users", Some(&json!({"name": "paco"})), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod build;
pub mod config;
pub mod error;
pub mod handle;
pub mod http;
pub mod options;
pub mod qs;
pub mod response;
pub mod transport;

pub use adapter::{Adapter, AdapterBuilder};
pub use build::{build_request, prepare};
pub use config::AdapterConfig;
pub use error::{AdapterError, ErrorEnvelope, TransportError};
pub use handle::{AbortHandle, RequestHandle, ResponseFuture};
pub use http::{Headers, HttpRequest, HttpResponse, Method};
pub use options::Options;
pub use qs::QsOptions;
pub use response::{check_status, normalize, ErrorUnwrap, ErrorsField, RequestContext};
pub use transport::Transport;
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
