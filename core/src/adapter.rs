//! The public adapter: verb methods over one shared dispatch path.
//!
//! # Design
//! `Adapter` owns its configuration (url root, defaults, error-unwrap
//! policy) and a transport. Verb methods only read that configuration; the
//! setters take `&mut self`, so concurrent requests can never observe a
//! half-written defaults object.
//!
//! Options are layered lowest precedence first: the verb's method, the
//! defaults, the caller's options, then the explicit `data` argument. The
//! merge produces a fresh object per call.
//!
//! Each call spawns its request task immediately and returns the handle
//! without waiting for the transport.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;

use crate::build::build_request;
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::handle::RequestHandle;
use crate::http::Method;
use crate::options::Options;
use crate::response::{normalize, ErrorUnwrap, ErrorsField, RequestContext};
use crate::transport::Transport;

/// Uniform JSON request adapter over a [`Transport`].
pub struct Adapter<T: Transport> {
    url_root: String,
    defaults: Options,
    error_unwrap: Arc<dyn ErrorUnwrap>,
    transport: Arc<T>,
}

impl<T: Transport> fmt::Debug for Adapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("url_root", &self.url_root)
            .field("defaults", &self.defaults)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Clone for Adapter<T> {
    fn clone(&self) -> Self {
        Self {
            url_root: self.url_root.clone(),
            defaults: self.defaults.clone(),
            error_unwrap: Arc::clone(&self.error_unwrap),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> Adapter<T> {
    /// Adapter with an empty url root, empty defaults and [`ErrorsField`].
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: T) -> AdapterBuilder<T> {
        AdapterBuilder {
            transport,
            url_root: String::new(),
            defaults: Options::new(),
            error_unwrap: Arc::new(ErrorsField),
        }
    }

    pub fn url_root(&self) -> &str {
        &self.url_root
    }

    pub fn set_url_root(&mut self, url_root: impl Into<String>) {
        self.url_root = url_root.into();
    }

    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    /// Replace the defaults layer for every subsequent request.
    pub fn set_defaults(&mut self, defaults: Options) {
        self.defaults = defaults;
    }

    pub fn set_error_unwrap(&mut self, policy: impl ErrorUnwrap + 'static) {
        self.error_unwrap = Arc::new(policy);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn get<D: Serialize + ?Sized>(
        &self,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        self.verb(Method::Get, path, data, options)
    }

    pub fn post<D: Serialize + ?Sized>(
        &self,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        self.verb(Method::Post, path, data, options)
    }

    pub fn put<D: Serialize + ?Sized>(
        &self,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        self.verb(Method::Put, path, data, options)
    }

    pub fn patch<D: Serialize + ?Sized>(
        &self,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        self.verb(Method::Patch, path, data, options)
    }

    pub fn head<D: Serialize + ?Sized>(
        &self,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        self.verb(Method::Head, path, data, options)
    }

    /// DELETE takes no data argument; a `data` key in the options or the
    /// defaults is still sent as a JSON body.
    pub fn del(&self, path: &str, options: Option<Options>) -> RequestHandle {
        let base = Options::new().method(Method::Delete);
        let caller = options.unwrap_or_default();
        self.dispatch(path, Options::merged([&base, &self.defaults, &caller]))
    }

    /// Issue a request with explicit options layered over the defaults.
    /// Without a `method` key this is a GET.
    pub fn request(&self, path: &str, options: Options) -> RequestHandle {
        self.dispatch(path, Options::merged([&self.defaults, &options]))
    }

    fn verb<D: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        data: Option<&D>,
        options: Option<Options>,
    ) -> RequestHandle {
        let data = match data.map(serde_json::to_value).transpose() {
            Ok(data) => data,
            Err(err) => {
                warn!(%method, path, error = %err, "request data is not serializable");
                return RequestHandle::settled(Err(AdapterError::Serialization(err.to_string())));
            }
        };

        let base = Options::new().method(method);
        let caller = options.unwrap_or_default();
        let explicit = data.map(|d| Options::new().data(d)).unwrap_or_default();
        self.dispatch(
            path,
            Options::merged([&base, &self.defaults, &caller, &explicit]),
        )
    }

    fn dispatch(&self, path: &str, options: Options) -> RequestHandle {
        let url = format!("{}{}", self.url_root, path);
        let context = RequestContext {
            path: path.to_string(),
            options: options.clone(),
        };

        let request = match build_request(&url, options) {
            Ok(request) => request,
            Err(err) => {
                warn!(%url, error = %err, "request could not be built");
                return RequestHandle::settled(Err(err));
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(%url, error = %err, "no runtime for request");
                return RequestHandle::settled(Err(AdapterError::NoRuntime));
            }
        };

        let (handle, settlement, token) = RequestHandle::pending();
        let span = debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            url = %request.url,
        );
        let transport = Arc::clone(&self.transport);
        let policy = Arc::clone(&self.error_unwrap);

        runtime.spawn(
            async move {
                debug!("dispatching");
                // The fetch arm is polled first so the call is issued even
                // when abort lands before this task starts.
                let outcome = tokio::select! {
                    biased;
                    outcome = transport.fetch(request, token.clone()) => outcome,
                    _ = token.cancelled() => {
                        debug!("abandoned after abort");
                        return;
                    }
                };

                let result = normalize(outcome, policy.as_ref(), &context);
                match &result {
                    Ok(_) => debug!("resolved"),
                    Err(err) => debug!(error = %err, "rejected"),
                }
                if !settlement.settle(result) {
                    debug!("already settled; result dropped");
                }
            }
            .instrument(span),
        );

        handle
    }
}

/// Builder for [`Adapter`].
pub struct AdapterBuilder<T: Transport> {
    transport: T,
    url_root: String,
    defaults: Options,
    error_unwrap: Arc<dyn ErrorUnwrap>,
}

impl<T: Transport> fmt::Debug for AdapterBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBuilder")
            .field("url_root", &self.url_root)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> AdapterBuilder<T> {
    pub fn url_root(mut self, url_root: impl Into<String>) -> Self {
        self.url_root = url_root.into();
        self
    }

    pub fn defaults(mut self, defaults: Options) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn error_unwrap(mut self, policy: impl ErrorUnwrap + 'static) -> Self {
        self.error_unwrap = Arc::new(policy);
        self
    }

    /// Apply a loaded configuration, replacing url root and defaults.
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.url_root = config.url_root;
        self.defaults = config.defaults;
        self
    }

    pub fn build(self) -> Adapter<T> {
        Adapter {
            url_root: self.url_root,
            defaults: self.defaults,
            error_unwrap: self.error_unwrap,
            transport: Arc::new(self.transport),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::TransportError;
    use crate::http::{HttpRequest, HttpResponse};

    /// Records requests and answers with a fixed reply, optionally holding
    /// the reply until `release` is notified.
    #[derive(Debug)]
    struct Scripted {
        calls: Mutex<Vec<HttpRequest>>,
        reply: Result<HttpResponse, TransportError>,
        called: Notify,
        release: Option<Notify>,
    }

    impl Scripted {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reply: Ok(HttpResponse::new(status, body)),
                called: Notify::new(),
                release: None,
            }
        }

        fn held(mut self) -> Self {
            self.release = Some(Notify::new());
            self
        }

        fn failing() -> Self {
            Self {
                reply: Err(TransportError::Network("connection refused".to_string())),
                ..Self::replying(0, "")
            }
        }

        fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn fetch(
            &self,
            request: HttpRequest,
            _cancel: CancellationToken,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.lock().push(request);
            self.called.notify_one();
            if let Some(release) = &self.release {
                release.notified().await;
            }
            self.reply.clone()
        }
    }

    fn adapter(transport: Scripted) -> Adapter<Scripted> {
        Adapter::builder(transport).url_root("/api").build()
    }

    #[tokio::test]
    async fn post_resolves_with_parsed_body() {
        let adapter = adapter(Scripted::replying(200, r#"{"id":1,"name":"paco"}"#));
        let value = adapter.post("/users", Some(&json!({"name": "paco"})), None).await.unwrap();
        assert_eq!(value, json!({"id": 1, "name": "paco"}));

        let calls = adapter.transport().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "/api/users");
        assert_eq!(calls[0].method, Method::Post);
        assert_eq!(calls[0].body.as_deref(), Some(r#"{"name":"paco"}"#));
        assert_eq!(calls[0].headers.get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn get_sends_data_as_query() {
        let adapter = adapter(Scripted::replying(200, "[]"));
        adapter.get("/users", Some(&json!({"manager_id": 2})), None).await.unwrap();
        let calls = adapter.transport().calls();
        assert_eq!(calls[0].url, "/api/users?manager_id=2");
        assert!(calls[0].body.is_none());
    }

    #[tokio::test]
    async fn failure_rejects_with_unwrapped_errors() {
        let adapter = adapter(Scripted::replying(422, r#"{"errors": ["foo"]}"#));
        let err = adapter.put("/users/1", Some(&json!({"name": ""})), None).await.unwrap_err();
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope.error, json!(["foo"]));
        assert_eq!(envelope.status(), Some(422));
    }

    #[tokio::test]
    async fn malformed_failure_rejects_with_empty_object() {
        let adapter = adapter(Scripted::replying(422, "ERROR"));
        let err = adapter.get::<Value>("/users", None, None).await.unwrap_err();
        assert_eq!(err.envelope().unwrap().error, json!({}));
    }

    #[tokio::test]
    async fn status_passes_through() {
        let adapter = adapter(Scripted::replying(404, ""));
        let err = adapter.del("/users/9", None).await.unwrap_err();
        assert_eq!(err.envelope().and_then(|e| e.status()), Some(404));
    }

    #[tokio::test]
    async fn transport_failure_rejects_without_response() {
        let adapter = adapter(Scripted::failing());
        let err = adapter.get::<Value>("/users", None, None).await.unwrap_err();
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope.response, None);
        assert_eq!(envelope.error, json!({}));
    }

    #[tokio::test]
    async fn transport_is_called_without_awaiting_the_handle() {
        let adapter = adapter(Scripted::replying(200, "{}").held());
        let handle = adapter.get::<Value>("/users", None, None);
        adapter.transport().called.notified().await;
        assert_eq!(adapter.transport().calls().len(), 1);
        assert!(!handle.is_settled());
        handle.abort();
    }

    #[tokio::test]
    async fn abort_before_settlement_rejects_with_sentinel() {
        let adapter = adapter(Scripted::replying(200, r#"{"id":1}"#).held());
        let handle = adapter.post("/users", Some(&json!({"name": "paco"})), None);
        adapter.transport().called.notified().await;

        handle.abort();
        if let Some(release) = &adapter.transport().release {
            release.notify_one();
        }
        let err = handle.await.unwrap_err();
        assert!(err.is_abort());
        assert_eq!(err.to_string(), "abort");
    }

    #[tokio::test]
    async fn abort_before_task_runs_still_calls_transport_once() {
        let adapter = adapter(Scripted::replying(200, r#"{"id":1}"#));
        let handle = adapter.get::<Value>("/users", None, None);
        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_abort());

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(adapter.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn abort_after_settlement_is_a_no_op() {
        let adapter = adapter(Scripted::replying(200, r#"{"id":1}"#));
        let (abort, promise) = adapter.get::<Value>("/users/1", None, None).into_parts();
        let value = promise.await.unwrap();
        abort.abort();
        abort.abort();
        assert_eq!(value, json!({"id": 1}));
        assert!(abort.is_settled());
    }

    #[tokio::test]
    async fn defaults_and_call_headers_both_survive() {
        let mut adapter = adapter(Scripted::replying(200, "{}"));
        adapter.set_defaults(Options::new().header("a", 1).set("credentials", "include"));
        adapter
            .post("/users", Some(&json!({"x": 1})), Some(Options::new().header("b", 2)))
            .await
            .unwrap();

        let calls = adapter.transport().calls();
        let headers: BTreeMap<_, _> = calls[0].headers.iter().collect();
        assert_eq!(headers.get("a"), Some(&"1"));
        assert_eq!(headers.get("b"), Some(&"2"));
        assert_eq!(calls[0].extra.get("credentials"), Some(&json!("include")));
        // Defaults are not mutated by the merge.
        assert!(adapter.defaults().get("data").is_none());
        assert_eq!(adapter.defaults().get("headers"), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn merge_precedence_data_over_options_over_defaults() {
        let mut adapter = adapter(Scripted::replying(200, "{}"));
        adapter.set_defaults(Options::new().data(json!({"source": "defaults", "d": 1})));
        let options = Options::new().data(json!({"source": "options", "o": 1}));
        adapter
            .patch("/users/1", Some(&json!({"source": "explicit"})), Some(options))
            .await
            .unwrap();

        let body: Value =
            serde_json::from_str(adapter.transport().calls()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"source": "explicit", "d": 1, "o": 1}));
    }

    #[tokio::test]
    async fn caller_method_overrides_verb_default() {
        let adapter = adapter(Scripted::replying(200, "{}"));
        adapter
            .post("/users", Some(&json!({})), Some(Options::new().method(Method::Put)))
            .await
            .unwrap();
        assert_eq!(adapter.transport().calls()[0].method, Method::Put);
    }

    #[tokio::test]
    async fn del_honours_data_from_options() {
        let adapter = adapter(Scripted::replying(204, ""));
        let value = adapter
            .del("/users/1", Some(Options::new().data(json!({"reason": "dup"}))))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
        let calls = adapter.transport().calls();
        assert_eq!(calls[0].method, Method::Delete);
        assert_eq!(calls[0].body.as_deref(), Some(r#"{"reason":"dup"}"#));
    }

    #[tokio::test]
    async fn request_without_method_is_get() {
        let adapter = adapter(Scripted::replying(200, "{}"));
        adapter.request("/ping", Options::new()).await.unwrap();
        assert_eq!(adapter.transport().calls()[0].method, Method::Get);
    }

    #[tokio::test]
    async fn unserializable_data_rejects_without_calling_transport() {
        let adapter = adapter(Scripted::replying(200, "{}"));
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");
        let err = adapter.post("/users", Some(&bad), None).await.unwrap_err();
        assert!(matches!(err, AdapterError::Serialization(_)));
        assert!(adapter.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_method_rejects_the_handle() {
        let adapter = adapter(Scripted::replying(200, "{}"));
        let options = Options::new().set("method", "BREW");
        let err = adapter.request("/coffee", options).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidMethod(_)));
        assert!(adapter.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn custom_error_unwrap_receives_context() {
        let mut adapter = adapter(Scripted::replying(400, r#"{"message": "bad"}"#));
        adapter.set_error_unwrap(|error: Option<&Value>, ctx: &RequestContext| {
            json!({
                "message": error.and_then(|e| e.get("message")).cloned(),
                "path": ctx.path,
                "method": ctx.options.get("method").cloned(),
            })
        });
        let err = adapter.post("/users", Some(&json!({})), None).await.unwrap_err();
        assert_eq!(
            err.envelope().unwrap().error,
            json!({"message": "bad", "path": "/users", "method": "POST"})
        );
    }

    #[test]
    fn outside_a_runtime_the_handle_rejects() {
        let adapter = adapter(Scripted::replying(200, "{}"));
        let handle = adapter.get::<Value>("/users", None, None);
        assert!(handle.is_settled());
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(async { handle.await }).unwrap_err();
        assert!(matches!(err, AdapterError::NoRuntime));
        assert!(adapter.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn config_sets_root_and_defaults() {
        let config = AdapterConfig::from_json(
            r#"{"urlRoot": "/v2", "defaults": {"headers": {"X-Client": "web"}}}"#,
        )
        .unwrap();
        let adapter = Adapter::builder(Scripted::replying(200, "{}")).config(config).build();
        adapter.get::<Value>("/users", None, None).await.unwrap();
        let calls = adapter.transport().calls();
        assert_eq!(calls[0].url, "/v2/users");
        assert_eq!(calls[0].headers.get("x-client"), Some("web"));
    }
}
