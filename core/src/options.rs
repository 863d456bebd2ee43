//! Request options and the deep-merge used to layer them.
//!
//! Options are a JSON object so that defaults, per-call overrides and
//! passthrough keys all share one shape. Recognized keys: `method`,
//! `headers`, `data`, `qs` / `qsOptions`. Anything else is forwarded to the
//! transport untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdapterError;
use crate::http::Method;
use crate::qs::QsOptions;

pub(crate) const METHOD: &str = "method";
pub(crate) const HEADERS: &str = "headers";
pub(crate) const DATA: &str = "data";
pub(crate) const QS: &str = "qs";
pub(crate) const QS_OPTIONS: &str = "qsOptions";

/// User-facing request configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(self, method: Method) -> Self {
        self.set(METHOD, method.as_str())
    }

    /// Add a header. A `null` value removes the header from the final
    /// request, including the injected `Content-Type`.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let headers = self
            .0
            .entry(HEADERS)
            .or_insert_with(|| Value::Object(Map::new()));
        if !headers.is_object() {
            *headers = Value::Object(Map::new());
        }
        if let Value::Object(map) = headers {
            map.insert(name.into(), value.into());
        }
        self
    }

    pub fn data(self, data: impl Into<Value>) -> Self {
        self.set(DATA, data)
    }

    pub fn qs(self, qs: QsOptions) -> Self {
        self.set(QS, qs)
    }

    /// Set an arbitrary key; unrecognized keys reach the transport verbatim.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Deep-merge `source` into `self`; `source` wins on conflicts.
    pub fn merge(&mut self, source: &Options) {
        merge_map(&mut self.0, &source.0);
    }

    /// Fold `layers` lowest-precedence first into a fresh object.
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a Options>) -> Options {
        let mut out = Options::new();
        for layer in layers {
            out.merge(layer);
        }
        out
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Options(map)
    }
}

impl TryFrom<Value> for Options {
    type Error = AdapterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Options(map)),
            Value::Null => Ok(Options::new()),
            other => Err(AdapterError::InvalidOptions(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

/// Recursive merge of JSON objects.
///
/// Nested objects merge key by key. Any other source value, `null` and
/// arrays included, replaces the target value. Keys absent from `source`
/// are left alone.
pub fn merge_map(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(t)), Value::Object(s)) => merge_map(t, s),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
