//! Option builder: merged options in, transport-ready `HttpRequest` out.
//!
//! # Design
//! `build_request` is pure. It reads the recognized keys (`method`,
//! `headers`, `data`, `qs`/`qsOptions`) and forwards everything else in
//! `HttpRequest::extra`. GET and HEAD move `data` into the query string and
//! never carry a body; every other method sends `data` as JSON text with a
//! `Content-Type: application/json` base header the caller may override.

use serde_json::{Map, Value};

use crate::error::AdapterError;
use crate::http::{Headers, HttpRequest, Method};
use crate::options::{merge_map, Options, DATA, HEADERS, METHOD, QS, QS_OPTIONS};
use crate::qs::{self, QsOptions};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";

const RESERVED: [&str; 5] = [METHOD, HEADERS, DATA, QS, QS_OPTIONS];

/// Build the request descriptor for `url` from fully merged `options`.
///
/// A missing `method` means GET. `data` that is absent or `null` produces no
/// body and no injected content type.
pub fn build_request(url: &str, options: Options) -> Result<HttpRequest, AdapterError> {
    let method = method_of(&options)?;
    let (url, options) = if method.uses_query_data() {
        prepare(url, options)?
    } else {
        (url.to_string(), options)
    };

    let data = options.get(DATA).filter(|d| !d.is_null());
    let headers = build_headers(options.get(HEADERS), data.is_some())?;
    let body = data
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AdapterError::Serialization(e.to_string()))?;

    let extra: Map<String, Value> = options
        .as_map()
        .iter()
        .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(HttpRequest {
        url,
        method,
        headers,
        body,
        extra,
    })
}

/// Resolve the `method` option; absent or `null` means GET.
pub fn method_of(options: &Options) -> Result<Method, AdapterError> {
    match options.get(METHOD) {
        None | Some(Value::Null) => Ok(Method::Get),
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(AdapterError::InvalidMethod(other.to_string())),
    }
}

/// Read `qs` then `qsOptions` (later wins) into serializer settings.
pub fn qs_options_of(options: &Options) -> Result<QsOptions, AdapterError> {
    let mut raw = Map::new();
    for key in [QS, QS_OPTIONS] {
        match options.get(key) {
            Some(Value::Object(map)) => merge_map(&mut raw, map),
            None | Some(Value::Null) => {}
            Some(other) => {
                return Err(AdapterError::InvalidOptions(format!(
                    "`{key}` must be an object, got {other}"
                )))
            }
        }
    }
    serde_json::from_value(Value::Object(raw))
        .map_err(|e| AdapterError::InvalidOptions(format!("query options: {e}")))
}

/// GET/HEAD preparation: move `data` into the query string of `url` and
/// return the options without `data`, `qs` and `qsOptions`.
pub fn prepare(url: &str, mut options: Options) -> Result<(String, Options), AdapterError> {
    let qs_options = qs_options_of(&options)?;
    let data = options.remove(DATA);
    options.remove(QS);
    options.remove(QS_OPTIONS);

    let encoded = match data {
        Some(data) if !data.is_null() => qs::stringify(&data, &qs_options),
        _ => String::new(),
    };
    if encoded.is_empty() {
        return Ok((url.to_string(), options));
    }
    let joiner = if url.contains('?') { '&' } else { '?' };
    Ok((format!("{url}{joiner}{encoded}"), options))
}

fn build_headers(raw: Option<&Value>, has_data: bool) -> Result<Headers, AdapterError> {
    let mut headers = Headers::new();
    let mut removed: Vec<&str> = Vec::new();

    match raw {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                match value {
                    Value::Null => removed.push(name),
                    Value::Array(items) => {
                        for item in items {
                            headers.append(name.clone(), header_text(item));
                        }
                    }
                    other => headers.append(name.clone(), header_text(other)),
                }
            }
        }
        Some(other) => {
            return Err(AdapterError::InvalidOptions(format!(
                "`headers` must be an object, got {other}"
            )))
        }
    }

    if has_data {
        headers.set_base(CONTENT_TYPE, APPLICATION_JSON);
    }
    for name in removed {
        headers.remove(name);
    }
    Ok(headers)
}

fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
