//! Adapter configuration loaded from JSON or the environment.

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::options::Options;

pub const URL_ROOT_ENV: &str = "FETCH_ADAPTER_URL_ROOT";
pub const DEFAULTS_ENV: &str = "FETCH_ADAPTER_DEFAULTS";

/// Process-wide settings applied through [`crate::AdapterBuilder::config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Prefix prepended verbatim to every request path.
    pub url_root: String,
    /// Lowest-precedence options layer, deep-merged into every request.
    pub defaults: Options,
}

impl AdapterConfig {
    /// Parse `{"urlRoot": "...", "defaults": {...}}`; both keys are optional.
    pub fn from_json(raw: &str) -> Result<Self, AdapterError> {
        serde_json::from_str(raw).map_err(|e| AdapterError::InvalidOptions(e.to_string()))
    }

    /// Read [`URL_ROOT_ENV`] and [`DEFAULTS_ENV`] (JSON object text).
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AdapterError> {
        let url_root = lookup(URL_ROOT_ENV).unwrap_or_default();
        let defaults = match lookup(DEFAULTS_ENV) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| AdapterError::InvalidOptions(format!("{DEFAULTS_ENV}: {e}")))?,
            _ => Options::new(),
        };
        Ok(Self { url_root, defaults })
    }
}
