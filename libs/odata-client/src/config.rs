use serde::{Deserialize, Serialize};
use thiserror::Error;

use odata_query::{KeyStyle, UriOptions};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("client config must be an object")]
    InvalidStructure,
    #[error("missing 'uri_root' in client config")]
    MissingUriRoot,
    #[error("invalid client config: {source}")]
    InvalidConfig {
        #[source]
        source: serde_json::Error,
    },
}

/// Settings shared by every request of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Service root, e.g. `https://example.com/odata`
    pub uri_root: String,
    /// Percent-encode query values
    pub url_encode: bool,
    /// Default key form for `with_key`
    pub key_style: KeyStyle,
    /// Suppress non-fatal warnings
    pub ignore_warnings: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri_root: String::new(),
            url_encode: true,
            key_style: KeyStyle::default(),
            ignore_warnings: false,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(uri_root: impl Into<String>) -> Self {
        Self {
            uri_root: uri_root.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON value; omitted fields take their defaults.
    ///
    /// # Errors
    /// `ConfigError::InvalidStructure` for non-objects, `ConfigError::InvalidConfig`
    /// for fields of the wrong type, `ConfigError::MissingUriRoot` when no root is set.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::InvalidStructure);
        }
        let config: Self = serde_json::from_value(value)
            .map_err(|source| ConfigError::InvalidConfig { source })?;
        if config.uri_root.trim().is_empty() {
            return Err(ConfigError::MissingUriRoot);
        }
        Ok(config)
    }

    #[must_use]
    pub fn uri_options(&self) -> UriOptions {
        UriOptions {
            url_encode: self.url_encode,
            ignore_warnings: self.ignore_warnings,
        }
    }
}
