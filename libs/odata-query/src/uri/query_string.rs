use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use super::Accept;
use crate::types::TypeRef;

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes a query value or path segment the way `encodeURIComponent` does.
#[must_use]
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// `k1=v1&k2=v2` with values percent-encoded when `url_encode` is set.
#[must_use]
pub fn build_query(query: &[(String, String)], url_encode: bool) -> String {
    query
        .iter()
        .map(|(k, v)| {
            if url_encode {
                format!("{k}={}", encode_component(v))
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Components of a finished request URI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ODataUriParts {
    pub uri_root: String,
    pub entity_set_container_name: Option<String>,
    pub entity_set_name: Option<String>,
    pub relative_path: String,
    /// Query-string pairs in insertion order; `@param` aliases come last.
    pub query: Vec<(String, String)>,
}

impl ODataUriParts {
    /// Root, `/`-normalized relative path and the query string.
    #[must_use]
    pub fn to_uri(&self, url_encode: bool) -> String {
        let root = self.uri_root.trim_end_matches('/');
        let path = self.relative_path.trim_start_matches('/');
        let mut uri = format!("{root}/{path}");
        if !self.query.is_empty() {
            uri.push('?');
            uri.push_str(&build_query(&self.query, url_encode));
        }
        uri
    }

    #[must_use]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A materialized request: URI parts plus what the response will contain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UriWithMetadata {
    pub accept: Accept,
    pub type_ref: TypeRef,
    pub parts: ODataUriParts,
}

impl UriWithMetadata {
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.parts.relative_path
    }

    #[must_use]
    pub fn query_string(&self, url_encode: bool) -> String {
        build_query(&self.parts.query, url_encode)
    }

    #[must_use]
    pub fn to_uri(&self, url_encode: bool) -> String {
        self.parts.to_uri(url_encode)
    }
}
