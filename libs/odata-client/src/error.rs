use thiserror::Error;

use crate::request::FetchError;

/// Upper bound on the response body kept in [`Error::HttpStatus`].
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Errors raised while building, sending or parsing an `OData` request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The query or URI could not be built
    #[error(transparent)]
    Query(#[from] odata_query::Error),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    Request(#[from] http::Error),

    /// The transport failed before a response arrived
    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: http::StatusCode,
        body: String,
        content_type: Option<String>,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A `$count` response that is not an integer
    #[error("expected an integer response, got '{0}'")]
    InvalidInteger(String),

    #[error("response body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
