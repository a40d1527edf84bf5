//! Transport seam and the interceptors applied around it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use odata_query::ODataUriParts;

use crate::error::Result;
use crate::response::{ODataBody, ParseContext};

/// Header carrying the protocol version on every request.
pub const ODATA_VERSION_HEADER: &str = "OData-Version";

/// Transport failure reported by a [`Fetch`] implementation.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Performs one HTTP exchange. Retries, timeouts and cancellation belong here.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request<()>) -> std::result::Result<Response<Bytes>, FetchError>;
}

/// Builds the final request URI from its parts; the flag is the configured `url_encode`.
pub type UriInterceptor = Arc<dyn Fn(&ODataUriParts, bool) -> String + Send + Sync>;

/// Last chance to adjust a request before it is handed to the transport.
pub type RequestInterceptor = Arc<dyn Fn(&mut Request<()>) + Send + Sync>;

/// The rest of a response interceptor chain.
pub type ResponseNext<'a> = &'a dyn Fn(&Response<Bytes>) -> Result<ODataBody>;

/// Parses a response, or defers to the next interceptor.
pub type ResponseInterceptor =
    Arc<dyn Fn(&Response<Bytes>, &ParseContext, ResponseNext<'_>) -> Result<ODataBody> + Send + Sync>;

/// Caller-supplied request machinery.
#[derive(Clone)]
pub struct RequestTools {
    pub(crate) fetcher: Arc<dyn Fetch>,
    pub(crate) uri_interceptor: Option<UriInterceptor>,
    pub(crate) request_interceptor: Option<RequestInterceptor>,
    pub(crate) response_interceptor: Option<ResponseInterceptor>,
    pub(crate) ignore_warnings: bool,
}

impl fmt::Debug for RequestTools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTools")
            .field("uri_interceptor", &self.uri_interceptor.is_some())
            .field("request_interceptor", &self.request_interceptor.is_some())
            .field("response_interceptor", &self.response_interceptor.is_some())
            .field("ignore_warnings", &self.ignore_warnings)
            .finish_non_exhaustive()
    }
}

impl RequestTools {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            uri_interceptor: None,
            request_interceptor: None,
            response_interceptor: None,
            ignore_warnings: false,
        }
    }

    #[must_use]
    pub fn uri_interceptor(
        mut self,
        f: impl Fn(&ODataUriParts, bool) -> String + Send + Sync + 'static,
    ) -> Self {
        self.uri_interceptor = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn request_interceptor(mut self, f: impl Fn(&mut Request<()>) + Send + Sync + 'static) -> Self {
        self.request_interceptor = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn response_interceptor(
        mut self,
        f: impl Fn(&Response<Bytes>, &ParseContext, ResponseNext<'_>) -> Result<ODataBody>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.response_interceptor = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn ignore_warnings(mut self, ignore: bool) -> Self {
        self.ignore_warnings = ignore;
        self
    }

    /// URI for `parts`, through the interceptor when one is set.
    #[must_use]
    pub fn build_uri(&self, parts: &ODataUriParts, url_encode: bool) -> String {
        match &self.uri_interceptor {
            Some(f) => f(parts, url_encode),
            None => parts.to_uri(url_encode),
        }
    }
}
