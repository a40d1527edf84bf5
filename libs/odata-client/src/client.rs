//! Fluent request builder over one entity set.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use odata_query::{
    EntitySet, IT, KeySelection, KeyStyle, KeyValue, Query, QueryObject, RootSymbol, Schema,
    TypeRef, UriMapper, UriPart, UriPartStream, UriWithMetadata, Value,
};
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::request::{ODATA_VERSION_HEADER, RequestTools, ResponseInterceptor, ResponseNext};
use crate::response::{ODataBody, ParseContext, accept_header, run_chain};

struct ClientInner {
    config: ClientConfig,
    schema: Arc<Schema>,
    mapper: UriMapper,
    tools: RequestTools,
}

impl ClientInner {
    fn ignore_warnings(&self) -> bool {
        self.config.ignore_warnings || self.tools.ignore_warnings
    }
}

/// Entry point: a schema, a service root and the caller's transport.
#[derive(Clone)]
pub struct ODataClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ODataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ODataClient")
            .field("config", &self.inner.config)
            .field("tools", &self.inner.tools)
            .finish_non_exhaustive()
    }
}

impl ODataClient {
    #[must_use]
    pub fn new(config: ClientConfig, schema: Arc<Schema>, tools: RequestTools) -> Self {
        let mut options = config.uri_options();
        options.ignore_warnings = config.ignore_warnings || tools.ignore_warnings;
        let mapper = UriMapper::new(Arc::clone(&schema)).with_options(options);
        Self {
            inner: Arc::new(ClientInner {
                config,
                schema,
                mapper,
                tools,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Requests rooted at `set`.
    ///
    /// # Errors
    /// Schema errors when the entity set references unknown types.
    pub fn entity_set(&self, set: Arc<EntitySet>) -> Result<EntitySetClient> {
        set.validate(&self.inner.schema)?;
        let stream = UriPartStream::new().push(UriPart::EntitySetName(Arc::clone(&set)))?;
        Ok(EntitySetClient {
            inner: Arc::clone(&self.inner),
            set,
            stream,
            response_interceptor: None,
        })
    }
}

/// One request under construction. Every step returns a new value and is
/// validated against the schema immediately.
#[derive(Clone)]
pub struct EntitySetClient {
    inner: Arc<ClientInner>,
    set: Arc<EntitySet>,
    stream: UriPartStream,
    response_interceptor: Option<ResponseInterceptor>,
}

impl fmt::Debug for EntitySetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySetClient")
            .field("entity_set", &self.set.name)
            .field("parts", &self.stream.parts().len())
            .finish_non_exhaustive()
    }
}

impl EntitySetClient {
    fn push(&self, part: UriPart) -> Result<Self> {
        let next = Self {
            stream: self.stream.push(part)?,
            ..self.clone()
        };
        next.uri_with_metadata()?;
        Ok(next)
    }

    #[must_use]
    pub fn entity_set(&self) -> &Arc<EntitySet> {
        &self.set
    }

    #[must_use]
    pub fn parts(&self) -> &UriPartStream {
        &self.stream
    }

    /// Select one element by key, in the configured key style.
    ///
    /// # Errors
    /// `KeyNotAllowed`, `MissingKeyProperty` or `UnexpectedKeyProperty`.
    pub fn with_key(&self, key: KeyValue) -> Result<Self> {
        self.with_key_style(self.inner.config.key_style, key)
    }

    /// # Errors
    /// See [`EntitySetClient::with_key`].
    pub fn with_key_style(&self, style: KeyStyle, key: KeyValue) -> Result<Self> {
        self.push(UriPart::Key(KeySelection::new(style, key)))
    }

    /// Key written verbatim as `(<text>)`.
    ///
    /// # Errors
    /// `KeyNotAllowed` unless the path addresses a collection.
    pub fn with_raw_key(&self, text: impl Into<String>) -> Result<Self> {
        self.push(UriPart::Key(KeySelection::Raw(text.into())))
    }

    /// # Errors
    /// `UnknownProperty` or `PropertyNotAllowed`.
    pub fn property(&self, name: &str) -> Result<Self> {
        self.push(UriPart::PropertyName(name.to_owned()))
    }

    /// # Errors
    /// `CannotTraverse` unless the path addresses a collection.
    pub fn count(&self) -> Result<Self> {
        self.push(UriPart::Count)
    }

    /// # Errors
    /// `CannotTraverse` unless the path addresses a primitive or enum.
    pub fn value(&self) -> Result<Self> {
        self.push(UriPart::Value)
    }

    /// Cast to a derived type, by caster name or fully qualified name.
    ///
    /// # Errors
    /// `UnknownCast` when no derived type matches.
    pub fn cast(&self, target: &str) -> Result<Self> {
        self.push(UriPart::Cast(target.to_owned()))
    }

    /// Call a bound function; arguments are sent as `@param` aliases.
    ///
    /// # Errors
    /// `UnknownFunction`, `ArgumentCount` or serialization errors.
    pub fn function<I, K, V>(&self, name: &str, arguments: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.push(UriPart::Function {
            name: name.to_owned(),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Query object for the addressed element type (the element for collections).
    ///
    /// # Errors
    /// Any mapping error of the current path.
    pub fn query_object(&self) -> Result<QueryObject> {
        let meta = self.uri_with_metadata()?;
        let ty: TypeRef = match &meta.type_ref {
            TypeRef::Collection { element } => element.as_ref().clone(),
            single => single.clone(),
        };
        Ok(QueryObject::new(
            Arc::clone(&self.inner.schema),
            ty.clone(),
            RootSymbol::new(IT, ty),
        )?)
    }

    /// Add query-string clauses built against the addressed element.
    ///
    /// # Errors
    /// Errors from `build`, and `MultipleClauses` for repeated options.
    pub fn with_query(
        &self,
        build: impl FnOnce(&QueryObject) -> odata_query::Result<Vec<Query>>,
    ) -> Result<Self> {
        let object = self.query_object()?;
        self.push(UriPart::Query(build(&object)?))
    }

    /// Parser used for this entity set when the client-wide interceptor defers.
    #[must_use]
    pub fn with_response_interceptor(
        &self,
        f: impl Fn(&Response<Bytes>, &ParseContext, ResponseNext<'_>) -> Result<ODataBody>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            response_interceptor: Some(Arc::new(f)),
            ..self.clone()
        }
    }

    /// # Errors
    /// Any path, key or query error.
    pub fn uri_with_metadata(&self) -> Result<UriWithMetadata> {
        Ok(self
            .inner
            .mapper
            .map(&self.inner.config.uri_root, &self.stream)?)
    }

    /// Final request URI, through the URI interceptor when one is set.
    ///
    /// # Errors
    /// Any path, key or query error.
    pub fn uri(&self) -> Result<String> {
        let meta = self.uri_with_metadata()?;
        Ok(self
            .inner
            .tools
            .build_uri(&meta.parts, self.inner.config.url_encode))
    }

    /// The GET request that [`EntitySetClient::get`] would send.
    ///
    /// # Errors
    /// Mapping errors and `Error::Request` for URIs `http` cannot parse.
    pub fn request(&self) -> Result<(Request<()>, UriWithMetadata)> {
        let meta = self.uri_with_metadata()?;
        let uri = self
            .inner
            .tools
            .build_uri(&meta.parts, self.inner.config.url_encode);
        let mut request = Request::get(uri)
            .header(ODATA_VERSION_HEADER, "4")
            .header(http::header::ACCEPT, accept_header(meta.accept))
            .body(())?;
        if let Some(f) = &self.inner.tools.request_interceptor {
            f(&mut request);
        }
        Ok((request, meta))
    }

    /// Send the request and parse the response.
    ///
    /// # Errors
    /// Build errors, `Error::Fetch`, `Error::HttpStatus` and parse errors.
    pub async fn get(&self) -> Result<ODataBody> {
        let (request, meta) = self.request()?;
        tracing::debug!(
            target: "odata_client::request",
            method = %request.method(),
            uri = %request.uri(),
            entity_set = %self.set.name,
            "sending request"
        );
        let response = self.inner.tools.fetcher.fetch(request).await?;
        tracing::debug!(
            target: "odata_client::request",
            status = %response.status(),
            "received response"
        );
        let ctx = ParseContext {
            accept: meta.accept,
            ignore_warnings: self.inner.ignore_warnings(),
        };
        let chain: Vec<ResponseInterceptor> = self
            .inner
            .tools
            .response_interceptor
            .iter()
            .chain(self.response_interceptor.iter())
            .cloned()
            .collect();
        run_chain(&chain, &response, &ctx)
    }

    /// # Errors
    /// See [`EntitySetClient::get`]; `Error::Json` for bodies of another shape.
    pub async fn get_json<T: DeserializeOwned>(&self) -> Result<T> {
        self.get().await?.json()
    }

    /// Result of a `$count` request.
    ///
    /// # Errors
    /// See [`EntitySetClient::get`]; `Error::InvalidInteger` for non-numeric bodies.
    pub async fn get_count(&self) -> Result<i64> {
        match self.get().await? {
            ODataBody::Text(text) => Err(Error::InvalidInteger(text)),
            ODataBody::Integer(count) => Ok(count),
            ODataBody::Json(json) => json
                .as_i64()
                .ok_or_else(|| Error::InvalidInteger(json.to_string())),
        }
    }
}
