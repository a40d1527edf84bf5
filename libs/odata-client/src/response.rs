//! Response parsing: the interceptor chain and the content-type based default.

use bytes::Bytes;
use http::Response;
use odata_query::Accept;
use serde::de::DeserializeOwned;

use crate::error::{ERROR_BODY_PREVIEW_LIMIT, Error, Result};
use crate::request::ResponseInterceptor;

/// Parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ODataBody {
    Json(serde_json::Value),
    Integer(i64),
    Text(String),
}

impl ODataBody {
    /// # Errors
    /// `Error::Json` when the body is not JSON of the requested shape.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            ODataBody::Json(v) => Ok(serde_json::from_value(v)?),
            ODataBody::Integer(i) => Ok(serde_json::from_value(i.into())?),
            ODataBody::Text(s) => Ok(serde_json::from_str(&s)?),
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ODataBody::Integer(i) => Some(*i),
            ODataBody::Json(v) => v.as_i64(),
            ODataBody::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ODataBody::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// What the request expected, handed to every response interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseContext {
    pub accept: Accept,
    pub ignore_warnings: bool,
}

/// `Accept` header value for an expected body kind.
#[must_use]
pub fn accept_header(accept: Accept) -> &'static str {
    match accept {
        Accept::Json | Accept::Integer => "application/json",
        Accept::Raw => "text/plain",
    }
}

/// Run `chain` in order; the library default parses when every interceptor defers.
///
/// # Errors
/// Whatever the interceptors or the default parser return.
pub fn run_chain(
    chain: &[ResponseInterceptor],
    response: &Response<Bytes>,
    ctx: &ParseContext,
) -> Result<ODataBody> {
    match chain.split_first() {
        Some((head, rest)) => head(response, ctx, &|r: &Response<Bytes>| run_chain(rest, r, ctx)),
        None => default_parser(response, ctx),
    }
}

/// Parse by content type: JSON, then an integer for `$count`, then text.
///
/// # Errors
/// `Error::HttpStatus` for non-2xx responses and parse errors otherwise.
pub fn default_parser(response: &Response<Bytes>, ctx: &ParseContext) -> Result<ODataBody> {
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.body();

    if !response.status().is_success() {
        let preview = &body[..body.len().min(ERROR_BODY_PREVIEW_LIMIT)];
        return Err(Error::HttpStatus {
            status: response.status(),
            body: String::from_utf8_lossy(preview).into_owned(),
            content_type,
        });
    }

    let is_json = content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("json"));
    // `$count` servers answer with either a JSON number or plain text.
    let mismatch = match ctx.accept {
        Accept::Json => !is_json,
        Accept::Raw => is_json,
        Accept::Integer => false,
    };
    if !ctx.ignore_warnings && mismatch {
        tracing::warn!(
            target: "odata_client::response",
            expected = accept_header(ctx.accept),
            content_type = content_type.as_deref().unwrap_or("<none>"),
            "response content type does not match the requested accept type"
        );
    }

    if is_json {
        let json: serde_json::Value = serde_json::from_slice(body)?;
        if ctx.accept == Accept::Integer {
            return json
                .as_i64()
                .map(ODataBody::Integer)
                .ok_or_else(|| Error::InvalidInteger(json.to_string()));
        }
        return Ok(ODataBody::Json(json));
    }
    let text = String::from_utf8(body.to_vec())?;
    if ctx.accept == Accept::Integer {
        let trimmed = text.trim();
        return trimmed
            .parse::<i64>()
            .map(ODataBody::Integer)
            .map_err(|_| Error::InvalidInteger(trimmed.to_owned()));
    }
    Ok(ODataBody::Text(text))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::request::ResponseNext;

    fn interceptor(
        f: impl Fn(&Response<Bytes>, &ParseContext, ResponseNext<'_>) -> Result<ODataBody>
        + Send
        + Sync
        + 'static,
    ) -> ResponseInterceptor {
        Arc::new(f)
    }

    fn response(status: u16, content_type: &str, body: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    fn ctx(accept: Accept) -> ParseContext {
        ParseContext {
            accept,
            ignore_warnings: false,
        }
    }

    #[test]
    fn json_integer_and_text_bodies() {
        let json = default_parser(
            &response(200, "application/json; odata.metadata=minimal", r#"{"Id":"abc"}"#),
            &ctx(Accept::Json),
        )
        .unwrap();
        assert_eq!(json, ODataBody::Json(serde_json::json!({ "Id": "abc" })));

        let count = default_parser(&response(200, "text/plain", "42\n"), &ctx(Accept::Integer));
        assert_eq!(count.unwrap().as_integer(), Some(42));

        let raw = default_parser(&response(200, "text/plain", "Bob"), &ctx(Accept::Raw));
        assert_eq!(raw.unwrap().as_text(), Some("Bob"));
    }

    #[test]
    #[traced_test]
    fn counts_accept_json_numbers_and_plain_text() {
        assert_eq!(accept_header(Accept::Integer), "application/json");
        assert_eq!(accept_header(Accept::Json), "application/json");
        assert_eq!(accept_header(Accept::Raw), "text/plain");

        let count = default_parser(&response(200, "application/json", "17"), &ctx(Accept::Integer));
        assert_eq!(count.unwrap(), ODataBody::Integer(17));
        let text = default_parser(&response(200, "text/plain", "5"), &ctx(Accept::Integer));
        assert_eq!(text.unwrap(), ODataBody::Integer(5));
        assert!(!logs_contain("does not match"));

        let err = default_parser(&response(200, "application/json", r#""x""#), &ctx(Accept::Integer))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInteger(ref s) if s == r#""x""#));
    }

    #[test]
    fn non_integer_count_is_an_error() {
        let err = default_parser(&response(200, "text/plain", "many"), &ctx(Accept::Integer))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInteger(ref s) if s == "many"));
    }

    #[test]
    fn error_status_keeps_the_body() {
        let err = default_parser(&response(404, "text/plain", "gone"), &ctx(Accept::Json))
            .unwrap_err();
        match err {
            Error::HttpStatus { status, body, content_type } => {
                assert_eq!(status, http::StatusCode::NOT_FOUND);
                assert_eq!(body, "gone");
                assert_eq!(content_type.as_deref(), Some("text/plain"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    #[traced_test]
    fn content_type_mismatch_is_logged() {
        let body = default_parser(&response(200, "text/plain", "hello"), &ctx(Accept::Json));
        assert_eq!(body.unwrap().as_text(), Some("hello"));
        assert!(logs_contain("does not match the requested accept type"));
    }

    #[test]
    #[traced_test]
    fn mismatch_warning_can_be_silenced() {
        let quiet = ParseContext {
            accept: Accept::Json,
            ignore_warnings: true,
        };
        default_parser(&response(200, "text/plain", "hello"), &quiet).unwrap();
        assert!(!logs_contain("does not match"));
    }

    #[test]
    fn interceptors_run_in_order_and_may_defer() {
        let upper = interceptor(|r, _, next| match next(r)? {
            ODataBody::Text(t) => Ok(ODataBody::Text(t.to_uppercase())),
            other => Ok(other),
        });
        let fixed = interceptor(|_, _, _| Ok(ODataBody::Text("fixed".to_owned())));
        let r = response(200, "text/plain", "abc");

        let deferred = run_chain(&[Arc::clone(&upper)], &r, &ctx(Accept::Raw)).unwrap();
        assert_eq!(deferred.as_text(), Some("ABC"));

        let replaced = run_chain(&[upper, fixed], &r, &ctx(Accept::Raw)).unwrap();
        assert_eq!(replaced.as_text(), Some("FIXED"));
    }
}
