//! Request execution against a recording transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use odata_client::odata_query::dsl::{filter, paging};
use odata_client::odata_query::{
    ComplexType, EntitySet, KeyStyle, KeyValue, Property, Schema, TypeRef, Value,
};
use odata_client::{
    ClientConfig, EntitySetClient, Error, Fetch, FetchError, ODataBody, ODataClient, RequestTools,
};

#[derive(Debug, Clone)]
struct Sent {
    uri: String,
    headers: http::HeaderMap,
}

struct Recorder {
    sent: Mutex<Vec<Sent>>,
    status: u16,
    content_type: &'static str,
    body: &'static str,
}

impl Recorder {
    fn new(status: u16, content_type: &'static str, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            status,
            content_type,
            body,
        })
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for Recorder {
    async fn fetch(&self, request: Request<()>) -> Result<Response<Bytes>, FetchError> {
        self.sent.lock().unwrap().push(Sent {
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
        });
        Response::builder()
            .status(self.status)
            .header(http::header::CONTENT_TYPE, self.content_type)
            .body(Bytes::from_static(self.body.as_bytes()))
            .map_err(|e| FetchError::with_source("bad canned response", e))
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .with_complex(
                ComplexType::new("Svc", "User")
                    .key(["Id"])
                    .property("Id", Property::new(TypeRef::edm("String")))
                    .property("Name", Property::new(TypeRef::edm("String")))
                    .property(
                        "Orders",
                        Property::new(TypeRef::collection(TypeRef::single("Svc", "Order")))
                            .navigation(),
                    ),
            )
            .with_complex(
                ComplexType::new("Svc", "Order")
                    .key(["Number"])
                    .property("Number", Property::new(TypeRef::edm("Int32"))),
            ),
    )
}

fn users(config: ClientConfig, tools: RequestTools) -> EntitySetClient {
    let set = Arc::new(EntitySet::new(
        "Default",
        "Users",
        TypeRef::single("Svc", "User"),
    ));
    ODataClient::new(config, schema(), tools)
        .entity_set(set)
        .unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::new("https://example.com/odata")
}

#[tokio::test]
async fn get_by_key_sends_odata_headers() {
    let fetch = Recorder::new(200, "application/json", r#"{"Id":"abc","Name":"Bob"}"#);
    let client = users(config(), RequestTools::new(fetch.clone()));

    let body = client
        .with_key(KeyValue::single("abc"))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(
        body,
        ODataBody::Json(serde_json::json!({ "Id": "abc", "Name": "Bob" }))
    );

    let sent = fetch.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].uri, "https://example.com/odata/Users('abc')");
    assert_eq!(sent[0].headers["OData-Version"], "4");
    assert_eq!(sent[0].headers[http::header::ACCEPT], "application/json");
}

#[tokio::test]
async fn count_is_parsed_as_an_integer() {
    let fetch = Recorder::new(200, "application/json", "3");
    let client = users(config(), RequestTools::new(fetch.clone()));

    let count = client
        .with_key(KeyValue::single("abc"))
        .unwrap()
        .property("Orders")
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(count.get_count().await.unwrap(), 3);

    let sent = fetch.sent();
    assert_eq!(
        sent[0].uri,
        "https://example.com/odata/Users('abc')/Orders/$count"
    );
    assert_eq!(sent[0].headers[http::header::ACCEPT], "application/json");
}

#[test]
fn uri_is_stable_and_encoded() {
    let client = users(config(), RequestTools::new(Recorder::new(200, "text/plain", "")))
        .with_query(|user| {
            Ok(vec![
                filter::eq(user.property("Name")?, "Bob")?.into(),
                paging::top(5)?.into(),
            ])
        })
        .unwrap();
    let first = client.uri().unwrap();
    assert_eq!(first, client.uri().unwrap());
    assert_eq!(
        first,
        "https://example.com/odata/Users?$filter=Name%20eq%20'Bob'&$top=5"
    );

    let plain = users(
        ClientConfig {
            url_encode: false,
            ..config()
        },
        RequestTools::new(Recorder::new(200, "text/plain", "")),
    )
    .with_query(|user| Ok(vec![filter::eq(user.property("Name")?, "Bob")?.into()]))
    .unwrap();
    assert_eq!(
        plain.uri().unwrap(),
        "https://example.com/odata/Users?$filter=Name eq 'Bob'"
    );
}

#[test]
fn configured_key_style_applies_to_with_key() {
    let client = users(
        ClientConfig {
            key_style: KeyStyle::PathSegment,
            ..config()
        },
        RequestTools::new(Recorder::new(200, "text/plain", "")),
    );
    let uri = client.with_key(KeyValue::single("abc")).unwrap().uri().unwrap();
    assert_eq!(uri, "https://example.com/odata/Users/abc");

    let slash = client.with_key(KeyValue::single("a/b")).unwrap().uri().unwrap();
    assert_eq!(slash, "https://example.com/odata/Users/a%2Fb");
}

#[tokio::test]
async fn keys_with_reserved_characters_are_sent_encoded() {
    let fetch = Recorder::new(200, "application/json", r#"{"Id":"John Smith"}"#);
    let client = users(config(), RequestTools::new(fetch.clone()));

    client
        .with_key(KeyValue::single("John Smith"))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(
        fetch.sent()[0].uri,
        "https://example.com/odata/Users('John%20Smith')"
    );
}

#[test]
fn invalid_steps_fail_immediately() {
    let client = users(config(), RequestTools::new(Recorder::new(200, "text/plain", "")));
    let keyed = client.with_key(KeyValue::single("abc")).unwrap();
    assert!(matches!(
        keyed.with_key(KeyValue::single("again")),
        Err(Error::Query(odata_client::odata_query::Error::KeyNotAllowed { .. }))
    ));
    assert!(matches!(
        keyed.property("Missing"),
        Err(Error::Query(odata_client::odata_query::Error::UnknownProperty { .. }))
    ));
    let twice = client
        .with_query(|_| Ok(vec![paging::top(1)?.into()]))
        .unwrap()
        .with_query(|_| Ok(vec![paging::top(2)?.into()]));
    assert!(matches!(
        twice,
        Err(Error::Query(odata_client::odata_query::Error::MultipleClauses { .. }))
    ));
}

#[tokio::test]
async fn interceptors_shape_request_and_response() {
    let fetch = Recorder::new(200, "text/plain", "ignored");
    let tools = RequestTools::new(fetch.clone())
        .request_interceptor(|req| {
            req.headers_mut().insert(
                http::header::AUTHORIZATION,
                http::HeaderValue::from_static("Bearer t"),
            );
        })
        .response_interceptor(|response, _, next| {
            if response.status().is_success() {
                next(response)
            } else {
                Ok(ODataBody::Text("fallback".to_owned()))
            }
        });
    let client = users(config(), tools).with_response_interceptor(|_, _, _| {
        Ok(ODataBody::Integer(7))
    });

    let body = client.get().await.unwrap();
    assert_eq!(body, ODataBody::Integer(7));
    assert_eq!(fetch.sent()[0].headers[http::header::AUTHORIZATION], "Bearer t");
}

#[tokio::test]
async fn error_status_is_reported_with_body() {
    let fetch = Recorder::new(404, "text/plain", "no such user");
    let client = users(config(), RequestTools::new(fetch));
    let err = client
        .with_key(KeyValue::single("nobody"))
        .unwrap()
        .get()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::HttpStatus { status, ref body, .. }
            if status == http::StatusCode::NOT_FOUND && body == "no such user"
    ));
}

#[test]
fn bound_functions_travel_as_aliases() {
    let user = TypeRef::single("Svc", "User");
    let set = Arc::new(
        EntitySet::new("Default", "Users", user.clone()).function(
            odata_client::odata_query::BoundFunction {
                namespace: "Svc".to_owned(),
                name: "Rank".to_owned(),
                binding: user,
                parameters: vec![odata_client::odata_query::FunctionParameter {
                    name: "scope".to_owned(),
                    type_ref: TypeRef::edm("String"),
                }],
                return_type: TypeRef::edm("Int32"),
            },
        ),
    );
    let client = ODataClient::new(
        config(),
        schema(),
        RequestTools::new(Recorder::new(200, "text/plain", "")),
    )
    .entity_set(set)
    .unwrap();
    let uri = client
        .with_key(KeyValue::single("abc"))
        .unwrap()
        .function("Rank", [("scope", Value::from("team"))])
        .unwrap()
        .uri()
        .unwrap();
    assert_eq!(
        uri,
        "https://example.com/odata/Users('abc')/Svc.Rank(scope=@scope)?@scope='team'"
    );
}
