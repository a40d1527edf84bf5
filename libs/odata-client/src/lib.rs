#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Request assembly and execution for typed `OData` v4 queries.
//!
//! The transport is supplied by the caller through [`Fetch`]; this crate adds
//! the `OData` headers, runs the interceptors and parses the response.

pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod response;

pub use client::{EntitySetClient, ODataClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{Error, Result};
pub use request::{
    Fetch, FetchError, ODATA_VERSION_HEADER, RequestInterceptor, RequestTools,
    ResponseInterceptor, ResponseNext, UriInterceptor,
};
pub use response::{ODataBody, ParseContext, accept_header, default_parser};

pub use odata_query;
