#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Typed OData v4 query construction.
//!
//! Schema types become [`QueryObject`]s, DSL calls are recorded as
//! [`Expression`] trees, special arguments are rewritten away, and the
//! [`UriMapper`] turns a [`UriPartStream`] into a relative path plus query
//! string. Nothing here performs I/O.

pub mod dsl;
pub mod entity_set;
pub mod error;
pub mod eval;
pub mod expr;
pub mod query_object;
pub mod rewrite;
pub mod schema;
pub mod signature;
pub mod types;
pub mod uri;
pub mod value;

pub use dsl::{IntoExpression, Query, lit};
pub use entity_set::{BoundFunction, EntitySet, FunctionParameter};
pub use error::{Error, Result};
pub use eval::{EvalScope, Evaluator, ParamSink};
pub use expr::{AtParam, AtParamPayload, Expression, IT, RootSymbol};
pub use query_object::{QueryObject, QueryObjectKind};
pub use rewrite::{Mapper, RewritePayload};
pub use schema::{ComplexType, EnumType, Property, Schema, SchemaType};
pub use signature::{FunctionSignature, FunctionSignatureContainer, QueryFamily, builtins};
pub use types::{OutputType, TypeRef};
pub use uri::{
    Accept, KeySelection, KeyStyle, KeyValue, ODataUriParts, UriMapper, UriOptions, UriPart,
    UriPartStream, UriWithMetadata,
};
pub use value::{DefaultSerializer, Value, ValueSerializer};
