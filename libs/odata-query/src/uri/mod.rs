//! URI part stream and its materialization.
//!
//! A request is described as an append-only [`UriPartStream`]. [`UriMapper`]
//! folds the stream into a [`UriWithMetadata`], validating every part against
//! the type reached so far.

mod mapper;
mod query_string;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use mapper::UriMapper;
pub use query_string::{ODataUriParts, UriWithMetadata, build_query, encode_component};

use crate::dsl::Query;
use crate::entity_set::EntitySet;
use crate::error::{Error, Result};
use crate::value::Value;

/// Expected shape of the response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Accept {
    #[default]
    Json,
    /// `$count`
    Integer,
    /// `$value`
    Raw,
}

/// How a key is written into the path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStyle {
    /// `Users('abc')`
    #[default]
    FunctionCall,
    /// `Users/abc`
    PathSegment,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KeyValue {
    Single(Value),
    Composite(Vec<(String, Value)>),
}

impl KeyValue {
    #[must_use]
    pub fn single(value: impl Into<Value>) -> Self {
        KeyValue::Single(value.into())
    }

    #[must_use]
    pub fn composite<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        KeyValue::Composite(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum KeySelection {
    PathSegment(KeyValue),
    FunctionCall(KeyValue),
    /// Already-serialized key text, written as `(<text>)`.
    Raw(String),
}

impl KeySelection {
    #[must_use]
    pub fn new(style: KeyStyle, key: KeyValue) -> Self {
        match style {
            KeyStyle::FunctionCall => KeySelection::FunctionCall(key),
            KeyStyle::PathSegment => KeySelection::PathSegment(key),
        }
    }
}

#[derive(Clone, Debug)]
pub enum UriPart {
    EntityContainerName(String),
    EntitySetName(Arc<EntitySet>),
    Key(KeySelection),
    PropertyName(String),
    Count,
    Value,
    /// Derived type, by caster name or fully qualified name.
    Cast(String),
    /// Bound function; arguments travel as `@param` aliases.
    Function {
        name: String,
        arguments: Vec<(String, Value)>,
    },
    Query(Vec<Query>),
}

impl UriPart {
    fn describe(&self) -> String {
        match self {
            UriPart::EntityContainerName(name) => format!("container '{name}'"),
            UriPart::EntitySetName(set) => format!("entity set '{}'", set.name),
            UriPart::Key(_) => "a key".to_owned(),
            UriPart::PropertyName(name) => format!("property '{name}'"),
            UriPart::Count => "$count".to_owned(),
            UriPart::Value => "$value".to_owned(),
            UriPart::Cast(target) => format!("a cast to '{target}'"),
            UriPart::Function { name, .. } => format!("function '{name}'"),
            UriPart::Query(_) => "a query".to_owned(),
        }
    }
}

/// Ordered, append-only list of URI parts. Appending returns a new stream.
#[derive(Clone, Debug, Default)]
pub struct UriPartStream {
    parts: Vec<UriPart>,
}

impl UriPartStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Error::PartAfterQuery` when a path part follows a query.
    pub fn push(&self, part: UriPart) -> Result<Self> {
        if self.has_query() && !matches!(part, UriPart::Query(_)) {
            return Err(Error::PartAfterQuery {
                part: part.describe(),
            });
        }
        let mut parts = self.parts.clone();
        parts.push(part);
        Ok(Self { parts })
    }

    /// # Errors
    /// `Error::PartAfterQuery` when a path part follows a query.
    pub fn extend<I>(&self, parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = UriPart>,
    {
        parts
            .into_iter()
            .try_fold(self.clone(), |stream, part| stream.push(part))
    }

    #[must_use]
    pub fn parts(&self) -> &[UriPart] {
        &self.parts
    }

    #[must_use]
    pub fn has_query(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, UriPart::Query(_)))
    }
}

/// Switches for materialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UriOptions {
    pub url_encode: bool,
    pub ignore_warnings: bool,
}

impl Default for UriOptions {
    fn default() -> Self {
        Self {
            url_encode: true,
            ignore_warnings: false,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::dsl::filter;
    use crate::types::TypeRef;

    #[test]
    fn path_parts_cannot_follow_a_query() {
        let set = Arc::new(EntitySet::new("Default", "Users", TypeRef::single("Svc", "User")));
        let q = filter::eq(crate::dsl::lit(1), 1).unwrap();
        let stream = UriPartStream::new()
            .push(UriPart::EntitySetName(set))
            .unwrap()
            .push(UriPart::Query(vec![q.into()]))
            .unwrap();
        let err = stream.push(UriPart::Count).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot add $count after a query has been added"
        );
        assert!(stream.push(UriPart::Query(Vec::new())).is_ok());
        assert_eq!(stream.parts().len(), 2);
    }

    #[test]
    fn key_style_defaults_to_function_call() {
        assert_eq!(KeyStyle::default(), KeyStyle::FunctionCall);
        assert!(matches!(
            KeySelection::new(KeyStyle::PathSegment, KeyValue::single("a")),
            KeySelection::PathSegment(_)
        ));
    }
}
