//! Type references shared by the schema, query objects and the expression model.
//!
//! A [`TypeRef`] is either a single named type (`Edm.String`, `My.Ns.User`) or a
//! collection of another type reference. Collections of collections can be
//! represented but most operations reject them with [`Error::NestedCollection`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Namespace of the OData primitive types.
pub const EDM_NAMESPACE: &str = "Edm";

/// Namespace of the sentinel type for values that are already valid OData literals.
pub const RAW_NAMESPACE: &str = "$raw";

/// Namespace of the pseudo types used by root symbols of custom query parameters.
pub const CUSTOM_NAMESPACE: &str = "$custom";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeRef {
    Single { namespace: String, name: String },
    Collection { element: Box<TypeRef> },
}

impl TypeRef {
    #[must_use]
    pub fn single(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef::Single {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn edm(name: &str) -> Self {
        Self::single(EDM_NAMESPACE, name)
    }

    #[must_use]
    pub fn collection(element: TypeRef) -> Self {
        TypeRef::Collection {
            element: Box::new(element),
        }
    }

    /// Type of values that are already serialized OData literals.
    #[must_use]
    pub fn raw() -> Self {
        Self::single(RAW_NAMESPACE, "Literal")
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self, TypeRef::Collection { .. })
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, TypeRef::Single { namespace, .. } if namespace == RAW_NAMESPACE)
    }

    #[must_use]
    pub fn is_edm(&self) -> bool {
        matches!(self, TypeRef::Single { namespace, .. } if namespace == EDM_NAMESPACE)
    }

    /// Whether this is one of the integral EDM kinds.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        match self {
            TypeRef::Single { namespace, name } if namespace == EDM_NAMESPACE => matches!(
                name.as_str(),
                "Byte" | "SByte" | "Int16" | "Int32" | "Int64"
            ),
            _ => false,
        }
    }

    /// Whether this is one of the numeric EDM kinds.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                TypeRef::Single { namespace, name }
                    if namespace == EDM_NAMESPACE
                        && matches!(name.as_str(), "Double" | "Single" | "Decimal")
            )
    }

    /// Number of collection wrappers around the innermost single type.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            TypeRef::Single { .. } => 0,
            TypeRef::Collection { element } => 1 + element.depth(),
        }
    }

    /// Innermost single type with all collection wrappers stripped.
    #[must_use]
    pub fn innermost(&self) -> &TypeRef {
        match self {
            TypeRef::Single { .. } => self,
            TypeRef::Collection { element } => element.innermost(),
        }
    }

    /// Wrap `self` in `depth` collection layers.
    #[must_use]
    pub fn wrap(self, depth: usize) -> TypeRef {
        (0..depth).fold(self, |acc, _| TypeRef::collection(acc))
    }

    /// Element type of a collection of depth one.
    ///
    /// # Errors
    /// Returns `Error::NestedCollection` for collections of collections and
    /// `Error::CannotTraverse` for single types.
    pub fn element(&self) -> Result<&TypeRef> {
        match self {
            TypeRef::Collection { element } if element.is_collection() => {
                Err(Error::NestedCollection(self.to_string()))
            }
            TypeRef::Collection { element } => Ok(element),
            TypeRef::Single { .. } => Err(Error::CannotTraverse {
                type_name: self.to_string(),
                reason: "not a collection".to_owned(),
            }),
        }
    }

    /// Namespace and name of a single type.
    #[must_use]
    pub fn as_single(&self) -> Option<(&str, &str)> {
        match self {
            TypeRef::Single { namespace, name } => Some((namespace, name)),
            TypeRef::Collection { .. } => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Single { namespace, name } => write!(f, "{namespace}.{name}"),
            TypeRef::Collection { element } => write!(f, "Collection({element})"),
        }
    }
}

/// EDM primitive names accepted by `OutputType` rewrites and numeric inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputType {
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Boolean,
}

impl OutputType {
    #[must_use]
    pub fn edm_name(self) -> &'static str {
        match self {
            OutputType::Byte => "Byte",
            OutputType::SByte => "SByte",
            OutputType::Int16 => "Int16",
            OutputType::Int32 => "Int32",
            OutputType::Int64 => "Int64",
            OutputType::Single => "Single",
            OutputType::Double => "Double",
            OutputType::Decimal => "Decimal",
            OutputType::String => "String",
            OutputType::Boolean => "Boolean",
        }
    }

    #[must_use]
    pub fn type_ref(self) -> TypeRef {
        TypeRef::edm(self.edm_name())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn display_qualifies_names() {
        let t = TypeRef::collection(TypeRef::single("My.Ns", "User"));
        assert_eq!(t.to_string(), "Collection(My.Ns.User)");
    }

    #[test]
    fn depth_and_wrap_are_inverse() {
        let inner = TypeRef::edm("Int32");
        let wrapped = inner.clone().wrap(2);
        assert_eq!(wrapped.depth(), 2);
        assert_eq!(wrapped.innermost(), &inner);
    }

    #[test]
    fn element_rejects_nested_collections() {
        let nested = TypeRef::edm("String").wrap(2);
        assert!(matches!(nested.element(), Err(Error::NestedCollection(_))));
        assert!(TypeRef::edm("String").element().is_err());
    }

    #[test]
    fn integer_kinds() {
        assert!(TypeRef::edm("Int32").is_integer());
        assert!(!TypeRef::edm("Double").is_integer());
        assert!(TypeRef::edm("Double").is_numeric());
        assert!(!TypeRef::single("Other", "Int32").is_integer());
    }
}
