//! Typed handles for building query expressions against a schema type.
//!
//! A [`QueryObject`] exposes a finite capability set per kind: complex
//! objects have properties and casts, collections have an element and
//! `$count`, primitives and enums are leaves. Every step returns a new value.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::{AtParam, Expression, ReturnType, RootSymbol};
use crate::schema::{Schema, TypeKind};
use crate::types::TypeRef;
use crate::uri::UriPart;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Property,
    Navigation,
    Cast,
    Count,
    Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub kind: SegmentKind,
    pub type_ref: TypeRef,
}

impl PathSegment {
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.kind == SegmentKind::Navigation
    }
}

#[derive(Clone, Debug)]
pub struct QueryMeta {
    pub type_ref: TypeRef,
    pub path: Vec<PathSegment>,
    pub root: RootSymbol,
    pub aliases: BTreeMap<String, Arc<AtParam>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryObjectKind {
    Primitive,
    Enum,
    Complex,
    Collection,
    /// The `$count` of a collection.
    Count,
    /// The `$value` of a primitive or enum.
    Value,
}

#[derive(Clone, Debug)]
pub struct QueryObject {
    schema: Arc<Schema>,
    meta: QueryMeta,
    kind: QueryObjectKind,
}

impl QueryObject {
    /// Query object for `type_ref` anchored at `root`.
    ///
    /// Complex types have their full property set validated here; the
    /// property objects themselves are built on access.
    ///
    /// # Errors
    /// `Error::UnknownType`, `Error::NestedCollection` or a property error
    /// from the base-type chain.
    pub fn new(schema: Arc<Schema>, type_ref: TypeRef, root: RootSymbol) -> Result<Self> {
        let kind = Self::classify(&schema, &type_ref)?;
        Ok(Self {
            schema,
            meta: QueryMeta {
                type_ref,
                path: Vec::new(),
                root,
                aliases: BTreeMap::new(),
            },
            kind,
        })
    }

    fn classify(schema: &Schema, type_ref: &TypeRef) -> Result<QueryObjectKind> {
        if type_ref.depth() > 1 {
            return Err(Error::NestedCollection(type_ref.to_string()));
        }
        if let TypeRef::Collection { element } = type_ref {
            Self::classify(schema, element)?;
            return Ok(QueryObjectKind::Collection);
        }
        Ok(match schema.kind(type_ref)? {
            TypeKind::Primitive | TypeKind::Raw => QueryObjectKind::Primitive,
            TypeKind::Enum(_) => QueryObjectKind::Enum,
            TypeKind::Complex(c) => {
                for (_, property) in schema.properties(c)? {
                    schema.kind(property.type_ref.innermost())?;
                }
                QueryObjectKind::Complex
            }
        })
    }

    fn step(&self, segment: PathSegment, kind: QueryObjectKind) -> Self {
        let mut meta = self.meta.clone();
        meta.type_ref = segment.type_ref.clone();
        meta.path.push(segment);
        Self {
            schema: Arc::clone(&self.schema),
            meta,
            kind,
        }
    }

    fn cannot_traverse(&self, what: &str) -> Error {
        let reason = match self.kind {
            QueryObjectKind::Primitive | QueryObjectKind::Enum => "cannot traverse a primitive type",
            QueryObjectKind::Count => "cannot traverse a $count",
            QueryObjectKind::Value => "cannot traverse a $value",
            QueryObjectKind::Complex | QueryObjectKind::Collection => "operation not available",
        };
        Error::CannotTraverse {
            type_name: self.meta.type_ref.to_string(),
            reason: format!("{reason} ({what})"),
        }
    }

    #[must_use]
    pub fn kind(&self) -> QueryObjectKind {
        self.kind
    }

    #[must_use]
    pub fn meta(&self) -> &QueryMeta {
        &self.meta
    }

    #[must_use]
    pub fn type_ref(&self) -> &TypeRef {
        &self.meta.type_ref
    }

    #[must_use]
    pub fn path(&self) -> &[PathSegment] {
        &self.meta.path
    }

    #[must_use]
    pub fn root(&self) -> &RootSymbol {
        &self.meta.root
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Names of every property, inherited ones included.
    ///
    /// # Errors
    /// `Error::CannotTraverse` unless this is a complex object.
    pub fn property_names(&self) -> Result<Vec<String>> {
        if self.kind != QueryObjectKind::Complex {
            return Err(self.cannot_traverse("properties"));
        }
        let ty = self.schema.complex(&self.meta.type_ref)?;
        Ok(self
            .schema
            .properties(ty)?
            .into_iter()
            .map(|(name, _)| name.to_owned())
            .collect())
    }

    /// # Errors
    /// `Error::UnknownProperty` for undeclared names, `Error::PropertyNotAllowed`
    /// on collections and `Error::CannotTraverse` on leaves.
    pub fn property(&self, name: &str) -> Result<QueryObject> {
        match self.kind {
            QueryObjectKind::Complex => {}
            QueryObjectKind::Collection => {
                return Err(Error::PropertyNotAllowed {
                    type_name: self.meta.type_ref.to_string(),
                    property: name.to_owned(),
                    reason: "collections only expose their element and $count".to_owned(),
                });
            }
            _ => return Err(self.cannot_traverse(name)),
        }
        let ty = self.schema.complex(&self.meta.type_ref)?;
        let property = self.schema.property(ty, name)?;
        let kind = Self::classify(&self.schema, &property.type_ref)?;
        let segment = PathSegment {
            name: name.to_owned(),
            kind: if property.navigation {
                SegmentKind::Navigation
            } else {
                SegmentKind::Property
            },
            type_ref: property.type_ref.clone(),
        };
        Ok(self.step(segment, kind))
    }

    /// Element of a collection, anchored at a new root named `variable`.
    ///
    /// # Errors
    /// `Error::CannotTraverse` unless this is a collection.
    pub fn element(&self, variable: &str) -> Result<QueryObject> {
        if self.kind != QueryObjectKind::Collection {
            return Err(self.cannot_traverse("element"));
        }
        let element = self.meta.type_ref.element()?.clone();
        let mut object = Self::new(
            Arc::clone(&self.schema),
            element.clone(),
            RootSymbol::new(variable, element),
        )?;
        object.meta.aliases = self.meta.aliases.clone();
        Ok(object)
    }

    /// The `$count` pseudo-property, typed `Edm.Int64`.
    ///
    /// # Errors
    /// `Error::CannotTraverse` unless this is a collection.
    pub fn count(&self) -> Result<QueryObject> {
        if self.kind != QueryObjectKind::Collection {
            return Err(self.cannot_traverse("$count"));
        }
        Ok(self.step(
            PathSegment {
                name: "$count".to_owned(),
                kind: SegmentKind::Count,
                type_ref: TypeRef::edm("Int64"),
            },
            QueryObjectKind::Count,
        ))
    }

    /// The raw `$value` of a primitive or enum.
    ///
    /// # Errors
    /// `Error::CannotTraverse` for anything else.
    pub fn value(&self) -> Result<QueryObject> {
        if !matches!(self.kind, QueryObjectKind::Primitive | QueryObjectKind::Enum) {
            return Err(self.cannot_traverse("$value"));
        }
        Ok(self.step(
            PathSegment {
                name: "$value".to_owned(),
                kind: SegmentKind::Value,
                type_ref: TypeRef::edm("String"),
            },
            QueryObjectKind::Value,
        ))
    }

    /// Caster names of the derived types reachable from this object.
    ///
    /// # Errors
    /// `Error::CannotTraverse` unless this is a complex object or a collection of one.
    pub fn casters(&self) -> Result<BTreeMap<String, TypeRef>> {
        let ty = self.cast_base()?;
        Ok(self.schema.casters(ty))
    }

    /// Cast to a derived type by caster name or fully qualified name; a
    /// collection stays a collection.
    ///
    /// # Errors
    /// `Error::UnknownCast` for unknown targets, `Error::NestedCollection` for
    /// collections of collections.
    pub fn cast(&self, target: &str) -> Result<QueryObject> {
        let base = self.cast_base()?;
        let derived = self.schema.resolve_cast(base, target)?;
        let type_ref = derived.clone().wrap(self.meta.type_ref.depth());
        let kind = Self::classify(&self.schema, &type_ref)?;
        Ok(self.step(
            PathSegment {
                name: derived.to_string(),
                kind: SegmentKind::Cast,
                type_ref,
            },
            kind,
        ))
    }

    fn cast_base(&self) -> Result<&crate::schema::ComplexType> {
        if self.meta.type_ref.depth() > 1 {
            return Err(Error::NestedCollection(self.meta.type_ref.to_string()));
        }
        match self.kind {
            QueryObjectKind::Complex | QueryObjectKind::Collection => {
                self.schema.complex(self.meta.type_ref.innermost())
            }
            _ => Err(self.cannot_traverse("cast")),
        }
    }

    /// Same object relative to another root context.
    #[must_use]
    pub fn re_context(&self, context: &str) -> QueryObject {
        let mut object = self.clone();
        object.meta.root = self.meta.root.with_context(context);
        object
    }

    /// Make an `@param` alias available to expressions built from this object.
    #[must_use]
    pub fn with_alias(mut self, param: Arc<AtParam>) -> Self {
        self.meta
            .aliases
            .insert(param.name().trim_start_matches('@').to_owned(), param);
        self
    }

    /// Reference to a registered `@param` alias.
    ///
    /// # Errors
    /// `Error::InvalidQuery` if no alias has that name.
    pub fn alias(&self, name: &str) -> Result<Expression> {
        self.meta
            .aliases
            .get(name.trim_start_matches('@'))
            .map(|p| Expression::param(Arc::clone(p)))
            .ok_or_else(|| Error::InvalidQuery(format!("no @param alias named '{name}'")))
    }

    /// The property path as an expression rooted at this object's root symbol.
    #[must_use]
    pub fn as_expression(&self) -> Expression {
        self.meta.path.iter().fold(
            Expression::RootSymbol(self.meta.root.clone()),
            |parent, segment| Expression::Prop {
                parent: Some(Box::new(parent)),
                name: segment.name.clone(),
                return_type: ReturnType::Type(segment.type_ref.clone()),
            },
        )
    }

    /// URI path parts equivalent to the traversal so far.
    #[must_use]
    pub fn uri_parts(&self) -> Vec<UriPart> {
        self.meta
            .path
            .iter()
            .map(|segment| match segment.kind {
                SegmentKind::Property | SegmentKind::Navigation => {
                    UriPart::PropertyName(segment.name.clone())
                }
                SegmentKind::Cast => UriPart::Cast(segment.name.clone()),
                SegmentKind::Count => UriPart::Count,
                SegmentKind::Value => UriPart::Value,
            })
            .collect()
    }
}

impl From<&QueryObject> for Expression {
    fn from(object: &QueryObject) -> Self {
        object.as_expression()
    }
}

impl From<QueryObject> for Expression {
    fn from(object: QueryObject) -> Self {
        object.as_expression()
    }
}
