//! Service schema: complex types, enums and the lookups built on them.
//!
//! The schema is produced once (usually deserialized from the JSON emitted by
//! the code generator) and is read-only afterwards. Every lookup re-validates
//! the reference it follows and fails with a named error instead of returning
//! nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{RAW_NAMESPACE, TypeRef};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub navigation: bool,
}

impl Property {
    #[must_use]
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            nullable: false,
            navigation: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn navigation(mut self) -> Self {
        self.navigation = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexType {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

impl ComplexType {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            base_type: None,
            key: None,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn base(mut self, base: TypeRef) -> Self {
        self.base_type = Some(base);
        self
    }

    #[must_use]
    pub fn key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    #[must_use]
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::single(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumType {
    pub namespace: String,
    pub name: String,
    pub members: BTreeMap<String, i64>,
    #[serde(default)]
    pub flags: bool,
}

impl EnumType {
    #[must_use]
    pub fn new<I, S>(namespace: impl Into<String>, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            members: members.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            flags: false,
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Integer value of a member.
    #[must_use]
    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.members.get(member).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SchemaType {
    Complex(ComplexType),
    Enum(EnumType),
}

impl SchemaType {
    fn namespace(&self) -> &str {
        match self {
            SchemaType::Complex(c) => &c.namespace,
            SchemaType::Enum(e) => &e.namespace,
        }
    }

    fn name(&self) -> &str {
        match self {
            SchemaType::Complex(c) => &c.name,
            SchemaType::Enum(e) => &e.name,
        }
    }
}

/// What a single type reference resolves to.
#[derive(Clone, Copy, Debug)]
pub enum TypeKind<'a> {
    Primitive,
    Raw,
    Complex(&'a ComplexType),
    Enum(&'a EnumType),
}

#[derive(Serialize, Deserialize)]
struct SchemaFile {
    types: Vec<SchemaType>,
}

/// Mapping of namespace → type name → complex type or enum.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaFile", into = "SchemaFile")]
pub struct Schema {
    namespaces: BTreeMap<String, BTreeMap<String, SchemaType>>,
}

impl TryFrom<SchemaFile> for Schema {
    type Error = Error;

    fn try_from(file: SchemaFile) -> Result<Self> {
        Schema::from_types(file.types)
    }
}

impl From<Schema> for SchemaFile {
    fn from(schema: Schema) -> Self {
        SchemaFile {
            types: schema
                .namespaces
                .into_values()
                .flat_map(BTreeMap::into_values)
                .collect(),
        }
    }
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a schema from a flat list of types.
    ///
    /// # Errors
    /// Returns the first resolution error found by [`Schema::validate`].
    pub fn from_types<I>(types: I) -> Result<Self>
    where
        I: IntoIterator<Item = SchemaType>,
    {
        let schema = types.into_iter().fold(Schema::new(), Schema::with_type);
        schema.validate()?;
        Ok(schema)
    }

    #[must_use]
    pub fn with_type(mut self, ty: SchemaType) -> Self {
        self.namespaces
            .entry(ty.namespace().to_owned())
            .or_default()
            .insert(ty.name().to_owned(), ty);
        self
    }

    #[must_use]
    pub fn with_complex(self, ty: ComplexType) -> Self {
        self.with_type(SchemaType::Complex(ty))
    }

    #[must_use]
    pub fn with_enum(self, ty: EnumType) -> Self {
        self.with_type(SchemaType::Enum(ty))
    }

    /// Check that every base type and property type resolves and that no
    /// property is declared twice along an inheritance chain.
    ///
    /// # Errors
    /// Returns the first unresolved or duplicated reference.
    pub fn validate(&self) -> Result<()> {
        for ty in self.complex_types() {
            for (_, property) in self.properties(ty)? {
                self.kind(property.type_ref.innermost())?;
            }
            if let Some(key) = &ty.key {
                for name in key {
                    self.property(ty, name)?;
                }
            }
        }
        Ok(())
    }

    pub fn complex_types(&self) -> impl Iterator<Item = &ComplexType> {
        self.namespaces
            .values()
            .flat_map(BTreeMap::values)
            .filter_map(|t| match t {
                SchemaType::Complex(c) => Some(c),
                SchemaType::Enum(_) => None,
            })
    }

    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<&SchemaType> {
        self.namespaces.get(namespace)?.get(name)
    }

    /// Resolve a single type reference.
    ///
    /// # Errors
    /// `Error::UnknownType` for unknown names, `Error::CannotTraverse` for collections.
    pub fn kind(&self, type_ref: &TypeRef) -> Result<TypeKind<'_>> {
        let (namespace, name) = type_ref.as_single().ok_or_else(|| Error::CannotTraverse {
            type_name: type_ref.to_string(),
            reason: "expected a single type, found a collection".to_owned(),
        })?;
        if type_ref.is_edm() {
            return Ok(TypeKind::Primitive);
        }
        if namespace == RAW_NAMESPACE {
            return Ok(TypeKind::Raw);
        }
        match self.get(namespace, name) {
            Some(SchemaType::Complex(c)) => Ok(TypeKind::Complex(c)),
            Some(SchemaType::Enum(e)) => Ok(TypeKind::Enum(e)),
            None => Err(Error::UnknownType(type_ref.to_string())),
        }
    }

    /// # Errors
    /// `Error::UnknownType` unless `type_ref` names a complex type.
    pub fn complex(&self, type_ref: &TypeRef) -> Result<&ComplexType> {
        match self.kind(type_ref)? {
            TypeKind::Complex(c) => Ok(c),
            _ => Err(Error::UnknownType(type_ref.to_string())),
        }
    }

    /// # Errors
    /// `Error::UnknownType` unless `type_ref` names an enum.
    pub fn enum_type(&self, type_ref: &TypeRef) -> Result<&EnumType> {
        match self.kind(type_ref)? {
            TypeKind::Enum(e) => Ok(e),
            _ => Err(Error::UnknownType(type_ref.to_string())),
        }
    }

    /// `ty` followed by its base types, nearest first.
    ///
    /// # Errors
    /// `Error::UnknownBaseType` for unresolved or cyclic base references.
    pub fn base_chain<'a>(&'a self, ty: &'a ComplexType) -> Result<Vec<&'a ComplexType>> {
        let mut chain = vec![ty];
        let mut seen = BTreeSet::from([ty.full_name()]);
        let mut current = ty;
        while let Some(base) = &current.base_type {
            let next = self.complex(base).map_err(|_| Error::UnknownBaseType {
                type_name: current.full_name(),
                base: base.to_string(),
            })?;
            if !seen.insert(next.full_name()) {
                return Err(Error::UnknownBaseType {
                    type_name: current.full_name(),
                    base: base.to_string(),
                });
            }
            chain.push(next);
            current = next;
        }
        Ok(chain)
    }

    /// All properties of `ty`, inherited ones included.
    ///
    /// # Errors
    /// `Error::DuplicateProperty` when a derived type redeclares a base property.
    pub fn properties<'a>(&'a self, ty: &'a ComplexType) -> Result<Vec<(&'a str, &'a Property)>> {
        let chain = self.base_chain(ty)?;
        let mut owners: BTreeMap<&str, &ComplexType> = BTreeMap::new();
        let mut out = Vec::new();
        for owner in chain.into_iter().rev() {
            for (name, property) in &owner.properties {
                if let Some(base) = owners.insert(name.as_str(), owner) {
                    return Err(Error::DuplicateProperty {
                        type_name: owner.full_name(),
                        base: base.full_name(),
                        property: name.clone(),
                    });
                }
                out.push((name.as_str(), property));
            }
        }
        Ok(out)
    }

    /// # Errors
    /// `Error::UnknownProperty` naming the type and property when absent.
    pub fn property<'a>(&'a self, ty: &'a ComplexType, name: &str) -> Result<&'a Property> {
        self.base_chain(ty)?
            .into_iter()
            .find_map(|owner| owner.properties.get(name))
            .ok_or_else(|| Error::UnknownProperty {
                type_name: ty.full_name(),
                property: name.to_owned(),
            })
    }

    /// Key properties in declared order, taken from the nearest type that declares a key.
    ///
    /// # Errors
    /// `Error::NoKey` if no type along the chain declares a key.
    pub fn key_properties<'a>(
        &'a self,
        ty: &'a ComplexType,
    ) -> Result<Vec<(&'a str, &'a Property)>> {
        let key = self
            .base_chain(ty)?
            .into_iter()
            .find_map(|owner| owner.key.as_ref())
            .ok_or_else(|| Error::NoKey {
                type_name: ty.full_name(),
            })?;
        key.iter()
            .map(|name| Ok((name.as_str(), self.property(ty, name)?)))
            .collect()
    }

    /// Complex types that have `ty` somewhere in their base chain.
    #[must_use]
    pub fn derived_types<'a>(&'a self, ty: &ComplexType) -> Vec<&'a ComplexType> {
        let target = ty.full_name();
        self.complex_types()
            .filter(|candidate| candidate.full_name() != target)
            .filter(|candidate| {
                self.base_chain(candidate)
                    .map(|chain| chain.iter().skip(1).any(|b| b.full_name() == target))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Caster names for the derived types of `ty`.
    ///
    /// The bare type name is used unless another complex type anywhere in the
    /// schema shares it; then the sanitized `namespace_name` form is used.
    #[must_use]
    pub fn casters(&self, ty: &ComplexType) -> BTreeMap<String, TypeRef> {
        self.derived_types(ty)
            .into_iter()
            .map(|derived| (self.caster_name(derived), derived.type_ref()))
            .collect()
    }

    fn caster_name(&self, ty: &ComplexType) -> String {
        let shared = self
            .complex_types()
            .filter(|other| other.name == ty.name)
            .count();
        if shared > 1 {
            format!("{}_{}", ty.namespace.replace('.', "_"), ty.name)
        } else {
            ty.name.clone()
        }
    }

    /// Resolve a cast target for `ty` by caster name or fully qualified name.
    ///
    /// # Errors
    /// `Error::UnknownCast` when no derived type matches.
    pub fn resolve_cast(&self, ty: &ComplexType, target: &str) -> Result<TypeRef> {
        let casters = self.casters(ty);
        if let Some(found) = casters.get(target) {
            return Ok(found.clone());
        }
        casters
            .into_values()
            .find(|t| t.to_string() == target)
            .ok_or_else(|| Error::UnknownCast {
                type_name: ty.full_name(),
                target: target.to_owned(),
            })
    }
}
