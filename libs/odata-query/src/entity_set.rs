use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::types::TypeRef;

/// Function bound to an entity type or to a collection of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundFunction {
    pub namespace: String,
    pub name: String,
    pub binding: TypeRef,
    #[serde(default)]
    pub parameters: Vec<FunctionParameter>,
    pub return_type: TypeRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
}

impl BoundFunction {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// A named entry point of the service. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySet {
    pub name: String,
    pub container_name: String,
    pub namespace: String,
    pub for_type: TypeRef,
    #[serde(default)]
    pub is_singleton: bool,
    #[serde(default)]
    pub functions: Vec<BoundFunction>,
}

impl EntitySet {
    #[must_use]
    pub fn new(
        container_name: impl Into<String>,
        name: impl Into<String>,
        for_type: TypeRef,
    ) -> Self {
        let container_name = container_name.into();
        Self {
            name: name.into(),
            namespace: for_type
                .as_single()
                .map(|(ns, _)| ns.to_owned())
                .unwrap_or_default(),
            container_name,
            for_type,
            is_singleton: false,
            functions: Vec::new(),
        }
    }

    #[must_use]
    pub fn singleton(mut self) -> Self {
        self.is_singleton = true;
        self
    }

    #[must_use]
    pub fn function(mut self, function: BoundFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// Type addressed by the bare entity-set path.
    #[must_use]
    pub fn path_type(&self) -> TypeRef {
        if self.is_singleton {
            self.for_type.clone()
        } else {
            TypeRef::collection(self.for_type.clone())
        }
    }

    /// Function named `name` bound to `binding`.
    ///
    /// # Errors
    /// `Error::UnknownFunction` when no such function is bound to `binding`.
    pub fn bound_function(&self, binding: &TypeRef, name: &str) -> Result<&BoundFunction> {
        self.functions
            .iter()
            .find(|f| &f.binding == binding && (f.name == name || f.full_name() == name))
            .ok_or_else(|| Error::UnknownFunction {
                type_name: binding.to_string(),
                function: name.to_owned(),
            })
    }

    /// # Errors
    /// `Error::UnknownType` unless the entity type is a complex schema type,
    /// `Error::NestedCollection` for collection types.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.for_type.is_collection() {
            return Err(Error::NestedCollection(self.for_type.to_string()));
        }
        schema.complex(&self.for_type)?;
        for f in &self.functions {
            schema.kind(f.binding.innermost())?;
            schema.kind(f.return_type.innermost())?;
            for p in &f.parameters {
                schema.kind(p.type_ref.innermost())?;
            }
        }
        Ok(())
    }
}
