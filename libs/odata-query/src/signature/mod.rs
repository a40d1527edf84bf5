//! Declarative signatures of the built-in query functions.
//!
//! Every DSL operator (`eq`, `and`, `expand`, `orderBy`, ...) is described by a
//! [`FunctionSignature`]. Arguments are either normal (typed, possibly generic)
//! or rewrite arguments that exist only to carry author-time intent and are
//! eliminated by [`crate::rewrite`] before evaluation.

mod builtins;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub use builtins::{Builtins, builtins, infer_numeric};

use crate::error::{Error, Result};
use crate::expr::{Call, Constant, Expression, ReturnType};
use crate::types::TypeRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nullability {
    Inherit,
    Nullable,
    NonNull,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgType {
    Concrete(TypeRef),
    /// Bound to the type of the first non-constant argument declared with the same name.
    Generic(String),
    /// Collection of a generic binding.
    GenericCollection(String),
    Any,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Concrete(t) => write!(f, "{t}"),
            ArgType::Generic(g) => write!(f, "{g}"),
            ArgType::GenericCollection(g) => write!(f, "Collection({g})"),
            ArgType::Any => write!(f, "any"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RewriteKind {
    CustomQueryArg,
    ExpandAnd,
    ExpandCount,
    Mapper,
    FilterRawProps,
    FilterRawExecutor,
    OutputType,
}

impl fmt::Display for RewriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RewriteKind::CustomQueryArg => "CustomQueryArg",
            RewriteKind::ExpandAnd => "ExpandAnd",
            RewriteKind::ExpandCount => "ExpandCount",
            RewriteKind::Mapper => "Mapper",
            RewriteKind::FilterRawProps => "FilterRawProps",
            RewriteKind::FilterRawExecutor => "FilterRawExecutor",
            RewriteKind::OutputType => "OutputType",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Normal {
        arg_type: ArgType,
        nullability: Nullability,
    },
    Rewrite {
        kind: RewriteKind,
        descriptor: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSignature {
    pub name: String,
    pub kind: ArgKind,
    pub optional: bool,
    pub repeated: bool,
}

impl ArgSignature {
    #[must_use]
    pub fn normal(name: &str, arg_type: ArgType) -> Self {
        Self {
            name: name.to_owned(),
            kind: ArgKind::Normal {
                arg_type,
                nullability: Nullability::Inherit,
            },
            optional: false,
            repeated: false,
        }
    }

    #[must_use]
    pub fn rewrite(name: &str, kind: RewriteKind, descriptor: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ArgKind::Rewrite {
                kind,
                descriptor: descriptor.to_owned(),
            },
            optional: false,
            repeated: false,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        if let ArgKind::Normal { nullability, .. } = &mut self.kind {
            *nullability = Nullability::Nullable;
        }
        self
    }

    #[must_use]
    pub fn rewrite_kind(&self) -> Option<RewriteKind> {
        match self.kind {
            ArgKind::Rewrite { kind, .. } => Some(kind),
            ArgKind::Normal { .. } => None,
        }
    }
}

impl fmt::Display for ArgSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dots = if self.repeated { "..." } else { "" };
        let opt = if self.optional { "?" } else { "" };
        match &self.kind {
            ArgKind::Normal {
                arg_type,
                nullability,
            } => {
                let null = match nullability {
                    Nullability::Nullable => " | null",
                    Nullability::Inherit | Nullability::NonNull => "",
                };
                write!(f, "{dots}{}{opt}: {arg_type}{null}", self.name)
            }
            ArgKind::Rewrite { kind, descriptor } => {
                write!(f, "{dots}{}{opt}: <{kind}: {descriptor}>", self.name)
            }
        }
    }
}

/// How a call is rendered as OData text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallStyle {
    /// `a op b op c`
    Infix { operator: String },
    /// `name(a,b)`, or `this/name(a,b)` when the call has a `this`
    FunctionCall { rendered_name: String },
    /// `op a`
    Prefix { operator: String },
    /// `a op`
    Suffix { operator: String },
    /// `a<sep>b<sep>c`
    Joined { separator: String },
    /// The single argument rendered as is.
    Passthrough,
}

/// Query option a top-level call is materialized into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryFamily {
    Filter,
    Select,
    Expand,
    OrderBy,
    Search,
    Top,
    Skip,
    Count,
    Custom,
}

impl QueryFamily {
    /// Query-string key of built-in families; custom parameters carry their own name.
    #[must_use]
    pub fn param_name(self) -> Option<&'static str> {
        match self {
            QueryFamily::Filter => Some("$filter"),
            QueryFamily::Select => Some("$select"),
            QueryFamily::Expand => Some("$expand"),
            QueryFamily::OrderBy => Some("$orderby"),
            QueryFamily::Search => Some("$search"),
            QueryFamily::Top => Some("$top"),
            QueryFamily::Skip => Some("$skip"),
            QueryFamily::Count => Some("$count"),
            QueryFamily::Custom => None,
        }
    }

    /// Combinator to suggest when the option is supplied twice.
    #[must_use]
    pub fn combine_hint(self) -> &'static str {
        match self {
            QueryFamily::Filter => "Use the and/or functions to combine filters.",
            QueryFamily::Select => "Pass every property to a single select call.",
            QueryFamily::Expand => "Use the combine function to expand several properties.",
            QueryFamily::OrderBy => "Pass every ordering to a single orderBy call.",
            QueryFamily::Search => "Use the and/or functions to combine search terms.",
            QueryFamily::Top
            | QueryFamily::Skip
            | QueryFamily::Count
            | QueryFamily::Custom => "Only one value is allowed.",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FunctionSignature {
    pub name: String,
    pub args: Vec<ArgSignature>,
    pub output_type: ReturnType,
    pub style: CallStyle,
    pub family: QueryFamily,
    pub constructed_from: Option<Arc<FunctionSignature>>,
}

impl FunctionSignature {
    #[must_use]
    pub fn new(
        name: &str,
        family: QueryFamily,
        args: Vec<ArgSignature>,
        output_type: impl Into<ReturnType>,
        style: CallStyle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            args,
            output_type: output_type.into(),
            style,
            family,
            constructed_from: None,
        }
    }

    /// Copy of this signature with a narrowed output type.
    #[must_use]
    pub fn narrowed(self: &Arc<Self>, output_type: TypeRef) -> Arc<Self> {
        Arc::new(Self {
            output_type: ReturnType::Type(output_type),
            constructed_from: Some(Arc::clone(self)),
            ..(**self).clone()
        })
    }

    /// Copy of this signature without the argument at `index`.
    #[must_use]
    pub fn without_arg(self: &Arc<Self>, index: usize) -> Arc<Self> {
        let mut args = self.args.clone();
        if index < args.len() {
            args.remove(index);
        }
        Arc::new(Self {
            args,
            constructed_from: Some(Arc::clone(self)),
            ..(**self).clone()
        })
    }

    /// Copy of this signature with a different argument list and call style.
    #[must_use]
    pub fn reshaped(self: &Arc<Self>, args: Vec<ArgSignature>, style: CallStyle) -> Arc<Self> {
        Arc::new(Self {
            args,
            style,
            constructed_from: Some(Arc::clone(self)),
            ..(**self).clone()
        })
    }

    /// The signature this one was originally declared as.
    #[must_use]
    pub fn origin(&self) -> &FunctionSignature {
        self.constructed_from
            .as_deref()
            .map_or(self, FunctionSignature::origin)
    }

    /// Structural checks performed before a call is rendered.
    ///
    /// # Errors
    /// `Error::DuplicateArgument` if two declared arguments share a name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for arg in &self.args {
            if !seen.insert(arg.name.as_str()) {
                return Err(Error::DuplicateArgument {
                    parameter: arg.name.clone(),
                    signature: self.to_string(),
                });
            }
        }
        Ok(())
    }

    fn expected_arity(&self) -> String {
        let required = self
            .args
            .iter()
            .filter(|a| !a.optional && !a.repeated)
            .count();
        if self.args.iter().any(|a| a.repeated) {
            format!("at least {required}")
        } else {
            let max = self.args.len();
            if max == required {
                required.to_string()
            } else {
                format!("{required} to {max}")
            }
        }
    }

    /// Pair `args` with their descriptors and bind generic argument types.
    ///
    /// Untyped constants receive the type their descriptor resolves to, so a
    /// literal compared against an enum property is serialized as that enum.
    ///
    /// # Errors
    /// `Error::ArgumentCount` when `args` cannot be matched to the declared list.
    pub fn call(self: &Arc<Self>, this: Option<Expression>, args: Vec<Expression>) -> Result<Expression> {
        let paired = self.pair(args)?;
        let bindings = Self::bind(&paired);
        let args = paired
            .into_iter()
            .map(|(expr, sig)| (Self::type_constant(expr, &sig, &bindings), sig))
            .collect();
        Ok(Expression::Call(Call {
            this: this.map(Box::new),
            args,
            signature: Arc::clone(self),
            generic_bindings: bindings,
        }))
    }

    fn pair(&self, args: Vec<Expression>) -> Result<Vec<(Expression, ArgSignature)>> {
        let count_err = |actual| Error::ArgumentCount {
            function: self.name.clone(),
            expected: self.expected_arity(),
            actual,
        };
        let actual = args.len();
        let mut decl = self.args.iter().peekable();
        let mut out = Vec::with_capacity(actual);
        let mut iter = args.into_iter().peekable();
        while let Some(sig) = decl.next() {
            if sig.repeated {
                // Repeated arguments absorb everything up to the trailing optional ones.
                let trailing = decl.clone().count();
                while iter.len() > trailing {
                    let Some(expr) = iter.next() else { break };
                    if sig.rewrite_kind().is_some() && !Self::matches_rewrite(&expr, sig) {
                        break;
                    }
                    out.push((expr, sig.clone()));
                }
                continue;
            }
            match iter.peek() {
                Some(expr) if !sig.optional || Self::fits(expr, sig) => {
                    if let Some(expr) = iter.next() {
                        out.push((expr, sig.clone()));
                    }
                }
                Some(_) => {}
                None if sig.optional => {}
                None => return Err(count_err(actual)),
            }
        }
        if iter.next().is_some() {
            return Err(count_err(actual));
        }
        Ok(out)
    }

    fn matches_rewrite(expr: &Expression, sig: &ArgSignature) -> bool {
        matches!(
            (expr, sig.rewrite_kind()),
            (Expression::Const { value: Constant::Rewrite(p), .. }, Some(kind)) if p.kind() == kind
        )
    }

    fn fits(expr: &Expression, sig: &ArgSignature) -> bool {
        match sig.rewrite_kind() {
            Some(_) => Self::matches_rewrite(expr, sig),
            None => !matches!(expr, Expression::Const { value: Constant::Rewrite(_), .. }),
        }
    }

    fn bind(paired: &[(Expression, ArgSignature)]) -> BTreeMap<String, TypeRef> {
        let mut bindings = BTreeMap::new();
        for (expr, sig) in paired {
            let ArgKind::Normal { arg_type, .. } = &sig.kind else {
                continue;
            };
            if matches!(expr, Expression::Const { return_type: None, .. }) {
                continue;
            }
            let Some(t) = expr.concrete_type() else {
                continue;
            };
            match arg_type {
                ArgType::Generic(g) => {
                    bindings.entry(g.clone()).or_insert_with(|| t.clone());
                }
                ArgType::GenericCollection(g) => {
                    if let TypeRef::Collection { element } = t {
                        bindings
                            .entry(g.clone())
                            .or_insert_with(|| element.as_ref().clone());
                    }
                }
                ArgType::Concrete(_) | ArgType::Any => {}
            }
        }
        bindings
    }

    fn type_constant(
        expr: Expression,
        sig: &ArgSignature,
        bindings: &BTreeMap<String, TypeRef>,
    ) -> Expression {
        match expr {
            Expression::Const {
                value: value @ Constant::Value(_),
                return_type: None,
            } => {
                let resolved = match &sig.kind {
                    ArgKind::Normal {
                        arg_type: ArgType::Concrete(t),
                        ..
                    } => Some(t.clone()),
                    ArgKind::Normal {
                        arg_type: ArgType::Generic(g),
                        ..
                    } => bindings.get(g).cloned(),
                    ArgKind::Normal {
                        arg_type: ArgType::GenericCollection(g),
                        ..
                    } => bindings.get(g).cloned().map(TypeRef::collection),
                    _ => None,
                };
                Expression::Const {
                    value,
                    return_type: resolved,
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({args}): {}", self.name, self.output_type)
    }
}

/// All overloads sharing one external name.
#[derive(Clone, Debug)]
pub struct FunctionSignatureContainer {
    name: String,
    signatures: Vec<Arc<FunctionSignature>>,
}

impl FunctionSignatureContainer {
    /// # Errors
    /// `Error::SignatureNameMismatch` if any signature is named differently.
    pub fn new(name: &str, signatures: Vec<FunctionSignature>) -> Result<Self> {
        if let Some(bad) = signatures.iter().find(|s| s.name != name) {
            return Err(Error::SignatureNameMismatch {
                expected: name.to_owned(),
                actual: bad.name.clone(),
            });
        }
        Ok(Self {
            name: name.to_owned(),
            signatures: signatures.into_iter().map(Arc::new).collect(),
        })
    }

    /// Overloads built from one shared name; the invariant holds by construction.
    #[must_use]
    pub(crate) fn overloads(name: &str, build: impl Fn(&str) -> Vec<FunctionSignature>) -> Self {
        Self {
            name: name.to_owned(),
            signatures: build(name).into_iter().map(Arc::new).collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn signatures(&self) -> &[Arc<FunctionSignature>] {
        &self.signatures
    }

    /// Overload whose output type is `output`.
    #[must_use]
    pub fn by_output(&self, output: &TypeRef) -> Option<&Arc<FunctionSignature>> {
        self.signatures
            .iter()
            .find(|s| s.output_type.concrete() == Some(output))
    }

    /// The first declared overload.
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<FunctionSignature>> {
        self.signatures.first()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn eq_sig() -> Arc<FunctionSignature> {
        Arc::new(FunctionSignature::new(
            "eq",
            QueryFamily::Filter,
            vec![
                ArgSignature::normal("lhs", ArgType::Generic("T".to_owned())),
                ArgSignature::normal("rhs", ArgType::Generic("T".to_owned())).nullable(),
                ArgSignature::rewrite("mapper", RewriteKind::Mapper, "maps T to a literal")
                    .optional(),
            ],
            TypeRef::edm("Boolean"),
            CallStyle::Infix {
                operator: "eq".to_owned(),
            },
        ))
    }

    #[test]
    fn display_shows_full_signature() {
        assert_eq!(
            eq_sig().to_string(),
            "eq(lhs: T, rhs: T | null, mapper?: <Mapper: maps T to a literal>): Edm.Boolean"
        );
    }

    #[test]
    fn constants_take_the_generic_binding() {
        let sig = eq_sig();
        let lhs = Expression::prop(None, "Color", TypeRef::single("Svc", "Color"));
        let call = sig.call(None, vec![lhs, Expression::constant("Red")]).unwrap();
        let call = call.as_call().unwrap();
        assert_eq!(call.generic_bindings["T"], TypeRef::single("Svc", "Color"));
        assert_eq!(
            call.args[1].0.concrete_type(),
            Some(&TypeRef::single("Svc", "Color"))
        );
    }

    #[test]
    fn arity_is_checked() {
        let sig = eq_sig();
        let err = sig.call(None, vec![Expression::constant(1)]).unwrap_err();
        assert!(matches!(err, Error::ArgumentCount { actual: 1, .. }));
    }

    #[test]
    fn container_rejects_foreign_names() {
        let a = FunctionSignature::new(
            "add",
            QueryFamily::Filter,
            vec![],
            TypeRef::edm("Int64"),
            CallStyle::Passthrough,
        );
        let b = FunctionSignature::new(
            "sub",
            QueryFamily::Filter,
            vec![],
            TypeRef::edm("Int64"),
            CallStyle::Passthrough,
        );
        let err = FunctionSignatureContainer::new("add", vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::SignatureNameMismatch { .. }));
    }

    #[test]
    fn duplicate_argument_names_fail_validation() {
        let sig = FunctionSignature::new(
            "f",
            QueryFamily::Filter,
            vec![
                ArgSignature::normal("x", ArgType::Any),
                ArgSignature::normal("x", ArgType::Any),
            ],
            TypeRef::edm("Boolean"),
            CallStyle::Passthrough,
        );
        assert!(matches!(
            sig.validate(),
            Err(Error::DuplicateArgument { .. })
        ));
    }
}
