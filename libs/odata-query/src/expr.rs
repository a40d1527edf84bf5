//! Expression tree recorded by the query DSL.
//!
//! Query objects and DSL functions build these nodes directly; nothing is
//! intercepted at runtime. The tree is immutable: rewrites and evaluation
//! always produce new values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rewrite::RewritePayload;
use crate::signature::{ArgSignature, FunctionSignature, FunctionSignatureContainer};
use crate::types::{CUSTOM_NAMESPACE, TypeRef};
use crate::value::Value;

/// Default root context name of OData expressions.
pub const IT: &str = "$it";

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u64);

impl SymbolId {
    fn next() -> Self {
        SymbolId(NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed))
    }
}

/// Either a concrete type or a set of overloads not yet narrowed to one.
#[derive(Clone, Debug)]
pub enum ReturnType {
    Type(TypeRef),
    Polymorphic(Arc<FunctionSignatureContainer>),
}

impl ReturnType {
    #[must_use]
    pub fn concrete(&self) -> Option<&TypeRef> {
        match self {
            ReturnType::Type(t) => Some(t),
            ReturnType::Polymorphic(_) => None,
        }
    }
}

impl From<TypeRef> for ReturnType {
    fn from(t: TypeRef) -> Self {
        ReturnType::Type(t)
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Type(t) => write!(f, "{t}"),
            ReturnType::Polymorphic(c) => write!(f, "<overloads of {}>", c.name()),
        }
    }
}

/// Marker for the named context an expression is anchored to.
#[derive(Clone, Debug)]
pub struct RootSymbol {
    pub id: SymbolId,
    pub context: Option<String>,
    pub return_type: ReturnType,
    pub custom: bool,
}

impl RootSymbol {
    #[must_use]
    pub fn new(context: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            id: SymbolId::next(),
            context: Some(context.into()),
            return_type: ReturnType::Type(return_type),
            custom: false,
        }
    }

    /// Root of a custom query parameter; the context is the parameter name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: SymbolId::next(),
            return_type: ReturnType::Type(TypeRef::single(CUSTOM_NAMESPACE, &name)),
            context: Some(name),
            custom: true,
        }
    }

    /// Same symbol identity under a different context name.
    #[must_use]
    pub fn with_context(&self, context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..self.clone()
        }
    }
}

impl PartialEq for RootSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.context == other.context
    }
}

/// Payload of a `@param` alias.
#[derive(Clone, Debug)]
pub enum AtParamPayload {
    /// Rendered from an expression, e.g. `@p=Name`.
    Ref(Expression),
    /// A literal serialized against its type.
    Const { value: Value, type_ref: TypeRef },
    /// Already serialized.
    Param(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtParamKind {
    Ref,
    Const,
    Param,
}

/// A `@name=value` query parameter referenced from a path or query expression.
///
/// Bindings are shared through `Arc` and de-duplicated by pointer identity,
/// not by name.
#[derive(Debug)]
pub struct AtParam {
    name: String,
    payload: AtParamPayload,
}

impl AtParam {
    #[must_use]
    pub fn new(name: &str, payload: AtParamPayload) -> Arc<Self> {
        let name = if name.starts_with('@') {
            name.to_owned()
        } else {
            format!("@{name}")
        };
        Arc::new(Self { name, payload })
    }

    #[must_use]
    pub fn constant(name: &str, value: impl Into<Value>, type_ref: TypeRef) -> Arc<Self> {
        Self::new(
            name,
            AtParamPayload::Const {
                value: value.into(),
                type_ref,
            },
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn payload(&self) -> &AtParamPayload {
        &self.payload
    }

    #[must_use]
    pub fn kind(&self) -> AtParamKind {
        match self.payload {
            AtParamPayload::Ref(_) => AtParamKind::Ref,
            AtParamPayload::Const { .. } => AtParamKind::Const,
            AtParamPayload::Param(_) => AtParamKind::Param,
        }
    }
}

/// Value carried by a `Const` node.
#[derive(Clone, Debug)]
pub enum Constant {
    Value(Value),
    Param(Arc<AtParam>),
    Rewrite(RewritePayload),
}

#[derive(Clone, Debug)]
pub enum Part {
    Literal(String),
    Expr(Expression),
}

#[derive(Clone, Debug)]
pub struct Call {
    pub this: Option<Box<Expression>>,
    pub args: Vec<(Expression, ArgSignature)>,
    pub signature: Arc<FunctionSignature>,
    pub generic_bindings: BTreeMap<String, TypeRef>,
}

#[derive(Clone, Debug)]
pub enum Expression {
    RootSymbol(RootSymbol),
    Prop {
        parent: Option<Box<Expression>>,
        name: String,
        return_type: ReturnType,
    },
    Call(Call),
    Const {
        value: Constant,
        return_type: Option<TypeRef>,
    },
    ReContexted {
        inner: Box<Expression>,
        context: String,
    },
    NamedQuery {
        inner: Box<Expression>,
        root: RootSymbol,
    },
    StringBuilder {
        parts: Vec<Part>,
        return_type: ReturnType,
    },
}

impl Expression {
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Const {
            value: Constant::Value(value.into()),
            return_type: None,
        }
    }

    #[must_use]
    pub fn typed_constant(value: impl Into<Value>, return_type: TypeRef) -> Self {
        Expression::Const {
            value: Constant::Value(value.into()),
            return_type: Some(return_type),
        }
    }

    /// An already-serialized OData fragment.
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self::typed_constant(Value::Raw(text.into()), TypeRef::raw())
    }

    #[must_use]
    pub fn param(param: Arc<AtParam>) -> Self {
        let return_type = match param.payload() {
            AtParamPayload::Const { type_ref, .. } => Some(type_ref.clone()),
            AtParamPayload::Ref(expr) => expr.concrete_type().cloned(),
            AtParamPayload::Param(_) => None,
        };
        Expression::Const {
            value: Constant::Param(param),
            return_type,
        }
    }

    #[must_use]
    pub fn rewrite(payload: RewritePayload) -> Self {
        Expression::Const {
            value: Constant::Rewrite(payload),
            return_type: None,
        }
    }

    #[must_use]
    pub fn prop(parent: Option<Expression>, name: impl Into<String>, return_type: TypeRef) -> Self {
        Expression::Prop {
            parent: parent.map(Box::new),
            name: name.into(),
            return_type: ReturnType::Type(return_type),
        }
    }

    #[must_use]
    pub fn re_contexted(self, context: impl Into<String>) -> Self {
        Expression::ReContexted {
            inner: Box::new(self),
            context: context.into(),
        }
    }

    #[must_use]
    pub fn named(self, root: RootSymbol) -> Self {
        Expression::NamedQuery {
            inner: Box::new(self),
            root,
        }
    }

    /// Declared return type; `None` for untyped constants.
    #[must_use]
    pub fn return_type(&self) -> Option<ReturnType> {
        match self {
            Expression::RootSymbol(s) => Some(s.return_type.clone()),
            Expression::Prop { return_type, .. } | Expression::StringBuilder { return_type, .. } => {
                Some(return_type.clone())
            }
            Expression::Call(call) => Some(call.signature.output_type.clone()),
            Expression::Const { return_type, .. } => return_type.clone().map(ReturnType::Type),
            Expression::ReContexted { inner, .. } | Expression::NamedQuery { inner, .. } => {
                inner.return_type()
            }
        }
    }

    /// Concrete return type, if there is one.
    #[must_use]
    pub fn concrete_type(&self) -> Option<&TypeRef> {
        match self {
            Expression::RootSymbol(s) => s.return_type.concrete(),
            Expression::Prop { return_type, .. } | Expression::StringBuilder { return_type, .. } => {
                return_type.concrete()
            }
            Expression::Call(call) => call.signature.output_type.concrete(),
            Expression::Const { return_type, .. } => return_type.as_ref(),
            Expression::ReContexted { inner, .. } | Expression::NamedQuery { inner, .. } => {
                inner.concrete_type()
            }
        }
    }

    /// Whether the expression statically denotes an integer.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        match self {
            Expression::Const {
                value: Constant::Value(v),
                return_type,
            } => return_type
                .as_ref()
                .map_or_else(|| v.is_integer(), TypeRef::is_integer),
            other => other.concrete_type().is_some_and(TypeRef::is_integer),
        }
    }

    #[must_use]
    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expression::Call(call) => Some(call),
            _ => None,
        }
    }

    /// The root symbol this expression is anchored to, following parents.
    #[must_use]
    pub fn root(&self) -> Option<&RootSymbol> {
        match self {
            Expression::RootSymbol(s) => Some(s),
            Expression::Prop { parent, .. } => parent.as_deref().and_then(Expression::root),
            Expression::Call(call) => call.this.as_deref().and_then(Expression::root),
            Expression::ReContexted { inner, .. } | Expression::NamedQuery { inner, .. } => {
                inner.root()
            }
            Expression::Const { .. } | Expression::StringBuilder { .. } => None,
        }
    }
}
