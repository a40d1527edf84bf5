//! Rendering of expression trees into OData text.
//!
//! Context is passed explicitly through [`EvalScope`]; `@param` aliases met on
//! the way are collected into a [`ParamSink`] owned by the caller for the
//! duration of one pass.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::{AtParam, Call, Constant, Expression, IT, Part, ReturnType, RootSymbol};
use crate::rewrite::rewrite_call;
use crate::schema::Schema;
use crate::signature::CallStyle;
use crate::value::ValueSerializer;

/// Immutable evaluation context handed to every recursive call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalScope {
    pub current_context: String,
    pub top_level: bool,
}

impl EvalScope {
    #[must_use]
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            current_context: context.into(),
            top_level: true,
        }
    }

    #[must_use]
    pub fn nested(&self) -> Self {
        Self {
            top_level: false,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn top(&self) -> Self {
        Self {
            top_level: true,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_context(&self, context: &str) -> Self {
        Self {
            current_context: context.to_owned(),
            ..self.clone()
        }
    }
}

impl Default for EvalScope {
    fn default() -> Self {
        Self::new(IT)
    }
}

/// `@param` bindings in the order they were met, without repeats of the same binding.
#[derive(Clone, Debug, Default)]
pub struct ParamSink {
    params: Vec<Arc<AtParam>>,
}

impl ParamSink {
    pub fn push(&mut self, param: &Arc<AtParam>) {
        if !self.params.iter().any(|p| Arc::ptr_eq(p, param)) {
            self.params.push(Arc::clone(param));
        }
    }

    pub fn extend(&mut self, other: ParamSink) {
        for p in &other.params {
            self.push(p);
        }
    }

    #[must_use]
    pub fn params(&self) -> &[Arc<AtParam>] {
        &self.params
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Root symbol bound while rendering, and the text if there is any.
#[derive(Clone, Debug, Default)]
pub struct Evaluated {
    pub root: Option<RootSymbol>,
    pub text: Option<String>,
}

impl Evaluated {
    fn text(text: String) -> Self {
        Self {
            root: None,
            text: Some(text),
        }
    }
}

pub struct Evaluator<'a> {
    schema: &'a Arc<Schema>,
    serializer: &'a dyn ValueSerializer,
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub fn new(schema: &'a Arc<Schema>, serializer: &'a dyn ValueSerializer) -> Self {
        Self { schema, serializer }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        self.schema
    }

    #[must_use]
    pub fn serializer(&self) -> &dyn ValueSerializer {
        self.serializer
    }

    /// Render `expr` as the outermost expression relative to `$it`.
    ///
    /// # Errors
    /// Any evaluation error; see [`Evaluator::evaluate_in`].
    pub fn render(&self, expr: &Expression, sink: &mut ParamSink) -> Result<String> {
        Ok(self
            .evaluate_in(expr, &EvalScope::default(), sink)?
            .text
            .unwrap_or_default())
    }

    /// # Errors
    /// `Error::PolymorphicReturnType` for unresolved overloads,
    /// `Error::UnresolvedRewrite` for leftover rewrite arguments, and
    /// serialization errors for constants.
    pub fn evaluate_in(
        &self,
        expr: &Expression,
        scope: &EvalScope,
        sink: &mut ParamSink,
    ) -> Result<Evaluated> {
        match expr {
            Expression::RootSymbol(symbol) => Ok(Self::root_symbol(symbol, scope)),
            Expression::Prop {
                parent,
                name,
                return_type,
            } => {
                if let ReturnType::Polymorphic(_) = return_type {
                    return Err(Error::PolymorphicReturnType(name.clone()));
                }
                let parent = match parent {
                    Some(p) => self.evaluate_in(p, &scope.nested(), sink)?,
                    None => Evaluated::default(),
                };
                let text = match parent.text {
                    Some(p) => format!("{p}/{name}"),
                    None => name.clone(),
                };
                Ok(Evaluated {
                    root: parent.root,
                    text: Some(text),
                })
            }
            Expression::Call(call) => self.call(call, scope, sink),
            Expression::Const { value, return_type } => match value {
                Constant::Value(v) => {
                    let ty = return_type.clone().unwrap_or_else(|| v.default_type());
                    Ok(Evaluated::text(
                        self.serializer.serialize(v, &ty, self.schema)?,
                    ))
                }
                Constant::Param(param) => {
                    sink.push(param);
                    Ok(Evaluated::text(param.name().to_owned()))
                }
                Constant::Rewrite(payload) => Err(Error::UnresolvedRewrite {
                    parameter: payload.kind().to_string(),
                    signature: "<constant>".to_owned(),
                }),
            },
            Expression::ReContexted { inner, context } => {
                self.evaluate_in(inner, &scope.with_context(context), sink)
            }
            Expression::NamedQuery { inner, root } => {
                let inner = self.evaluate_in(inner, scope, sink)?;
                let text = match (inner.text, &root.context) {
                    (Some(text), Some(name)) => Some(format!("{name}={text}")),
                    (text, _) => text,
                };
                Ok(Evaluated {
                    root: Some(root.clone()),
                    text,
                })
            }
            Expression::StringBuilder { parts, .. } => {
                let mut out = String::new();
                let mut root = None;
                for part in parts {
                    match part {
                        Part::Literal(s) => out.push_str(s),
                        Part::Expr(e) => {
                            let ev = self.evaluate_in(e, scope, sink)?;
                            if root.is_none() {
                                root = ev.root;
                            }
                            out.push_str(ev.text.as_deref().unwrap_or_default());
                        }
                    }
                }
                Ok(Evaluated {
                    root,
                    text: Some(out),
                })
            }
        }
    }

    fn root_symbol(symbol: &RootSymbol, scope: &EvalScope) -> Evaluated {
        let differs = symbol
            .context
            .as_deref()
            .is_some_and(|c| c != scope.current_context);
        let text = if scope.top_level || differs {
            symbol.context.clone()
        } else {
            None
        };
        Evaluated {
            root: Some(symbol.clone()),
            text,
        }
    }

    fn call(&self, call: &Call, scope: &EvalScope, sink: &mut ParamSink) -> Result<Evaluated> {
        let rewritten = rewrite_call(call, self, sink)?;
        let Expression::Call(call) = &rewritten else {
            return self.evaluate_in(&rewritten, scope, sink);
        };
        call.signature.validate()?;
        if let ReturnType::Polymorphic(_) = call.signature.output_type {
            return Err(Error::PolymorphicReturnType(call.signature.name.clone()));
        }

        let this = match &call.this {
            Some(this) => self.evaluate_in(this, &scope.nested(), sink)?,
            None => Evaluated::default(),
        };
        let mut root = this.root.clone();
        let mut args = Vec::with_capacity(call.args.len());
        for (arg, sig) in &call.args {
            if sig.rewrite_kind().is_some()
                || matches!(
                    arg,
                    Expression::Const {
                        value: Constant::Rewrite(_),
                        ..
                    }
                )
            {
                return Err(Error::UnresolvedRewrite {
                    parameter: sig.name.clone(),
                    signature: call.signature.to_string(),
                });
            }
            let ev = self.evaluate_in(arg, &scope.top(), sink)?;
            if root.is_none() {
                root = ev.root;
            }
            let text = ev.text.unwrap_or_default();
            args.push(if needs_parens(&call.signature.style, arg) {
                format!("({text})")
            } else {
                text
            });
        }

        let text = match &call.signature.style {
            CallStyle::Infix { operator } => args.join(&format!(" {operator} ")),
            CallStyle::FunctionCall { rendered_name } => {
                let inner = args.join(",");
                match this.text {
                    Some(this) => format!("{this}/{rendered_name}({inner})"),
                    None => format!("{rendered_name}({inner})"),
                }
            }
            CallStyle::Prefix { operator } => format!("{operator}{}", args.join(",")),
            CallStyle::Suffix { operator } => format!("{}{operator}", args.join(",")),
            CallStyle::Joined { separator } => args.join(separator),
            CallStyle::Passthrough => args.join(","),
        };
        Ok(Evaluated {
            root,
            text: Some(text),
        })
    }
}

/// Operator arguments that are themselves operator calls get parentheses.
fn needs_parens(style: &CallStyle, arg: &Expression) -> bool {
    let outer_is_operator = matches!(
        style,
        CallStyle::Infix { .. } | CallStyle::Prefix { .. } | CallStyle::Suffix { .. }
    );
    let inner = match arg {
        Expression::ReContexted { inner, .. } => inner.as_ref(),
        other => other,
    };
    outer_is_operator
        && inner
            .as_call()
            .is_some_and(|c| matches!(c.signature.style, CallStyle::Infix { .. }))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::expr::AtParamPayload;
    use crate::signature::{QueryFamily, builtins};
    use crate::types::TypeRef;
    use crate::value::DefaultSerializer;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new())
    }

    fn user_root() -> Expression {
        Expression::RootSymbol(RootSymbol::new(IT, TypeRef::single("Svc", "User")))
    }

    fn name_prop() -> Expression {
        Expression::prop(Some(user_root()), "Name", TypeRef::edm("String"))
    }

    fn call(family: QueryFamily, name: &str, args: Vec<Expression>) -> Expression {
        builtins()
            .signature(family, name)
            .unwrap()
            .call(None, args)
            .unwrap()
    }

    #[test]
    fn root_properties_render_without_context() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let expr = call(
            QueryFamily::Filter,
            "eq",
            vec![name_prop(), Expression::constant("Bob")],
        );
        assert_eq!(ev.render(&expr, &mut sink).unwrap(), "Name eq 'Bob'");
    }

    #[test]
    fn bare_root_renders_at_top_level() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        assert_eq!(ev.render(&user_root(), &mut sink).unwrap(), IT);
    }

    #[test]
    fn foreign_context_is_rendered() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let o = Expression::RootSymbol(RootSymbol::new("o", TypeRef::single("Svc", "Order")));
        let total = Expression::prop(Some(o), "Total", TypeRef::edm("Int32"));
        let expr = call(QueryFamily::Filter, "gt", vec![total, Expression::constant(5)]);
        assert_eq!(ev.render(&expr, &mut sink).unwrap(), "o/Total gt 5");
    }

    #[test]
    fn nested_operators_are_parenthesized() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let a = call(
            QueryFamily::Filter,
            "eq",
            vec![name_prop(), Expression::constant("Bob")],
        );
        let b = call(
            QueryFamily::Filter,
            "eq",
            vec![name_prop(), Expression::constant("Ann")],
        );
        let expr = call(QueryFamily::Filter, "or", vec![a, b]);
        assert_eq!(
            ev.render(&expr, &mut sink).unwrap(),
            "(Name eq 'Bob') or (Name eq 'Ann')"
        );
    }

    #[test]
    fn params_are_deduplicated_by_identity() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let p = AtParam::constant("name", "Bob", TypeRef::edm("String"));
        let twin = AtParam::new("name", AtParamPayload::Param("'Bob'".to_owned()));
        let expr = call(
            QueryFamily::Filter,
            "or",
            vec![
                call(
                    QueryFamily::Filter,
                    "eq",
                    vec![name_prop(), Expression::param(Arc::clone(&p))],
                ),
                call(
                    QueryFamily::Filter,
                    "eq",
                    vec![name_prop(), Expression::param(Arc::clone(&p))],
                ),
                call(
                    QueryFamily::Filter,
                    "eq",
                    vec![name_prop(), Expression::param(twin)],
                ),
            ],
        );
        let text = ev.render(&expr, &mut sink).unwrap();
        assert!(text.contains("Name eq @name"));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn polymorphic_calls_cannot_be_rendered() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let add_as = builtins().signature(QueryFamily::Filter, "add_as").unwrap();
        let without_output = Expression::Call(Call {
            this: None,
            args: Vec::new(),
            signature: add_as.without_arg(2),
            generic_bindings: std::collections::BTreeMap::new(),
        });
        assert!(matches!(
            ev.render(&without_output, &mut sink),
            Err(Error::PolymorphicReturnType(name)) if name == "add"
        ));
    }

    #[test]
    fn stray_rewrite_constants_are_rejected() {
        let schema = schema();
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        let stray = Expression::rewrite(crate::rewrite::RewritePayload::ExpandCount);
        assert!(matches!(
            ev.render(&stray, &mut sink),
            Err(Error::UnresolvedRewrite { .. })
        ));
    }
}
