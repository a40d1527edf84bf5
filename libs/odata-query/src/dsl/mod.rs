//! Query DSL: one module per system query option.
//!
//! Every function returns a recorded [`Expression`]; wrapping the top-level
//! expression in a [`Query`] makes it a query-string clause. The clause name
//! follows from the function family (`filter::eq` → `$filter`) or, for
//! [`custom::custom`], from the parameter name it was given.

pub mod custom;
pub mod expand;
pub mod filter;
pub mod orderby;
pub mod paging;
pub mod search;
pub mod select;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::{AtParam, Call, Constant, Expression};
use crate::query_object::QueryObject;
use crate::rewrite::RewritePayload;
use crate::signature::{QueryFamily, builtins};
use crate::value::Value;

/// Anything usable as a DSL argument.
pub trait IntoExpression {
    fn into_expression(self) -> Expression;
}

impl IntoExpression for Expression {
    fn into_expression(self) -> Expression {
        self
    }
}

impl IntoExpression for &Expression {
    fn into_expression(self) -> Expression {
        self.clone()
    }
}

impl IntoExpression for QueryObject {
    fn into_expression(self) -> Expression {
        self.as_expression()
    }
}

impl IntoExpression for &QueryObject {
    fn into_expression(self) -> Expression {
        self.as_expression()
    }
}

impl IntoExpression for Arc<AtParam> {
    fn into_expression(self) -> Expression {
        Expression::param(self)
    }
}

macro_rules! literal_into_expression {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpression for $ty {
                fn into_expression(self) -> Expression {
                    Expression::constant(self)
                }
            }
        )*
    };
}

literal_into_expression!(Value, &str, String, bool, i32, i64, f64);

/// An untyped literal; its type is taken from the argument it is passed to.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::constant(value)
}

/// One recorded query-string clause.
#[derive(Clone, Debug)]
pub struct Query {
    expr: Expression,
}

impl Query {
    #[must_use]
    pub fn new(expr: Expression) -> Self {
        Self { expr }
    }

    #[must_use]
    pub fn expression(&self) -> &Expression {
        &self.expr
    }

    #[must_use]
    pub fn into_expression(self) -> Expression {
        self.expr
    }

    fn top_call(&self) -> Result<&Call> {
        fn find(expr: &Expression) -> Option<&Call> {
            match expr {
                Expression::Call(call) => Some(call),
                Expression::ReContexted { inner, .. } | Expression::NamedQuery { inner, .. } => {
                    find(inner)
                }
                _ => None,
            }
        }
        find(&self.expr).ok_or_else(|| {
            Error::InvalidQuery("a query must be built with a query DSL function".to_owned())
        })
    }

    /// Family of the top-level DSL function.
    ///
    /// # Errors
    /// `Error::InvalidQuery` if the query is not a DSL call.
    pub fn family(&self) -> Result<QueryFamily> {
        Ok(self.top_call()?.signature.family)
    }

    /// Query-string key of this clause, e.g. `$filter` or a custom name.
    ///
    /// # Errors
    /// `Error::InvalidQuery` if the query is not a DSL call.
    pub fn param_name(&self) -> Result<String> {
        let call = self.top_call()?;
        if let Some(Expression::RootSymbol(symbol)) = call.this.as_deref()
            && symbol.custom
            && let Some(name) = &symbol.context
        {
            return Ok(name.clone());
        }
        let custom = call.args.iter().find_map(|(arg, _)| match arg {
            Expression::Const {
                value: Constant::Rewrite(RewritePayload::CustomQuery(name)),
                ..
            } => Some(name.clone()),
            _ => None,
        });
        if let Some(name) = custom {
            return Ok(name);
        }
        call.signature
            .family
            .param_name()
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "custom query '{}' has no parameter name",
                    call.signature.name
                ))
            })
    }
}

impl From<Expression> for Query {
    fn from(expr: Expression) -> Self {
        Self::new(expr)
    }
}

/// Combinator to suggest for a repeated query-string key.
#[must_use]
pub fn combine_hint(param_name: &str) -> &'static str {
    let family = match param_name {
        "$filter" => QueryFamily::Filter,
        "$select" => QueryFamily::Select,
        "$expand" => QueryFamily::Expand,
        "$orderby" => QueryFamily::OrderBy,
        "$search" => QueryFamily::Search,
        "$top" => QueryFamily::Top,
        "$skip" => QueryFamily::Skip,
        "$count" => QueryFamily::Count,
        _ => QueryFamily::Custom,
    };
    family.combine_hint()
}

pub(crate) fn call(family: QueryFamily, name: &str, args: Vec<Expression>) -> Result<Expression> {
    builtins().signature(family, name)?.call(None, args)
}

#[must_use]
pub(crate) fn collect<I>(items: I) -> Vec<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    items
        .into_iter()
        .map(IntoExpression::into_expression)
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn clause_name_follows_family() {
        let q: Query = filter::eq(lit("a"), "b").unwrap().into();
        assert_eq!(q.param_name().unwrap(), "$filter");
        let q: Query = paging::top(5).unwrap().into();
        assert_eq!(q.param_name().unwrap(), "$top");
    }

    #[test]
    fn custom_clause_uses_given_name() {
        let q: Query = custom::custom("api-version", "2.0").unwrap().into();
        assert_eq!(q.param_name().unwrap(), "api-version");
        assert_eq!(q.family().unwrap(), QueryFamily::Custom);
    }

    #[test]
    fn plain_expressions_are_not_queries() {
        let q = Query::new(lit(1));
        assert!(matches!(q.param_name(), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn hints_name_the_combinator() {
        assert!(combine_hint("$filter").contains("and/or"));
        assert!(combine_hint("$expand").contains("combine"));
    }
}
