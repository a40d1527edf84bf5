//! `$expand`

use std::sync::Arc;

use super::{IntoExpression, Query, call, collect};
use crate::error::Result;
use crate::expr::Expression;
use crate::query_object::QueryObject;
use crate::rewrite::{ExpandFn, RewritePayload};
use crate::signature::QueryFamily;

const E: QueryFamily = QueryFamily::Expand;

/// Extra options of an expanded navigation property.
#[derive(Clone)]
pub enum ExpandOption {
    /// `Nav($count=true)`
    Count,
    /// `Nav($filter=...;$select=...)`, built against the expanded element.
    And(ExpandFn),
}

impl ExpandOption {
    #[must_use]
    pub fn and(build: impl Fn(&QueryObject) -> Result<Vec<Query>> + Send + Sync + 'static) -> Self {
        ExpandOption::And(Arc::new(build))
    }
}

/// `$expand=Nav`
///
/// # Errors
/// Propagates argument errors.
pub fn expand(target: impl IntoExpression) -> Result<Expression> {
    expand_with(target, Vec::new())
}

/// `$expand=Nav(<options>)`; every sub-query is joined with `;` inside one
/// pair of parentheses, `$count` first.
///
/// # Errors
/// Propagates argument errors.
pub fn expand_with(target: impl IntoExpression, options: Vec<ExpandOption>) -> Result<Expression> {
    let mut args = vec![target.into_expression()];
    if options.iter().any(|o| matches!(o, ExpandOption::Count)) {
        args.push(Expression::rewrite(RewritePayload::ExpandCount));
    }
    args.extend(options.into_iter().filter_map(|o| match o {
        ExpandOption::And(f) => Some(Expression::rewrite(RewritePayload::ExpandAnd(f))),
        ExpandOption::Count => None,
    }));
    call(E, "expand", args)
}

/// `$expand=Nav/$ref`
///
/// # Errors
/// Propagates argument errors.
pub fn expand_ref(target: impl IntoExpression) -> Result<Expression> {
    call(E, "expandRef", vec![target.into_expression()])
}

/// `$expand=*`, or `$expand=*/$ref` when `refs_only` is set.
///
/// # Errors
/// Propagates argument errors.
pub fn expand_all(refs_only: bool) -> Result<Expression> {
    let args = if refs_only {
        vec![Expression::constant(true)]
    } else {
        Vec::new()
    };
    call(E, "expandAll", args)
}

/// Several expansions in one `$expand` clause.
///
/// # Errors
/// Propagates argument errors.
pub fn combine<I>(expands: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(E, "combine", collect(expands))
}
