//! `$select`

use super::{IntoExpression, call, collect};
use crate::error::Result;
use crate::expr::Expression;
use crate::signature::QueryFamily;

/// `$select=A,B/C`
///
/// # Errors
/// Propagates argument errors.
pub fn select<I>(props: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(QueryFamily::Select, "select", collect(props))
}

/// `$select=<text>` taken verbatim.
///
/// # Errors
/// Propagates argument errors.
pub fn select_raw(text: impl Into<String>) -> Result<Expression> {
    call(QueryFamily::Select, "selectRaw", vec![Expression::raw(text)])
}
