//! `$search`

use super::{IntoExpression, call, collect};
use crate::error::Result;
use crate::expr::Expression;
use crate::signature::QueryFamily;

const S: QueryFamily = QueryFamily::Search;

/// A bare search word.
///
/// # Errors
/// Propagates argument errors.
pub fn term(word: impl Into<String>) -> Result<Expression> {
    call(S, "term", vec![Expression::raw(word)])
}

/// A quoted search phrase.
///
/// # Errors
/// Propagates argument errors.
pub fn phrase(text: &str) -> Result<Expression> {
    let quoted = format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""));
    call(S, "phrase", vec![Expression::raw(quoted)])
}

/// # Errors
/// Propagates argument errors.
pub fn and<I>(terms: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(S, "and", collect(terms))
}

/// # Errors
/// Propagates argument errors.
pub fn or<I>(terms: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(S, "or", collect(terms))
}

/// # Errors
/// Propagates argument errors.
pub fn not(term: impl IntoExpression) -> Result<Expression> {
    call(S, "not", vec![term.into_expression()])
}
