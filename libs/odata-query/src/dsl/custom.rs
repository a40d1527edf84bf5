//! Non-system query parameters.

use super::{IntoExpression, call};
use crate::error::Result;
use crate::expr::Expression;
use crate::rewrite::RewritePayload;
use crate::signature::QueryFamily;

/// `name=<value>` with the value serialized as an OData literal.
///
/// # Errors
/// Propagates argument errors.
pub fn custom(name: impl Into<String>, value: impl IntoExpression) -> Result<Expression> {
    call(
        QueryFamily::Custom,
        "custom",
        vec![
            Expression::rewrite(RewritePayload::CustomQuery(name.into())),
            value.into_expression(),
        ],
    )
}

/// `name=<text>` with the text taken verbatim.
///
/// # Errors
/// Propagates argument errors.
pub fn custom_raw(name: impl Into<String>, text: impl Into<String>) -> Result<Expression> {
    custom(name, Expression::raw(text))
}
