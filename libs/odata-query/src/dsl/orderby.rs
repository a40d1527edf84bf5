//! `$orderby`

use super::{IntoExpression, call, collect};
use crate::error::Result;
use crate::expr::Expression;
use crate::signature::QueryFamily;

const O: QueryFamily = QueryFamily::OrderBy;

/// # Errors
/// Propagates argument errors.
pub fn asc(value: impl IntoExpression) -> Result<Expression> {
    call(O, "asc", vec![value.into_expression()])
}

/// # Errors
/// Propagates argument errors.
pub fn desc(value: impl IntoExpression) -> Result<Expression> {
    call(O, "desc", vec![value.into_expression()])
}

/// `$orderby=A asc,B desc`
///
/// # Errors
/// Propagates argument errors.
pub fn order_by<I>(terms: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(O, "orderBy", collect(terms))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dsl::filter;
    use crate::eval::{Evaluator, ParamSink};
    use crate::expr::{IT, RootSymbol};
    use crate::query_object::QueryObject;
    use crate::schema::{ComplexType, Property, Schema};
    use crate::types::TypeRef;
    use crate::value::DefaultSerializer;

    #[test]
    fn terms_are_comma_joined() {
        let schema = Arc::new(
            Schema::new().with_complex(
                ComplexType::new("Svc", "User")
                    .property("Name", Property::new(TypeRef::edm("String")))
                    .property("Age", Property::new(TypeRef::edm("Int32"))),
            ),
        );
        let t = TypeRef::single("Svc", "User");
        let u = QueryObject::new(Arc::clone(&schema), t.clone(), RootSymbol::new(IT, t)).unwrap();
        let expr = order_by([
            asc(u.property("Name").unwrap()).unwrap(),
            desc(filter::add(u.property("Age").unwrap(), 1).unwrap()).unwrap(),
        ])
        .unwrap();
        let text = Evaluator::new(&schema, &DefaultSerializer)
            .render(&expr, &mut ParamSink::default())
            .unwrap();
        assert_eq!(text, "Name asc,(Age add 1) desc");
    }
}
