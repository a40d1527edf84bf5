//! `$filter` operators and functions.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{IntoExpression, call, collect};
use crate::error::Result;
use crate::expr::{AtParam, Expression, Part, ReturnType};
use crate::query_object::QueryObject;
use crate::rewrite::{Mapper, RewritePayload};
use crate::signature::{QueryFamily, builtins, infer_numeric};
use crate::types::{OutputType, TypeRef};
use crate::value::Value;

const F: QueryFamily = QueryFamily::Filter;

/// A comparison (`eq`, `ne`, `gt`, `ge`, `lt`, `le`), optionally formatting
/// constant operands with `mapper`.
///
/// # Errors
/// `Error::InvalidQuery` for an unknown operator.
pub fn compare(
    op: &str,
    lhs: impl IntoExpression,
    rhs: impl IntoExpression,
    mapper: Option<Mapper>,
) -> Result<Expression> {
    let mut args = vec![lhs.into_expression(), rhs.into_expression()];
    if let Some(mapper) = mapper {
        args.push(Expression::rewrite(RewritePayload::Mapper(mapper)));
    }
    call(F, op, args)
}

macro_rules! comparison {
    ($($name:ident),*) => {
        $(
            #[doc = concat!("`lhs ", stringify!($name), " rhs`")]
            ///
            /// # Errors
            /// Propagates argument errors.
            pub fn $name(lhs: impl IntoExpression, rhs: impl IntoExpression) -> Result<Expression> {
                compare(stringify!($name), lhs, rhs, None)
            }
        )*
    };
}

comparison!(eq, ne, gt, ge, lt, le);

/// `lhs in (v1,v2,...)`
///
/// # Errors
/// Propagates argument errors.
pub fn in_list<I>(lhs: impl IntoExpression, values: I, mapper: Option<Mapper>) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let list = Value::List(values.into_iter().map(Into::into).collect());
    let mut args = vec![lhs.into_expression(), Expression::constant(list)];
    if let Some(mapper) = mapper {
        args.push(Expression::rewrite(RewritePayload::Mapper(mapper)));
    }
    call(F, "in", args)
}

/// `lhs has flag`
///
/// # Errors
/// Propagates argument errors.
pub fn has(lhs: impl IntoExpression, flag: impl IntoExpression) -> Result<Expression> {
    call(F, "has", vec![lhs.into_expression(), flag.into_expression()])
}

/// Conjunction of every condition.
///
/// # Errors
/// Propagates argument errors.
pub fn and<I>(conditions: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(F, "and", collect(conditions))
}

/// Disjunction of every condition.
///
/// # Errors
/// Propagates argument errors.
pub fn or<I>(conditions: I) -> Result<Expression>
where
    I: IntoIterator,
    I::Item: IntoExpression,
{
    call(F, "or", collect(conditions))
}

/// # Errors
/// Propagates argument errors.
pub fn not(condition: impl IntoExpression) -> Result<Expression> {
    call(F, "not", vec![condition.into_expression()])
}

/// Binary arithmetic. The result type is inferred unless `output` is given,
/// in which case it is attached as an output-type rewrite.
///
/// # Errors
/// `Error::InvalidQuery` for an unknown operator.
pub fn arithmetic(
    op: &str,
    lhs: impl IntoExpression,
    rhs: impl IntoExpression,
    output: Option<OutputType>,
) -> Result<Expression> {
    numeric(op, vec![lhs.into_expression(), rhs.into_expression()], output)
}

fn numeric(op: &str, mut operands: Vec<Expression>, output: Option<OutputType>) -> Result<Expression> {
    if let Some(output) = output {
        operands.push(Expression::rewrite(RewritePayload::OutputType(output)));
        return call(F, &format!("{op}_as"), operands);
    }
    let refs: Vec<&Expression> = operands.iter().collect();
    let inferred = infer_numeric(op, &refs, None);
    builtins().overload(F, op, inferred)?.call(None, operands)
}

macro_rules! arithmetic_ops {
    ($($fn_name:ident => $op:literal),*) => {
        $(
            #[doc = concat!("`lhs ", $op, " rhs` with the inferred numeric type.")]
            ///
            /// # Errors
            /// Propagates argument errors.
            pub fn $fn_name(lhs: impl IntoExpression, rhs: impl IntoExpression) -> Result<Expression> {
                arithmetic($op, lhs, rhs, None)
            }
        )*
    };
}

arithmetic_ops!(add => "add", sub => "sub", mul => "mul", div => "div", divby => "divby", modulo => "mod");

macro_rules! unary_numeric {
    ($($name:ident),*) => {
        $(
            #[doc = concat!("`", stringify!($name), "` keeping `Edm.Int64` for integer input.")]
            ///
            /// # Errors
            /// Propagates argument errors.
            pub fn $name(value: impl IntoExpression) -> Result<Expression> {
                numeric(stringify!($name), vec![value.into_expression()], None)
            }
        )*
    };
}

unary_numeric!(negate, ceiling, floor, round);

macro_rules! string_predicate {
    ($($name:ident),*) => {
        $(
            #[doc = concat!("`", stringify!($name), "(value,search)`")]
            ///
            /// # Errors
            /// Propagates argument errors.
            pub fn $name(value: impl IntoExpression, search: impl IntoExpression) -> Result<Expression> {
                call(F, stringify!($name), vec![value.into_expression(), search.into_expression()])
            }
        )*
    };
}

string_predicate!(contains, startswith, endswith, indexof, concat);

macro_rules! unary_function {
    ($($name:ident),*) => {
        $(
            #[doc = concat!("`", stringify!($name), "(value)`")]
            ///
            /// # Errors
            /// Propagates argument errors.
            pub fn $name(value: impl IntoExpression) -> Result<Expression> {
                call(F, stringify!($name), vec![value.into_expression()])
            }
        )*
    };
}

unary_function!(length, tolower, toupper, trim, year, month, day, hour, minute, second);

/// `substring(value,start[,length])`
///
/// # Errors
/// Propagates argument errors.
pub fn substring(value: impl IntoExpression, start: i32, length: Option<i32>) -> Result<Expression> {
    let mut args = vec![value.into_expression(), Expression::constant(start)];
    if let Some(length) = length {
        args.push(Expression::constant(length));
    }
    call(F, "substring", args)
}

/// # Errors
/// Propagates argument errors.
pub fn now() -> Result<Expression> {
    call(F, "now", Vec::new())
}

/// `isof(value,Ns.Type)`
///
/// # Errors
/// Propagates argument errors.
pub fn isof(value: impl IntoExpression, type_ref: &TypeRef) -> Result<Expression> {
    call(
        F,
        "isof",
        vec![value.into_expression(), Expression::raw(type_ref.to_string())],
    )
}

/// `cast(value,Ns.Type)`, typed as the target.
///
/// # Errors
/// Propagates argument errors.
pub fn cast(value: impl IntoExpression, type_ref: &TypeRef) -> Result<Expression> {
    builtins()
        .signature(F, "cast")?
        .narrowed(type_ref.clone())
        .call(
            None,
            vec![value.into_expression(), Expression::raw(type_ref.to_string())],
        )
}

fn lambda(
    name: &str,
    collection: &QueryObject,
    variable: &str,
    predicate: impl FnOnce(&QueryObject) -> Result<Expression>,
) -> Result<Expression> {
    let element = collection.element(variable)?;
    let body = predicate(&element)?;
    let arg = Expression::StringBuilder {
        parts: vec![Part::Literal(format!("{variable}:")), Part::Expr(body)],
        return_type: ReturnType::Type(TypeRef::edm("Boolean")),
    };
    builtins()
        .signature(F, name)?
        .call(Some(collection.as_expression()), vec![arg])
}

/// `Collection/any(variable:predicate)`; the predicate receives the element
/// anchored at `variable`.
///
/// # Errors
/// `Error::CannotTraverse` unless `collection` is a collection.
pub fn any(
    collection: &QueryObject,
    variable: &str,
    predicate: impl FnOnce(&QueryObject) -> Result<Expression>,
) -> Result<Expression> {
    lambda("any", collection, variable, predicate)
}

/// `Collection/all(variable:predicate)`
///
/// # Errors
/// `Error::CannotTraverse` unless `collection` is a collection.
pub fn all(
    collection: &QueryObject,
    variable: &str,
    predicate: impl FnOnce(&QueryObject) -> Result<Expression>,
) -> Result<Expression> {
    lambda("all", collection, variable, predicate)
}

/// `Collection/any()`: true when the collection is not empty.
///
/// # Errors
/// Propagates argument errors.
pub fn not_empty(collection: &QueryObject) -> Result<Expression> {
    builtins()
        .signature(F, "any")?
        .call(Some(collection.as_expression()), Vec::new())
}

/// A hand-written filter. Each property expression is rendered relative to
/// `$it` and passed by name to `build`.
///
/// # Errors
/// Propagates argument errors.
pub fn filter_raw<I, K>(
    props: I,
    build: impl Fn(&BTreeMap<String, String>) -> String + Send + Sync + 'static,
) -> Result<Expression>
where
    I: IntoIterator<Item = (K, Expression)>,
    K: Into<String>,
{
    let props = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
    call(
        F,
        "filterRaw",
        vec![
            Expression::rewrite(RewritePayload::FilterRawProps(props)),
            Expression::rewrite(RewritePayload::FilterRawExecutor(Arc::new(build))),
        ],
    )
}

/// Reference to an `@param` alias; the binding is emitted with the query.
#[must_use]
pub fn param(param: &Arc<AtParam>) -> Expression {
    Expression::param(Arc::clone(param))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::dsl::lit;
    use crate::error::Error;
    use crate::eval::{Evaluator, ParamSink};
    use crate::expr::{IT, RootSymbol};
    use crate::schema::{ComplexType, EnumType, Property, Schema};
    use crate::value::DefaultSerializer;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_enum(EnumType::new("Svc", "Color", [("Red", 0), ("Blue", 1)]))
                .with_complex(
                    ComplexType::new("Svc", "Order")
                        .key(["Id"])
                        .property("Id", Property::new(TypeRef::edm("Int32")))
                        .property("Total", Property::new(TypeRef::edm("Double"))),
                )
                .with_complex(
                    ComplexType::new("Svc", "User")
                        .key(["Id"])
                        .property("Id", Property::new(TypeRef::edm("String")))
                        .property("Name", Property::new(TypeRef::edm("String")))
                        .property("Age", Property::new(TypeRef::edm("Int32")))
                        .property("Color", Property::new(TypeRef::single("Svc", "Color")))
                        .property(
                            "Orders",
                            Property::new(TypeRef::collection(TypeRef::single("Svc", "Order")))
                                .navigation(),
                        ),
                ),
        )
    }

    fn user(schema: &Arc<Schema>) -> QueryObject {
        let t = TypeRef::single("Svc", "User");
        QueryObject::new(Arc::clone(schema), t.clone(), RootSymbol::new(IT, t)).unwrap()
    }

    fn render(schema: &Arc<Schema>, expr: &Expression) -> Result<String> {
        Evaluator::new(schema, &DefaultSerializer).render(expr, &mut ParamSink::default())
    }

    #[test]
    fn integer_arithmetic_is_int64() {
        let s = schema();
        let expr = add(3, 4).unwrap();
        assert_eq!(expr.concrete_type(), Some(&TypeRef::edm("Int64")));
        assert_eq!(render(&s, &expr).unwrap(), "3 add 4");
        let expr = add(3.5, 4).unwrap();
        assert_eq!(expr.concrete_type(), Some(&TypeRef::edm("Double")));
        assert_eq!(render(&s, &expr).unwrap(), "3.5 add 4");
    }

    #[test]
    fn divby_is_double_even_for_integers() {
        let s = schema();
        let u = user(&s);
        let expr = divby(u.property("Age").unwrap(), 2).unwrap();
        assert_eq!(expr.concrete_type(), Some(&TypeRef::edm("Double")));
        assert_eq!(render(&s, &expr).unwrap(), "Age divby 2");
    }

    #[test]
    fn explicit_output_type_is_applied_at_render() {
        let s = schema();
        let expr = arithmetic("mul", 2, 3, Some(OutputType::Decimal)).unwrap();
        assert!(expr.concrete_type().is_none());
        assert_eq!(render(&s, &expr).unwrap(), "2 mul 3");
    }

    #[test]
    fn enum_literals_take_the_property_type() {
        let s = schema();
        let u = user(&s);
        let expr = eq(u.property("Color").unwrap(), "Red").unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Color eq Svc.Color'Red'");
    }

    #[test]
    fn mapper_formats_constants() {
        let s = schema();
        let u = user(&s);
        let upper = Mapper::scalar(TypeRef::edm("String"), |v| match v {
            Value::String(s) => format!("'{}'", s.to_uppercase()),
            other => other.to_string(),
        });
        let expr = compare("eq", u.property("Name").unwrap(), "bob", Some(upper.clone())).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Name eq 'BOB'");
        let expr = in_list(u.property("Name").unwrap(), ["a", "b"], Some(upper)).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Name in ('A','B')");
    }

    #[test]
    fn in_list_serializes_against_element_type() {
        let s = schema();
        let u = user(&s);
        let expr = in_list(u.property("Age").unwrap(), [1, 2, 3], None).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Age in (1,2,3)");
    }

    #[test]
    fn any_renders_a_lambda() {
        let s = schema();
        let u = user(&s);
        let orders = u.property("Orders").unwrap();
        let expr = any(&orders, "o", |o| gt(o.property("Total")?, 10.5)).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Orders/any(o:o/Total gt 10.5)");
        let expr = not_empty(&orders).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Orders/any()");
    }

    #[test]
    fn lambda_on_a_scalar_fails() {
        let s = schema();
        let u = user(&s);
        let err = all(&u.property("Name").unwrap(), "x", |x| eq(x, "a")).unwrap_err();
        assert!(matches!(err, Error::CannotTraverse { .. }));
    }

    #[test]
    fn raw_filters_receive_rendered_paths() {
        let s = schema();
        let u = user(&s);
        let expr = filter_raw(
            [("name", u.property("Name").unwrap().as_expression())],
            |paths| format!("{} eq 'x'", paths["name"]),
        )
        .unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "Name eq 'x'");
    }

    #[test]
    fn string_functions_render_as_calls() {
        let s = schema();
        let u = user(&s);
        let name = u.property("Name").unwrap();
        let expr = and([
            contains(&name, "o").unwrap(),
            not(startswith(tolower(&name).unwrap(), "x").unwrap()).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            render(&s, &expr).unwrap(),
            "contains(Name,'o') and not startswith(tolower(Name),'x')"
        );
        let expr = substring(&name, 1, Some(2)).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "substring(Name,1,2)");
    }

    #[test]
    fn params_render_as_aliases() {
        let s = schema();
        let u = user(&s);
        let p = AtParam::constant("name", "Bob", TypeRef::edm("String"));
        let expr = eq(u.property("Name").unwrap(), param(&p)).unwrap();
        let mut sink = ParamSink::default();
        let text = Evaluator::new(&s, &DefaultSerializer)
            .render(&expr, &mut sink)
            .unwrap();
        assert_eq!(text, "Name eq @name");
        assert_eq!(sink.params()[0].name(), "@name");
    }

    #[test]
    fn untyped_comparisons_use_literal_types() {
        let s = schema();
        let expr = eq(lit(1), lit(true)).unwrap();
        assert_eq!(render(&s, &expr).unwrap(), "1 eq true");
    }
}
