//! Elimination of rewrite arguments.
//!
//! DSL functions attach author-time intent (closures, maps, output types) as
//! tagged [`RewritePayload`] constants. Before a call is rendered every such
//! argument is consumed here, left to right, until only normal arguments remain.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::dsl::Query;
use crate::error::{Error, Result};
use crate::eval::{EvalScope, Evaluator, ParamSink};
use crate::expr::{Call, Constant, Expression, IT, Part, ReturnType, RootSymbol};
use crate::query_object::QueryObject;
use crate::signature::{ArgKind, ArgSignature, ArgType, FunctionSignature, RewriteKind};
use crate::types::{OutputType, TypeRef};
use crate::value::Value;

/// Builds the sub-query options of an expanded navigation property.
pub type ExpandFn = Arc<dyn Fn(&QueryObject) -> Result<Vec<Query>> + Send + Sync>;

/// Builds a raw filter from rendered property paths.
pub type RawFilterFn = Arc<dyn Fn(&BTreeMap<String, String>) -> String + Send + Sync>;

#[derive(Clone)]
pub enum MapperFn {
    /// Maps one value; applied per element to lists.
    Scalar(Arc<dyn Fn(&Value) -> String + Send + Sync>),
    /// Maps a whole list at once.
    List(Arc<dyn Fn(&[Value]) -> String + Send + Sync>),
}

/// Custom literal formatting for the constant operands of a comparison.
#[derive(Clone)]
pub struct Mapper {
    pub element_type: TypeRef,
    pub map: MapperFn,
}

impl Mapper {
    #[must_use]
    pub fn scalar(element_type: TypeRef, f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        Self {
            element_type,
            map: MapperFn::Scalar(Arc::new(f)),
        }
    }

    #[must_use]
    pub fn list(element_type: TypeRef, f: impl Fn(&[Value]) -> String + Send + Sync + 'static) -> Self {
        Self {
            element_type,
            map: MapperFn::List(Arc::new(f)),
        }
    }

    fn apply(&self, value: &Value, parameter: &str) -> Result<String> {
        let unsupported = |reason: &str| Error::UnsupportedMapperShape {
            type_name: self.element_type.to_string(),
            parameter: parameter.to_owned(),
            reason: reason.to_owned(),
        };
        match (&self.map, value) {
            (_, Value::List(items)) if items.iter().any(Value::is_list) => {
                Err(unsupported("nested lists cannot be mapped"))
            }
            (MapperFn::Scalar(f), Value::List(items)) => {
                let mapped: Vec<String> = items.iter().map(f.as_ref()).collect();
                Ok(format!("({})", mapped.join(",")))
            }
            (MapperFn::Scalar(f), scalar) => Ok(f(scalar)),
            (MapperFn::List(f), Value::List(items)) => Ok(f(items)),
            (MapperFn::List(_), _) => Err(unsupported("a list mapper needs a list argument")),
        }
    }
}

/// Author-time intent carried by a rewrite argument.
#[derive(Clone)]
pub enum RewritePayload {
    CustomQuery(String),
    ExpandAnd(ExpandFn),
    ExpandCount,
    Mapper(Mapper),
    FilterRawProps(BTreeMap<String, Expression>),
    FilterRawExecutor(RawFilterFn),
    OutputType(OutputType),
}

impl RewritePayload {
    #[must_use]
    pub fn kind(&self) -> RewriteKind {
        match self {
            RewritePayload::CustomQuery(_) => RewriteKind::CustomQueryArg,
            RewritePayload::ExpandAnd(_) => RewriteKind::ExpandAnd,
            RewritePayload::ExpandCount => RewriteKind::ExpandCount,
            RewritePayload::Mapper(_) => RewriteKind::Mapper,
            RewritePayload::FilterRawProps(_) => RewriteKind::FilterRawProps,
            RewritePayload::FilterRawExecutor(_) => RewriteKind::FilterRawExecutor,
            RewritePayload::OutputType(_) => RewriteKind::OutputType,
        }
    }
}

impl fmt::Debug for RewritePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewritePayload::CustomQuery(name) => f.debug_tuple("CustomQuery").field(name).finish(),
            RewritePayload::ExpandAnd(_) => f.write_str("ExpandAnd(<fn>)"),
            RewritePayload::ExpandCount => f.write_str("ExpandCount"),
            RewritePayload::Mapper(m) => f
                .debug_struct("Mapper")
                .field("element_type", &m.element_type)
                .finish_non_exhaustive(),
            RewritePayload::FilterRawProps(props) => f
                .debug_tuple("FilterRawProps")
                .field(&props.keys().collect::<Vec<_>>())
                .finish(),
            RewritePayload::FilterRawExecutor(_) => f.write_str("FilterRawExecutor(<fn>)"),
            RewritePayload::OutputType(o) => f.debug_tuple("OutputType").field(o).finish(),
        }
    }
}

/// Result of applying one rewrite.
#[derive(Debug)]
pub enum Rewrite {
    /// The call changed and may contain further rewrite arguments.
    RewrittenCall(Call),
    /// The call is replaced by a finished expression.
    ReplacedCall(Expression),
}

/// Apply rewrites to `call` until no rewrite argument is left.
///
/// # Errors
/// `Error::RewriteArgMismatch` when an argument does not carry the payload its
/// descriptor declares, plus any error raised while building sub-queries.
pub fn rewrite_call(call: &Call, ev: &Evaluator<'_>, sink: &mut ParamSink) -> Result<Expression> {
    let mut current = call.clone();
    loop {
        let Some(index) = current
            .args
            .iter()
            .position(|(_, sig)| sig.rewrite_kind().is_some())
        else {
            return Ok(Expression::Call(current));
        };
        tracing::trace!(
            target: "odata_query::rewrite",
            function = %current.signature.name,
            parameter = %current.args[index].1.name,
            "applying rewrite"
        );
        match apply(&current, index, ev, sink)? {
            Rewrite::RewrittenCall(next) => current = next,
            Rewrite::ReplacedCall(expr) => return Ok(expr),
        }
    }
}

fn mismatch(call: &Call, sig: &ArgSignature) -> Error {
    Error::RewriteArgMismatch {
        parameter: sig.name.clone(),
        signature: call.signature.to_string(),
    }
}

fn payload<'c>(call: &'c Call, index: usize) -> Result<&'c RewritePayload> {
    let (expr, sig) = &call.args[index];
    match (expr, sig.rewrite_kind()) {
        (
            Expression::Const {
                value: Constant::Rewrite(p),
                ..
            },
            Some(kind),
        ) if p.kind() == kind => Ok(p),
        _ => Err(mismatch(call, sig)),
    }
}

/// `call` without the arguments at `indices`; the signature follows.
fn without_args(call: &Call, indices: &BTreeSet<usize>) -> Call {
    let removed: BTreeSet<&str> = indices
        .iter()
        .map(|&i| call.args[i].1.name.as_str())
        .collect();
    let declared = call
        .signature
        .args
        .iter()
        .filter(|a| !removed.contains(a.name.as_str()))
        .cloned()
        .collect();
    Call {
        this: call.this.clone(),
        args: call
            .args
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, a)| a.clone())
            .collect(),
        signature: call
            .signature
            .reshaped(declared, call.signature.style.clone()),
        generic_bindings: call.generic_bindings.clone(),
    }
}

fn apply(call: &Call, index: usize, ev: &Evaluator<'_>, sink: &mut ParamSink) -> Result<Rewrite> {
    match payload(call, index)? {
        RewritePayload::CustomQuery(name) => {
            let mut next = without_args(call, &BTreeSet::from([index]));
            next.this = Some(Box::new(Expression::RootSymbol(RootSymbol::custom(
                name.clone(),
            ))));
            Ok(Rewrite::RewrittenCall(next))
        }
        RewritePayload::OutputType(output) => Ok(Rewrite::RewrittenCall(resolve_output(
            call, index, *output,
        ))),
        RewritePayload::Mapper(mapper) => map_constants(call, index, mapper),
        RewritePayload::FilterRawProps(props) => raw_filter(call, index, props, ev, sink),
        RewritePayload::FilterRawExecutor(_) => Err(mismatch(call, &call.args[index].1)),
        RewritePayload::ExpandAnd(_) | RewritePayload::ExpandCount => {
            expand_sub_query(call, index, ev)
        }
    }
}

fn resolve_output(call: &Call, index: usize, output: OutputType) -> Call {
    let mut next = without_args(call, &BTreeSet::from([index]));
    let target = output.type_ref();
    let resolved = match &call.signature.output_type {
        ReturnType::Polymorphic(container) => container.by_output(&target).map(|overload| {
            Arc::new(FunctionSignature {
                constructed_from: Some(Arc::clone(&call.signature)),
                ..(**overload).clone()
            })
        }),
        ReturnType::Type(_) => None,
    };
    next.signature = resolved.unwrap_or_else(|| next.signature.narrowed(target));
    next
}

fn declares_list(sig: &ArgSignature) -> bool {
    matches!(
        &sig.kind,
        ArgKind::Normal {
            arg_type: ArgType::GenericCollection(_),
            ..
        }
    ) || matches!(
        &sig.kind,
        ArgKind::Normal {
            arg_type: ArgType::Concrete(t),
            ..
        } if t.is_collection()
    )
}

fn map_constants(call: &Call, index: usize, mapper: &Mapper) -> Result<Rewrite> {
    let mut next = without_args(call, &BTreeSet::from([index]));
    let mut args = Vec::with_capacity(next.args.len());
    for (expr, sig) in next.args {
        let mapped = match &expr {
            Expression::Const {
                value: Constant::Value(value),
                ..
            } if !matches!(value, Value::Null | Value::Raw(_)) => {
                if value.is_list() != declares_list(&sig) {
                    return Err(Error::UnsupportedMapperShape {
                        type_name: mapper.element_type.to_string(),
                        parameter: sig.name.clone(),
                        reason: "argument shape does not match its declared type".to_owned(),
                    });
                }
                Expression::raw(mapper.apply(value, &sig.name)?)
            }
            _ => expr,
        };
        args.push((mapped, sig));
    }
    next.args = args;
    Ok(Rewrite::RewrittenCall(next))
}

fn raw_filter(
    call: &Call,
    index: usize,
    props: &BTreeMap<String, Expression>,
    ev: &Evaluator<'_>,
    sink: &mut ParamSink,
) -> Result<Rewrite> {
    let executor = match call.args.get(index + 1) {
        Some(_) => match payload(call, index + 1)? {
            RewritePayload::FilterRawExecutor(f) => f,
            _ => return Err(mismatch(call, &call.args[index + 1].1)),
        },
        None => return Err(mismatch(call, &call.args[index].1)),
    };
    let scope = EvalScope::new(IT);
    let mut paths = BTreeMap::new();
    for (name, expr) in props {
        let rendered = ev.evaluate_in(expr, &scope, sink)?;
        paths.insert(name.clone(), rendered.text.unwrap_or_default());
    }
    Ok(Rewrite::ReplacedCall(Expression::raw(executor(&paths))))
}

fn expand_sub_query(call: &Call, index: usize, ev: &Evaluator<'_>) -> Result<Rewrite> {
    let Some(target_index) = index.checked_sub(1) else {
        return Err(mismatch(call, &call.args[index].1));
    };
    let (target, target_sig) = &call.args[target_index];
    if target_sig.rewrite_kind().is_some() {
        return Err(mismatch(call, &call.args[index].1));
    }

    let mut consumed = BTreeSet::new();
    let mut options = Vec::new();
    let mut seen = BTreeSet::new();
    for i in index..call.args.len() {
        let sig = &call.args[i].1;
        if !matches!(
            sig.rewrite_kind(),
            Some(RewriteKind::ExpandAnd | RewriteKind::ExpandCount)
        ) {
            break;
        }
        match payload(call, i)? {
            RewritePayload::ExpandCount => {
                let is_collection = target
                    .concrete_type()
                    .is_some_and(TypeRef::is_collection);
                if !is_collection {
                    return Err(mismatch(call, sig));
                }
                push_option(
                    &mut options,
                    &mut seen,
                    "$count",
                    Expression::raw("true"),
                    TypeRef::edm("Boolean"),
                )?;
            }
            RewritePayload::ExpandAnd(build) => {
                let target_type = target.concrete_type().ok_or_else(|| mismatch(call, sig))?;
                let element = match target_type {
                    TypeRef::Collection { .. } => target_type.element()?.clone(),
                    single => single.clone(),
                };
                let object = QueryObject::new(
                    Arc::clone(ev.schema()),
                    element.clone(),
                    RootSymbol::new(IT, element),
                )?;
                for query in build(&object)? {
                    let name = query.param_name()?;
                    let expr = query.into_expression();
                    let ty = expr
                        .concrete_type()
                        .cloned()
                        .unwrap_or_else(TypeRef::raw);
                    push_option(&mut options, &mut seen, &name, expr, ty)?;
                }
            }
            _ => return Err(mismatch(call, sig)),
        }
        consumed.insert(i);
    }

    let mut parts = vec![Part::Expr(target.clone())];
    if !options.is_empty() {
        parts.push(Part::Literal("(".to_owned()));
        for (i, option) in options.into_iter().enumerate() {
            if i > 0 {
                parts.push(Part::Literal(";".to_owned()));
            }
            parts.push(Part::Expr(option));
        }
        parts.push(Part::Literal(")".to_owned()));
    }
    let return_type = target
        .return_type()
        .unwrap_or_else(|| ReturnType::Type(TypeRef::raw()));

    let mut next = without_args(call, &consumed);
    if let Some(slot) = next.args.get_mut(target_index) {
        slot.0 = Expression::StringBuilder { parts, return_type };
    }
    Ok(Rewrite::RewrittenCall(next))
}

fn push_option(
    options: &mut Vec<Expression>,
    seen: &mut BTreeSet<String>,
    name: &str,
    expr: Expression,
    type_ref: TypeRef,
) -> Result<()> {
    if !seen.insert(name.to_owned()) {
        return Err(Error::MultipleClauses {
            clause: name.trim_start_matches('$').to_owned(),
            hint: crate::dsl::combine_hint(name).to_owned(),
        });
    }
    options.push(
        expr.named(RootSymbol::new(name, type_ref))
            .re_contexted(IT),
    );
    Ok(())
}
