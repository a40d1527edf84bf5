use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::{
    ArgSignature, ArgType, CallStyle, FunctionSignature, FunctionSignatureContainer, QueryFamily,
    RewriteKind,
};
use crate::error::{Error, Result};
use crate::expr::{Expression, ReturnType};
use crate::types::{OutputType, TypeRef};

const NUMERIC_OUTPUTS: [OutputType; 8] = [
    OutputType::Int64,
    OutputType::Double,
    OutputType::Decimal,
    OutputType::Single,
    OutputType::Int32,
    OutputType::Int16,
    OutputType::Byte,
    OutputType::SByte,
];

static BUILTINS: LazyLock<Builtins> = LazyLock::new(Builtins::load);

/// Shared table of built-in signatures.
#[must_use]
pub fn builtins() -> &'static Builtins {
    &BUILTINS
}

/// Result type of arithmetic and rounding operators.
///
/// An explicit output type always wins. `div` and `divby` are floating point;
/// anything else stays integral only when every operand is statically an integer.
#[must_use]
pub fn infer_numeric(op: &str, operands: &[&Expression], explicit: Option<OutputType>) -> OutputType {
    if let Some(explicit) = explicit {
        return explicit;
    }
    if matches!(op, "div" | "divby") {
        return OutputType::Double;
    }
    if !operands.is_empty() && operands.iter().all(|e| e.is_integer()) {
        OutputType::Int64
    } else {
        OutputType::Double
    }
}

#[derive(Debug)]
pub struct Builtins {
    table: HashMap<QueryFamily, HashMap<&'static str, Arc<FunctionSignatureContainer>>>,
}

impl Builtins {
    /// # Errors
    /// `Error::InvalidQuery` when no built-in has that name.
    pub fn container(
        &self,
        family: QueryFamily,
        name: &str,
    ) -> Result<&Arc<FunctionSignatureContainer>> {
        self.table
            .get(&family)
            .and_then(|by_name| by_name.get(name))
            .ok_or_else(|| Error::InvalidQuery(format!("no built-in function '{name}'")))
    }

    /// The primary overload of a built-in.
    ///
    /// # Errors
    /// `Error::InvalidQuery` when no built-in has that name.
    pub fn signature(&self, family: QueryFamily, name: &str) -> Result<Arc<FunctionSignature>> {
        self.container(family, name)?
            .primary()
            .cloned()
            .ok_or_else(|| Error::InvalidQuery(format!("built-in '{name}' has no overloads")))
    }

    /// The overload of a built-in returning `output`.
    ///
    /// # Errors
    /// `Error::InvalidQuery` when there is no such overload.
    pub fn overload(
        &self,
        family: QueryFamily,
        name: &str,
        output: OutputType,
    ) -> Result<Arc<FunctionSignature>> {
        self.container(family, name)?
            .by_output(&output.type_ref())
            .cloned()
            .ok_or_else(|| {
                Error::InvalidQuery(format!("'{name}' has no overload returning {}", output.edm_name()))
            })
    }

    fn load() -> Self {
        let mut b = Self {
            table: HashMap::new(),
        };

        for op in ["eq", "ne", "gt", "ge", "lt", "le"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(
                    name,
                    vec![
                        generic("lhs"),
                        generic("rhs").nullable(),
                        mapper_arg(),
                    ],
                    boolean(),
                    infix(name),
                )
            });
        }
        b.single(QueryFamily::Filter, "in", |name| {
            filter(
                name,
                vec![
                    generic("lhs"),
                    ArgSignature::normal("rhs", ArgType::GenericCollection("T".to_owned())),
                    mapper_arg(),
                ],
                boolean(),
                infix(name),
            )
        });
        b.single(QueryFamily::Filter, "has", |name| {
            filter(name, vec![generic("lhs"), generic("flag")], boolean(), infix(name))
        });
        for op in ["and", "or"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(
                    name,
                    vec![ArgSignature::normal("conditions", ArgType::Concrete(boolean())).repeated()],
                    boolean(),
                    infix(name),
                )
            });
        }
        b.single(QueryFamily::Filter, "not", |name| {
            filter(
                name,
                vec![ArgSignature::normal("condition", ArgType::Concrete(boolean()))],
                boolean(),
                CallStyle::Prefix {
                    operator: "not ".to_owned(),
                },
            )
        });

        for (op, as_op) in [
            ("add", "add_as"),
            ("sub", "sub_as"),
            ("mul", "mul_as"),
            ("div", "div_as"),
            ("divby", "divby_as"),
            ("mod", "mod_as"),
        ] {
            b.numeric(op, as_op, 2, infix(op));
        }
        b.numeric(
            "negate",
            "negate_as",
            1,
            CallStyle::Prefix {
                operator: "-".to_owned(),
            },
        );
        for (op, as_op) in [
            ("ceiling", "ceiling_as"),
            ("floor", "floor_as"),
            ("round", "round_as"),
        ] {
            b.numeric(op, as_op, 1, function(op));
        }

        for op in ["contains", "startswith", "endswith"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(name, vec![string("value"), string("search")], boolean(), function(name))
            });
        }
        b.single(QueryFamily::Filter, "indexof", |name| {
            filter(name, vec![string("value"), string("search")], edm("Int32"), function(name))
        });
        b.single(QueryFamily::Filter, "length", |name| {
            filter(name, vec![string("value")], edm("Int32"), function(name))
        });
        for op in ["tolower", "toupper", "trim"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(name, vec![string("value")], edm("String"), function(name))
            });
        }
        b.single(QueryFamily::Filter, "concat", |name| {
            filter(name, vec![string("left"), string("right")], edm("String"), function(name))
        });
        b.single(QueryFamily::Filter, "substring", |name| {
            filter(
                name,
                vec![
                    string("value"),
                    ArgSignature::normal("start", ArgType::Concrete(edm("Int32"))),
                    ArgSignature::normal("length", ArgType::Concrete(edm("Int32"))).optional(),
                ],
                edm("String"),
                function(name),
            )
        });
        for op in ["year", "month", "day", "hour", "minute", "second"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(name, vec![ArgSignature::normal("value", ArgType::Any)], edm("Int32"), function(name))
            });
        }
        b.single(QueryFamily::Filter, "now", |name| {
            filter(name, vec![], edm("DateTimeOffset"), function(name))
        });
        b.single(QueryFamily::Filter, "isof", |name| {
            filter(
                name,
                vec![ArgSignature::normal("value", ArgType::Any), raw_arg("type")],
                boolean(),
                function(name),
            )
        });
        b.single(QueryFamily::Filter, "cast", |name| {
            filter(
                name,
                vec![ArgSignature::normal("value", ArgType::Any), raw_arg("type")],
                TypeRef::raw(),
                function(name),
            )
        });
        for op in ["any", "all"] {
            b.single(QueryFamily::Filter, op, |name| {
                filter(
                    name,
                    vec![ArgSignature::normal("predicate", ArgType::Any).optional()],
                    boolean(),
                    function(name),
                )
            });
        }
        b.single(QueryFamily::Filter, "filterRaw", |name| {
            filter(
                name,
                vec![
                    ArgSignature::rewrite(
                        "props",
                        RewriteKind::FilterRawProps,
                        "name to expression map",
                    ),
                    ArgSignature::rewrite(
                        "executor",
                        RewriteKind::FilterRawExecutor,
                        "builds the filter from the rendered paths",
                    ),
                ],
                boolean(),
                CallStyle::Passthrough,
            )
        });

        b.single(QueryFamily::Select, "select", |name| {
            sig(
                name,
                QueryFamily::Select,
                vec![ArgSignature::normal("props", ArgType::Any).repeated()],
                TypeRef::raw(),
                joined(","),
            )
        });
        b.single(QueryFamily::Select, "selectRaw", |name| {
            sig(name, QueryFamily::Select, vec![raw_arg("value")], TypeRef::raw(), CallStyle::Passthrough)
        });

        b.single(QueryFamily::Expand, "expand", |name| {
            sig(
                name,
                QueryFamily::Expand,
                vec![
                    ArgSignature::normal("target", ArgType::Any),
                    ArgSignature::rewrite("count", RewriteKind::ExpandCount, "expand with $count")
                        .optional(),
                    ArgSignature::rewrite("and", RewriteKind::ExpandAnd, "sub-query builder")
                        .repeated(),
                ],
                TypeRef::raw(),
                CallStyle::Passthrough,
            )
        });
        b.single(QueryFamily::Expand, "expandRef", |name| {
            sig(
                name,
                QueryFamily::Expand,
                vec![ArgSignature::normal("target", ArgType::Any)],
                TypeRef::raw(),
                CallStyle::Suffix {
                    operator: "/$ref".to_owned(),
                },
            )
        });
        b.single(QueryFamily::Expand, "expandAll", |name| {
            sig(
                name,
                QueryFamily::Expand,
                vec![ArgSignature::normal("ref", ArgType::Concrete(boolean())).optional()],
                TypeRef::raw(),
                function(name),
            )
        });
        b.single(QueryFamily::Expand, "combine", |name| {
            sig(
                name,
                QueryFamily::Expand,
                vec![ArgSignature::normal("expands", ArgType::Any).repeated()],
                TypeRef::raw(),
                joined(","),
            )
        });

        for (op, suffix) in [("asc", " asc"), ("desc", " desc")] {
            b.single(QueryFamily::OrderBy, op, |name| {
                sig(
                    name,
                    QueryFamily::OrderBy,
                    vec![ArgSignature::normal("value", ArgType::Any)],
                    TypeRef::raw(),
                    CallStyle::Suffix {
                        operator: suffix.to_owned(),
                    },
                )
            });
        }
        b.single(QueryFamily::OrderBy, "orderBy", |name| {
            sig(
                name,
                QueryFamily::OrderBy,
                vec![ArgSignature::normal("terms", ArgType::Any).repeated()],
                TypeRef::raw(),
                joined(","),
            )
        });

        for op in ["term", "phrase"] {
            b.single(QueryFamily::Search, op, |name| {
                sig(name, QueryFamily::Search, vec![raw_arg("value")], TypeRef::raw(), CallStyle::Passthrough)
            });
        }
        for (op, operator) in [("and", "AND"), ("or", "OR")] {
            b.single(QueryFamily::Search, op, |name| {
                sig(
                    name,
                    QueryFamily::Search,
                    vec![ArgSignature::normal("terms", ArgType::Any).repeated()],
                    TypeRef::raw(),
                    infix(operator),
                )
            });
        }
        b.single(QueryFamily::Search, "not", |name| {
            sig(
                name,
                QueryFamily::Search,
                vec![ArgSignature::normal("term", ArgType::Any)],
                TypeRef::raw(),
                CallStyle::Prefix {
                    operator: "NOT ".to_owned(),
                },
            )
        });

        for (family, op) in [(QueryFamily::Top, "top"), (QueryFamily::Skip, "skip")] {
            b.single(family, op, |name| {
                sig(
                    name,
                    family,
                    vec![ArgSignature::normal("count", ArgType::Concrete(edm("Int64")))],
                    edm("Int64"),
                    CallStyle::Passthrough,
                )
            });
        }
        b.single(QueryFamily::Count, "count", |name| {
            sig(name, QueryFamily::Count, vec![], boolean(), joined(","))
        });
        b.single(QueryFamily::Custom, "custom", |name| {
            sig(
                name,
                QueryFamily::Custom,
                vec![
                    ArgSignature::rewrite("name", RewriteKind::CustomQueryArg, "query parameter name"),
                    ArgSignature::normal("value", ArgType::Any),
                ],
                TypeRef::raw(),
                CallStyle::Passthrough,
            )
        });

        b
    }

    fn single(
        &mut self,
        family: QueryFamily,
        name: &'static str,
        build: impl Fn(&str) -> FunctionSignature,
    ) {
        let container = FunctionSignatureContainer::overloads(name, |n| vec![build(n)]);
        self.insert(family, name, Arc::new(container));
    }

    fn insert(
        &mut self,
        family: QueryFamily,
        name: &'static str,
        container: Arc<FunctionSignatureContainer>,
    ) {
        self.table.entry(family).or_default().insert(name, container);
    }

    /// Arithmetic operators: one overload per numeric output type, plus an
    /// `<op>_as` entry whose output is resolved by an `OutputType` argument.
    fn numeric(&mut self, name: &'static str, as_name: &'static str, arity: usize, style: CallStyle) {
        let args = || {
            ["lhs", "rhs"]
                .into_iter()
                .take(arity)
                .map(|a| ArgSignature::normal(a, ArgType::Any))
                .collect::<Vec<_>>()
        };
        let container = Arc::new(FunctionSignatureContainer::overloads(name, |n| {
            NUMERIC_OUTPUTS
                .iter()
                .map(|out| filter(n, args(), out.type_ref(), style.clone()))
                .collect()
        }));
        let mut with_output = args();
        with_output.push(ArgSignature::rewrite(
            "output",
            RewriteKind::OutputType,
            "EDM output type",
        ));
        let polymorphic = FunctionSignature::new(
            name,
            QueryFamily::Filter,
            with_output,
            ReturnType::Polymorphic(Arc::clone(&container)),
            style,
        );
        let as_container = FunctionSignatureContainer::overloads(name, |_| vec![polymorphic.clone()]);
        self.insert(QueryFamily::Filter, name, container);
        self.insert(QueryFamily::Filter, as_name, Arc::new(as_container));
    }
}

fn sig(
    name: &str,
    family: QueryFamily,
    args: Vec<ArgSignature>,
    output: TypeRef,
    style: CallStyle,
) -> FunctionSignature {
    FunctionSignature::new(name, family, args, output, style)
}

fn filter(name: &str, args: Vec<ArgSignature>, output: TypeRef, style: CallStyle) -> FunctionSignature {
    sig(name, QueryFamily::Filter, args, output, style)
}

fn edm(name: &str) -> TypeRef {
    TypeRef::edm(name)
}

fn boolean() -> TypeRef {
    edm("Boolean")
}

fn generic(name: &str) -> ArgSignature {
    ArgSignature::normal(name, ArgType::Generic("T".to_owned()))
}

fn string(name: &str) -> ArgSignature {
    ArgSignature::normal(name, ArgType::Concrete(edm("String")))
}

fn raw_arg(name: &str) -> ArgSignature {
    ArgSignature::normal(name, ArgType::Concrete(TypeRef::raw()))
}

fn mapper_arg() -> ArgSignature {
    ArgSignature::rewrite("mapper", RewriteKind::Mapper, "maps T to a literal").optional()
}

fn infix(operator: &str) -> CallStyle {
    CallStyle::Infix {
        operator: operator.to_owned(),
    }
}

fn function(name: &str) -> CallStyle {
    CallStyle::FunctionCall {
        rendered_name: name.to_owned(),
    }
}

fn joined(separator: &str) -> CallStyle {
    CallStyle::Joined {
        separator: separator.to_owned(),
    }
}
