use std::sync::Arc;

use super::query_string::{ODataUriParts, UriWithMetadata, encode_component};
use super::{Accept, KeySelection, KeyValue, UriOptions, UriPart, UriPartStream};
use crate::dsl::{Query, combine_hint};
use crate::entity_set::EntitySet;
use crate::error::{Error, Result};
use crate::eval::{Evaluator, ParamSink};
use crate::expr::{AtParam, AtParamPayload};
use crate::schema::{Schema, TypeKind};
use crate::types::TypeRef;
use crate::value::{DefaultSerializer, Value, ValueSerializer};

/// Folds a [`UriPartStream`] into a [`UriWithMetadata`].
#[derive(Clone)]
pub struct UriMapper {
    schema: Arc<Schema>,
    serializer: Arc<dyn ValueSerializer>,
    options: UriOptions,
}

impl std::fmt::Debug for UriMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UriMapper")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl UriMapper {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            serializer: Arc::new(DefaultSerializer),
            options: UriOptions::default(),
        }
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ValueSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: UriOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn options(&self) -> UriOptions {
        self.options
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Materialize `stream` relative to `uri_root`.
    ///
    /// # Errors
    /// Any path, key, cast or query error; nothing is partially built.
    pub fn map(&self, uri_root: &str, stream: &UriPartStream) -> Result<UriWithMetadata> {
        let evaluator = Evaluator::new(&self.schema, self.serializer.as_ref());
        let work = stream
            .parts()
            .iter()
            .try_fold(UriRoughwork::default(), |work, part| {
                work.apply(part, self, &evaluator)
            })?;
        work.finish(uri_root, &evaluator)
    }
}

/// Intermediate state of one mapping pass.
#[derive(Debug, Default)]
struct UriRoughwork {
    accept: Accept,
    params: ParamSink,
    container: Option<String>,
    entity_set: Option<Arc<EntitySet>>,
    working_type: Option<TypeRef>,
    segments: Vec<String>,
    terminal: Option<&'static str>,
    query: Vec<(String, String)>,
}

impl UriRoughwork {
    fn apply(mut self, part: &UriPart, mapper: &UriMapper, ev: &Evaluator<'_>) -> Result<Self> {
        if let UriPart::Query(queries) = part {
            for query in queries {
                self.push_query(query, ev)?;
            }
            return Ok(self);
        }
        if let Some(terminal) = self.terminal {
            return Err(Error::CannotTraverse {
                type_name: terminal.to_owned(),
                reason: format!("{} cannot follow it", part.describe()),
            });
        }
        let Some(working) = self.working_type.clone() else {
            return self.root(part);
        };
        match part {
            UriPart::EntityContainerName(_) | UriPart::EntitySetName(_) => {
                return Err(Error::InvalidQuery(format!(
                    "{} must be the first part of a uri",
                    part.describe()
                )));
            }
            UriPart::Key(key) => self.key(&working, key, mapper)?,
            UriPart::PropertyName(name) => {
                let complex = mapper.schema.complex(&working).map_err(|_| {
                    Error::PropertyNotAllowed {
                        type_name: working.to_string(),
                        property: name.clone(),
                        reason: if working.is_collection() {
                            "select an element with a key first".to_owned()
                        } else {
                            "not a complex type".to_owned()
                        },
                    }
                })?;
                let property = mapper.schema.property(complex, name)?;
                self.segments.push(name.clone());
                self.working_type = Some(property.type_ref.clone());
            }
            UriPart::Count => {
                if !working.is_collection() {
                    return Err(Error::CannotTraverse {
                        type_name: working.to_string(),
                        reason: "$count needs a collection".to_owned(),
                    });
                }
                self.segments.push("$count".to_owned());
                self.working_type = Some(TypeRef::edm("Int64"));
                self.accept = Accept::Integer;
                self.terminal = Some("$count");
            }
            UriPart::Value => {
                let leaf = !working.is_collection()
                    && matches!(
                        mapper.schema.kind(&working)?,
                        TypeKind::Primitive | TypeKind::Enum(_)
                    );
                if !leaf {
                    return Err(Error::CannotTraverse {
                        type_name: working.to_string(),
                        reason: "$value needs a primitive or enum".to_owned(),
                    });
                }
                self.segments.push("$value".to_owned());
                self.working_type = Some(TypeRef::edm("String"));
                self.accept = Accept::Raw;
                self.terminal = Some("$value");
            }
            UriPart::Cast(target) => {
                if working.depth() > 1 {
                    return Err(Error::NestedCollection(working.to_string()));
                }
                let complex = mapper.schema.complex(working.innermost())?;
                let resolved = mapper.schema.resolve_cast(complex, target)?;
                self.segments.push(resolved.to_string());
                self.working_type = Some(resolved.wrap(working.depth()));
            }
            UriPart::Function { name, arguments } => {
                self.function(&working, name, arguments)?;
            }
            UriPart::Query(_) => {}
        }
        Ok(self)
    }

    fn root(mut self, part: &UriPart) -> Result<Self> {
        match part {
            UriPart::EntityContainerName(name) if self.container.is_none() => {
                self.container = Some(name.clone());
            }
            UriPart::EntitySetName(set) => {
                if self.container.is_none() {
                    self.container = Some(set.container_name.clone());
                }
                self.segments.push(set.name.clone());
                self.working_type = Some(set.path_type());
                self.entity_set = Some(Arc::clone(set));
            }
            other => return Err(Error::MissingUriRoot(other.describe())),
        }
        Ok(self)
    }

    fn key(&mut self, working: &TypeRef, key: &KeySelection, mapper: &UriMapper) -> Result<()> {
        let element = match working {
            TypeRef::Collection { element } if !element.is_collection() => element.as_ref(),
            _ => {
                return Err(Error::KeyNotAllowed {
                    type_name: working.to_string(),
                    reason: "keys select an element of a collection".to_owned(),
                });
            }
        };
        let entity = mapper
            .schema
            .complex(element)
            .map_err(|_| Error::KeyNotAllowed {
                type_name: working.to_string(),
                reason: "elements are not entities".to_owned(),
            })?;
        let declared = mapper.schema.key_properties(entity)?;
        let encode = |text: String| {
            if mapper.options.url_encode {
                encode_component(&text)
            } else {
                text
            }
        };
        let serialize = |value: &Value, ty: &TypeRef| {
            mapper
                .serializer
                .serialize(value, ty, &mapper.schema)
                .map(encode)
        };

        let composite = |pairs: &[(String, Value)]| -> Result<String> {
            if let Some((name, _)) = pairs
                .iter()
                .find(|(name, _)| declared.iter().all(|(d, _)| d != name))
            {
                return Err(Error::UnexpectedKeyProperty {
                    type_name: entity.full_name(),
                    property: name.clone(),
                });
            }
            let rendered = declared
                .iter()
                .map(|(name, property)| {
                    let (_, value) = pairs.iter().find(|(n, _)| n == name).ok_or_else(|| {
                        Error::MissingKeyProperty {
                            type_name: entity.full_name(),
                            property: (*name).to_owned(),
                        }
                    })?;
                    Ok(format!("{name}={}", serialize(value, &property.type_ref)?))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", rendered.join(",")))
        };

        let single = |value: &Value| -> Result<TypeRef> {
            match declared.as_slice() {
                [(_, property)] => Ok(property.type_ref.clone()),
                [] => Err(Error::NoKey {
                    type_name: entity.full_name(),
                }),
                [_, (missing, _), ..] => Err(Error::MissingKeyProperty {
                    type_name: entity.full_name(),
                    property: format!("{missing} (got the single value {value})"),
                }),
            }
        };

        match key {
            KeySelection::Raw(text) => self.append_to_last(&format!("({text})")),
            KeySelection::FunctionCall(KeyValue::Single(value)) => {
                let text = serialize(value, &single(value)?)?;
                self.append_to_last(&format!("({text})"));
            }
            KeySelection::PathSegment(KeyValue::Single(value)) => {
                let ty = single(value)?;
                let text = match value {
                    Value::String(s) => encode(s.clone()),
                    other => serialize(other, &ty)?,
                };
                self.segments.push(text);
            }
            KeySelection::FunctionCall(KeyValue::Composite(pairs)) => {
                let text = composite(pairs)?;
                self.append_to_last(&text);
            }
            KeySelection::PathSegment(KeyValue::Composite(pairs)) => {
                if !mapper.options.ignore_warnings {
                    tracing::warn!(
                        target: "odata_query::uri",
                        type_name = %entity.full_name(),
                        "composite keys cannot be written as a path segment; using key-as-function form"
                    );
                }
                let text = composite(pairs)?;
                self.append_to_last(&text);
            }
        }
        self.working_type = Some(element.clone());
        Ok(())
    }

    fn append_to_last(&mut self, text: &str) {
        if let Some(last) = self.segments.last_mut() {
            last.push_str(text);
        }
    }

    fn function(
        &mut self,
        working: &TypeRef,
        name: &str,
        arguments: &[(String, Value)],
    ) -> Result<()> {
        let set = self
            .entity_set
            .clone()
            .ok_or_else(|| Error::MissingEntitySet(format!("function '{name}'")))?;
        let function = set.bound_function(working, name)?;
        if arguments.len() != function.parameters.len() {
            return Err(Error::ArgumentCount {
                function: function.full_name(),
                expected: function.parameters.len().to_string(),
                actual: arguments.len(),
            });
        }
        let mut rendered = Vec::with_capacity(arguments.len());
        for parameter in &function.parameters {
            let (_, value) = arguments
                .iter()
                .find(|(n, _)| *n == parameter.name)
                .ok_or_else(|| {
                    Error::InvalidQuery(format!(
                        "missing argument '{}' for function '{}'",
                        parameter.name,
                        function.full_name()
                    ))
                })?;
            let alias = AtParam::constant(&parameter.name, value.clone(), parameter.type_ref.clone());
            rendered.push(format!("{}={}", parameter.name, alias.name()));
            self.params.push(&alias);
        }
        self.segments
            .push(format!("{}({})", function.full_name(), rendered.join(",")));
        self.working_type = Some(function.return_type.clone());
        Ok(())
    }

    fn push_query(&mut self, query: &Query, ev: &Evaluator<'_>) -> Result<()> {
        let key = query.param_name()?;
        let text = ev.render(query.expression(), &mut self.params)?;
        let text = match key.as_str() {
            "$expand" => text
                .replace("expandAll(true)", "*/$ref")
                .replace("expandAll()", "*"),
            "$count" if text.is_empty() => "true".to_owned(),
            _ => text,
        };
        self.push_pair(key, text)
    }

    fn push_pair(&mut self, key: String, value: String) -> Result<()> {
        if self.query.iter().any(|(k, _)| *k == key) {
            return Err(Error::MultipleClauses {
                clause: key.trim_start_matches('$').to_owned(),
                hint: combine_hint(&key).to_owned(),
            });
        }
        self.query.push((key, value));
        Ok(())
    }

    /// Render collected `@param` aliases, following references they introduce.
    fn finish(mut self, uri_root: &str, ev: &Evaluator<'_>) -> Result<UriWithMetadata> {
        let type_ref = self
            .working_type
            .clone()
            .ok_or_else(|| Error::MissingUriRoot("an empty part list".to_owned()))?;

        let mut rendered: Vec<(String, String)> = Vec::new();
        let mut done = 0;
        while done < self.params.len() {
            let param = Arc::clone(&self.params.params()[done]);
            done += 1;
            let text = match param.payload() {
                AtParamPayload::Const { value, type_ref } => {
                    ev.serializer().serialize(value, type_ref, ev.schema())?
                }
                AtParamPayload::Param(text) => text.clone(),
                AtParamPayload::Ref(expr) => ev.render(expr, &mut self.params)?,
            };
            match rendered.iter().find(|(k, _)| k == param.name()) {
                Some((_, existing)) if *existing == text => {}
                Some(_) => {
                    return Err(Error::MultipleClauses {
                        clause: param.name().to_owned(),
                        hint: "Give each @param alias a distinct name.".to_owned(),
                    });
                }
                None => rendered.push((param.name().to_owned(), text)),
            }
        }
        for (key, value) in rendered {
            self.push_pair(key, value)?;
        }

        let parts = ODataUriParts {
            uri_root: uri_root.to_owned(),
            entity_set_container_name: self.container,
            entity_set_name: self.entity_set.as_ref().map(|s| s.name.clone()),
            relative_path: self.segments.join("/"),
            query: self.query,
        };
        tracing::debug!(
            target: "odata_query::uri",
            path = %parts.relative_path,
            query_len = parts.query.len(),
            accept = ?self.accept,
            "mapped uri"
        );
        Ok(UriWithMetadata {
            accept: self.accept,
            type_ref,
            parts,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::dsl::{filter, lit, paging};
    use crate::entity_set::{BoundFunction, FunctionParameter};
    use crate::schema::{ComplexType, Property};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_complex(
                    ComplexType::new("Svc", "User")
                        .key(["Id"])
                        .property("Id", Property::new(TypeRef::edm("String")))
                        .property("Name", Property::new(TypeRef::edm("String")))
                        .property(
                            "Orders",
                            Property::new(TypeRef::collection(TypeRef::single("Svc", "Order")))
                                .navigation(),
                        )
                        .property(
                            "OrderBatches",
                            Property::new(TypeRef::collection(TypeRef::collection(
                                TypeRef::single("Svc", "Order"),
                            ))),
                        ),
                )
                .with_complex(
                    ComplexType::new("Svc", "Order")
                        .key(["UserId", "Number"])
                        .property("UserId", Property::new(TypeRef::edm("String")))
                        .property("Number", Property::new(TypeRef::edm("Int32")))
                        .property("Total", Property::new(TypeRef::edm("Double"))),
                ),
        )
    }

    fn users() -> Arc<EntitySet> {
        let user = TypeRef::single("Svc", "User");
        Arc::new(
            EntitySet::new("Default", "Users", user.clone()).function(BoundFunction {
                namespace: "Svc".to_owned(),
                name: "TopOrders".to_owned(),
                binding: user,
                parameters: vec![FunctionParameter {
                    name: "n".to_owned(),
                    type_ref: TypeRef::edm("Int32"),
                }],
                return_type: TypeRef::collection(TypeRef::single("Svc", "Order")),
            }),
        )
    }

    fn stream(parts: Vec<UriPart>) -> UriPartStream {
        UriPartStream::new()
            .push(UriPart::EntitySetName(users()))
            .unwrap()
            .extend(parts)
            .unwrap()
    }

    #[test]
    fn parts_before_the_entity_set_are_rejected() {
        let mapper = UriMapper::new(schema());
        let s = UriPartStream::new().push(UriPart::Count).unwrap();
        assert!(matches!(
            mapper.map("http://x", &s),
            Err(Error::MissingUriRoot(_))
        ));
    }

    #[test]
    fn composite_keys_are_checked_against_the_key() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("Orders".to_owned()),
            UriPart::Key(KeySelection::FunctionCall(KeyValue::composite([
                ("Number", Value::Int(3)),
                ("UserId", Value::from("abc")),
            ]))),
        ]);
        let uri = mapper.map("http://x", &s).unwrap();
        assert_eq!(uri.relative_path(), "Users('abc')/Orders(UserId='abc',Number=3)");
        assert_eq!(uri.type_ref, TypeRef::single("Svc", "Order"));

        let missing = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("Orders".to_owned()),
            UriPart::Key(KeySelection::FunctionCall(KeyValue::composite([(
                "Number",
                Value::Int(3),
            )]))),
        ]);
        assert!(matches!(
            mapper.map("http://x", &missing),
            Err(Error::MissingKeyProperty { ref property, .. }) if property == "UserId"
        ));

        let extra = stream(vec![UriPart::Key(KeySelection::FunctionCall(
            KeyValue::composite([("Id", Value::from("a")), ("Other", Value::from("b"))]),
        ))]);
        assert!(matches!(
            mapper.map("http://x", &extra),
            Err(Error::UnexpectedKeyProperty { ref property, .. }) if property == "Other"
        ));
    }

    #[test]
    #[traced_test]
    fn composite_path_segment_key_warns_and_falls_back() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::PathSegment(KeyValue::single("abc"))),
            UriPart::PropertyName("Orders".to_owned()),
            UriPart::Key(KeySelection::PathSegment(KeyValue::composite([
                ("UserId", Value::from("abc")),
                ("Number", Value::Int(1)),
            ]))),
        ]);
        let uri = mapper.map("http://x", &s).unwrap();
        assert_eq!(uri.relative_path(), "Users/abc/Orders(UserId='abc',Number=1)");
        assert!(logs_contain("composite keys cannot be written as a path segment"));
    }

    #[test]
    #[traced_test]
    fn ignore_warnings_silences_the_fallback() {
        let mapper = UriMapper::new(schema()).with_options(UriOptions {
            url_encode: true,
            ignore_warnings: true,
        });
        let s = stream(vec![
            UriPart::Key(KeySelection::Raw("'abc'".to_owned())),
            UriPart::PropertyName("Orders".to_owned()),
            UriPart::Key(KeySelection::PathSegment(KeyValue::composite([
                ("UserId", Value::from("abc")),
                ("Number", Value::Int(1)),
            ]))),
        ]);
        assert!(mapper.map("http://x", &s).is_ok());
        assert!(!logs_contain("composite keys"));
    }

    #[test]
    fn keys_need_a_collection() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("a"))),
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("b"))),
        ]);
        assert!(matches!(
            mapper.map("http://x", &s),
            Err(Error::KeyNotAllowed { .. })
        ));
    }

    #[test]
    fn bound_functions_use_param_aliases() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::Function {
                name: "TopOrders".to_owned(),
                arguments: vec![("n".to_owned(), Value::Int(5))],
            },
            UriPart::Query(vec![paging::top(2).unwrap().into()]),
        ]);
        let uri = mapper.map("http://x/", &s).unwrap();
        assert_eq!(uri.relative_path(), "Users('abc')/Svc.TopOrders(n=@n)");
        assert_eq!(uri.query_string(false), "$top=2&@n=5");
        assert!(uri.type_ref.is_collection());
    }

    #[test]
    fn terminal_segments_end_the_path() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("Name".to_owned()),
            UriPart::Value,
        ]);
        let uri = mapper.map("http://x", &s).unwrap();
        assert_eq!(uri.accept, Accept::Raw);
        assert_eq!(uri.relative_path(), "Users('abc')/Name/$value");

        let after = stream(vec![UriPart::Count, UriPart::Count]);
        assert!(matches!(
            mapper.map("http://x", &after),
            Err(Error::CannotTraverse { .. })
        ));
    }

    #[test]
    fn literal_rewrites_for_count_and_expand_all() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![UriPart::Query(vec![
            paging::count().unwrap().into(),
            crate::dsl::expand::expand_all(true).unwrap().into(),
        ])]);
        let uri = mapper.map("http://x", &s).unwrap();
        assert_eq!(uri.query_string(false), "$count=true&$expand=*/$ref");
    }

    #[test]
    fn separate_query_parts_still_share_keys() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Query(vec![filter::eq(lit(1), 1).unwrap().into()]),
            UriPart::Query(vec![filter::eq(lit(2), 2).unwrap().into()]),
        ]);
        let err = mapper.map("http://x", &s).unwrap_err();
        assert!(matches!(err, Error::MultipleClauses { ref clause, .. } if clause == "filter"));
    }

    #[test]
    fn key_literals_are_encoded_as_path_segments() {
        let mapper = UriMapper::new(schema());
        let segment = stream(vec![UriPart::Key(KeySelection::PathSegment(KeyValue::single(
            "a/b",
        )))]);
        assert_eq!(mapper.map("http://x", &segment).unwrap().relative_path(), "Users/a%2Fb");

        let call = stream(vec![UriPart::Key(KeySelection::FunctionCall(KeyValue::single(
            "John Smith",
        )))]);
        assert_eq!(
            mapper.map("http://x", &call).unwrap().relative_path(),
            "Users('John%20Smith')"
        );

        let composite = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("Orders".to_owned()),
            UriPart::Key(KeySelection::FunctionCall(KeyValue::composite([
                ("UserId", Value::from("x/y z")),
                ("Number", Value::Int(1)),
            ]))),
        ]);
        assert_eq!(
            mapper.map("http://x", &composite).unwrap().relative_path(),
            "Users('abc')/Orders(UserId='x%2Fy%20z',Number=1)"
        );
    }

    #[test]
    fn key_literals_stay_verbatim_without_url_encoding() {
        let mapper = UriMapper::new(schema()).with_options(UriOptions {
            url_encode: false,
            ignore_warnings: false,
        });
        let s = stream(vec![UriPart::Key(KeySelection::PathSegment(KeyValue::single(
            "a b",
        )))]);
        assert_eq!(mapper.map("http://x", &s).unwrap().relative_path(), "Users/a b");
    }

    #[test]
    fn nested_collections_cannot_be_cast() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("OrderBatches".to_owned()),
            UriPart::Cast("Svc.Order".to_owned()),
        ]);
        assert!(matches!(
            mapper.map("http://x", &s),
            Err(Error::NestedCollection(ref t)) if t.contains("Svc.Order")
        ));
    }

    #[test]
    fn nested_collections_cannot_take_a_key() {
        let mapper = UriMapper::new(schema());
        let s = stream(vec![
            UriPart::Key(KeySelection::FunctionCall(KeyValue::single("abc"))),
            UriPart::PropertyName("OrderBatches".to_owned()),
            UriPart::Key(KeySelection::FunctionCall(KeyValue::composite([
                ("UserId", Value::from("abc")),
                ("Number", Value::Int(1)),
            ]))),
        ]);
        assert!(matches!(
            mapper.map("http://x", &s),
            Err(Error::KeyNotAllowed { ref type_name, .. })
                if type_name.starts_with("Collection(Collection(")
        ));
    }
}
