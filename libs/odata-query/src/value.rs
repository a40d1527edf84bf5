//! Literal values and their OData URI serialization.
//!
//! The core only decides *which* EDM type a value is serialized as; the
//! [`ValueSerializer`] collaborator owns the per-type literal encoding. The
//! [`DefaultSerializer`] covers the EDM primitives, enums and lists.

use std::fmt;

use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::{Schema, TypeKind};
use crate::types::TypeRef;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    Guid(Uuid),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    Duration(chrono::Duration),
    Binary(Vec<u8>),
    /// Enum member by name, e.g. `Red`.
    Member(String),
    List(Vec<Value>),
    /// Already a valid OData literal, never re-encoded.
    Raw(String),
}

impl Value {
    /// Best-effort EDM type when no declared type is available.
    #[must_use]
    pub fn default_type(&self) -> TypeRef {
        match self {
            Value::Bool(_) => TypeRef::edm("Boolean"),
            Value::Int(_) => TypeRef::edm("Int64"),
            Value::Float(_) => TypeRef::edm("Double"),
            Value::Decimal(_) => TypeRef::edm("Decimal"),
            Value::Null | Value::String(_) | Value::Member(_) => TypeRef::edm("String"),
            Value::Guid(_) => TypeRef::edm("Guid"),
            Value::DateTimeOffset(_) => TypeRef::edm("DateTimeOffset"),
            Value::Date(_) => TypeRef::edm("Date"),
            Value::TimeOfDay(_) => TypeRef::edm("TimeOfDay"),
            Value::Duration(_) => TypeRef::edm("Duration"),
            Value::Binary(_) => TypeRef::edm("Binary"),
            Value::List(items) => TypeRef::collection(
                items
                    .first()
                    .map_or_else(|| TypeRef::edm("String"), Value::default_type),
            ),
            Value::Raw(_) => TypeRef::raw(),
        }
    }

    /// Whether the value is an integral number literal.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Int(_))
            || matches!(self, Value::Decimal(d) if d.is_integer())
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) | Value::Member(s) | Value::Raw(s) => write!(f, "\"{s}\""),
            Value::Guid(g) => write!(f, "{g}"),
            Value::DateTimeOffset(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::TimeOfDay(t) => write!(f, "{t}"),
            Value::Duration(d) => write!(f, "{d}"),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write!(f, "<list of {}>", items.len()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(via $conv:ident)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v $(.$conv())?)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    BigDecimal => Decimal,
    String => String,
    &str => String via to_owned,
    Uuid => Guid,
    DateTime<FixedOffset> => DateTimeOffset,
    NaiveDate => Date,
    NaiveTime => TimeOfDay,
    chrono::Duration => Duration,
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<DateTime<chrono::Utc>> for Value {
    fn from(v: DateTime<chrono::Utc>) -> Self {
        Value::DateTimeOffset(v.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Serializes a value as a URI literal of the given type.
pub trait ValueSerializer: Send + Sync {
    /// # Errors
    /// Returns `Error::Serialize` when the value cannot be represented as `type_ref`.
    fn serialize(&self, value: &Value, type_ref: &TypeRef, schema: &Schema) -> Result<String>;
}

/// EDM literal encoding following the OData v4 ABNF.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSerializer;

impl DefaultSerializer {
    fn mismatch(value: &Value, type_ref: &TypeRef) -> Error {
        Error::Serialize {
            value: value.to_string(),
            type_name: type_ref.to_string(),
        }
    }

    fn primitive(value: &Value, type_ref: &TypeRef, name: &str) -> Result<String> {
        let out = match (name, value) {
            ("String", Value::String(s) | Value::Member(s)) => quote(s),
            ("String", other) => quote(&other.to_string()),
            ("Boolean", Value::Bool(b)) => b.to_string(),
            (
                "Byte" | "SByte" | "Int16" | "Int32" | "Int64",
                Value::Int(_) | Value::Decimal(_),
            )
            | ("Decimal", Value::Int(_) | Value::Decimal(_)) => value.to_string(),
            ("Double" | "Single", Value::Float(x)) => format_float(*x),
            ("Double" | "Single", Value::Int(i)) => i.to_string(),
            ("Double" | "Single", Value::Decimal(d)) => d.to_string(),
            ("Decimal", Value::Float(x)) => format_float(*x),
            ("Guid", Value::Guid(g)) => g.to_string(),
            ("Guid", Value::String(s)) => Uuid::parse_str(s)
                .map_err(|_| Self::mismatch(value, type_ref))?
                .to_string(),
            ("DateTimeOffset", Value::DateTimeOffset(d)) => d.to_rfc3339(),
            ("Date", Value::Date(d)) => d.format("%Y-%m-%d").to_string(),
            ("TimeOfDay", Value::TimeOfDay(t)) => t.format("%H:%M:%S%.f").to_string(),
            ("Duration", Value::Duration(d)) => format!("duration'{}'", iso_duration(d)),
            ("Binary", Value::Binary(b)) => format!(
                "binary'{}'",
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b)
            ),
            _ => return Err(Self::mismatch(value, type_ref)),
        };
        Ok(out)
    }
}

impl ValueSerializer for DefaultSerializer {
    fn serialize(&self, value: &Value, type_ref: &TypeRef, schema: &Schema) -> Result<String> {
        match value {
            Value::Null => return Ok("null".to_owned()),
            Value::Raw(raw) => return Ok(raw.clone()),
            Value::List(items) => {
                let element = match type_ref {
                    TypeRef::Collection { element } => element.as_ref().clone(),
                    single => single.clone(),
                };
                if element.is_collection() {
                    return Err(Error::NestedCollection(type_ref.to_string()));
                }
                let parts = items
                    .iter()
                    .map(|item| self.serialize(item, &element, schema))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(format!("({})", parts.join(",")));
            }
            _ => {}
        }
        let single = type_ref.innermost();
        match schema.kind(single)? {
            TypeKind::Raw => Ok(match value {
                Value::String(s) | Value::Member(s) => s.clone(),
                other => other.to_string(),
            }),
            TypeKind::Primitive => {
                let (_, name) = single
                    .as_single()
                    .ok_or_else(|| Self::mismatch(value, type_ref))?;
                Self::primitive(value, type_ref, name)
            }
            TypeKind::Enum(e) => match value {
                Value::Member(m) | Value::String(m) if e.members.contains_key(m) => {
                    Ok(format!("{}'{m}'", e.full_name()))
                }
                Value::Int(i) => Ok(format!("{}'{i}'", e.full_name())),
                _ => Err(Self::mismatch(value, type_ref)),
            },
            TypeKind::Complex(_) => Err(Self::mismatch(value, type_ref)),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_owned()
    } else if x.is_infinite() {
        (if x > 0.0 { "INF" } else { "-INF" }).to_owned()
    } else {
        x.to_string()
    }
}

fn iso_duration(d: &chrono::Duration) -> String {
    let sign = if *d < chrono::Duration::zero() { "-" } else { "" };
    let abs = d.abs();
    let days = abs.num_days();
    let hours = abs.num_hours() % 24;
    let minutes = abs.num_minutes() % 60;
    let seconds = abs.num_seconds() % 60;
    let millis = abs.num_milliseconds() % 1000;
    let fraction = if millis > 0 {
        format!(".{millis:03}")
    } else {
        String::new()
    };
    format!("{sign}P{days}DT{hours}H{minutes}M{seconds}{fraction}S")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::schema::EnumType;

    fn ser(value: Value, ty: TypeRef) -> Result<String> {
        let schema = Schema::new().with_enum(EnumType::new("Svc", "Color", [("Red", 0), ("Blue", 1)]));
        DefaultSerializer.serialize(&value, &ty, &schema)
    }

    #[test]
    fn strings_are_quoted_and_escaped() {
        assert_eq!(ser("O'Neil".into(), TypeRef::edm("String")).unwrap(), "'O''Neil'");
    }

    #[test]
    fn numbers_follow_declared_type() {
        assert_eq!(ser(3.into(), TypeRef::edm("Int32")).unwrap(), "3");
        assert_eq!(ser(3.5.into(), TypeRef::edm("Double")).unwrap(), "3.5");
        assert_eq!(ser(4.into(), TypeRef::edm("Double")).unwrap(), "4");
        assert_eq!(ser(7.into(), TypeRef::edm("Decimal")).unwrap(), "7");
        assert_eq!(ser(2.5.into(), TypeRef::edm("Decimal")).unwrap(), "2.5");
        assert!(ser(3.5.into(), TypeRef::edm("Int32")).is_err());
    }

    #[test]
    fn enums_are_qualified() {
        assert_eq!(
            ser(Value::Member("Blue".to_owned()), TypeRef::single("Svc", "Color")).unwrap(),
            "Svc.Color'Blue'"
        );
        assert!(ser(Value::Member("Green".to_owned()), TypeRef::single("Svc", "Color")).is_err());
    }

    #[test]
    fn lists_serialize_elementwise() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(
            ser(list, TypeRef::collection(TypeRef::edm("String"))).unwrap(),
            "('a','b')"
        );
    }

    #[test]
    fn raw_and_null_pass_through() {
        assert_eq!(ser(Value::Raw("Name".to_owned()), TypeRef::edm("Int32")).unwrap(), "Name");
        assert_eq!(ser(Value::Null, TypeRef::edm("Int32")).unwrap(), "null");
        assert_eq!(ser(Value::Raw("x y".to_owned()), TypeRef::raw()).unwrap(), "x y");
    }

    #[test]
    fn durations_and_binary() {
        let d = chrono::Duration::seconds(3_725);
        assert_eq!(ser(d.into(), TypeRef::edm("Duration")).unwrap(), "duration'P0DT1H2M5S'");
        assert_eq!(
            ser(Value::Binary(vec![1, 2, 3]), TypeRef::edm("Binary")).unwrap(),
            "binary'AQID'"
        );
    }
}
