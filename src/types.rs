//! Serializer/parser dispatch (spec §4.5). `xitca-postgres`'s `row/types.rs` dispatches
//! on a `postgres_types::FromSql` impl plus a `Type` decoded from the binary wire
//! protocol; this protocol never puts a binary value on the wire at all — every cell is
//! either JSON-native or the literal strings `"t"`/`"f"`, so dispatch here keys off the
//! column `oid` against a small pluggable table instead of a trait object per Rust type.
//!
//! The serializer side doesn't need runtime probing the way the distilled description
//! suggests: Rust's type system already performs that dispatch at compile time via
//! [`IntoParam`] impls, so a statement's parameters are typed at the call site rather
//! than discovered by trying serializers in turn.

use bytes::Bytes;

use crate::frame::{ParamFormat, RawParameter};

/// A parameter value ready to be serialized onto the wire. Construct directly, or via
/// [`IntoParam`] for the common Rust types spec §4.5's default serializer table covers.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Pre-formatted ISO-8601 text. No date/time type is pulled in for this: the
    /// teacher's dependency stack carries none, so formatting is the caller's job.
    Date(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Param {
    pub(crate) fn into_raw(self) -> RawParameter {
        match self {
            Param::Null => RawParameter::Null,
            Param::Text(s) => RawParameter::text(s),
            Param::Bool(b) => RawParameter::text(if b { "t" } else { "f" }),
            Param::Int(i) => RawParameter::text(i.to_string()),
            Param::Float(f) => RawParameter::text(f.to_string()),
            Param::Date(s) => RawParameter::text(s),
            Param::Json(v) => RawParameter::text(v.to_string()),
            Param::Bytes(b) => RawParameter::bytes(Bytes::from(b), ParamFormat::Binary),
        }
    }
}

/// Converts a Rust value into a [`Param`] (spec §4.5's serializer dispatch, resolved at
/// compile time: `Date → ISO-8601 text`, `bigint → decimal text`, `boolean → "t"/"f"`,
/// `number → decimal text`).
pub trait IntoParam {
    fn into_param(self) -> Param;
}

impl IntoParam for Param {
    fn into_param(self) -> Param {
        self
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Param {
        Param::Text(self.to_string())
    }
}

impl IntoParam for String {
    fn into_param(self) -> Param {
        Param::Text(self)
    }
}

impl IntoParam for bool {
    fn into_param(self) -> Param {
        Param::Bool(self)
    }
}

macro_rules! int_into_param {
    ($($t:ty),*) => {
        $(impl IntoParam for $t {
            fn into_param(self) -> Param {
                Param::Int(self as i64)
            }
        })*
    };
}
int_into_param!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! float_into_param {
    ($($t:ty),*) => {
        $(impl IntoParam for $t {
            fn into_param(self) -> Param {
                Param::Float(self as f64)
            }
        })*
    };
}
float_into_param!(f32, f64);

impl<T: IntoParam> IntoParam for Option<T> {
    fn into_param(self) -> Param {
        match self {
            Some(v) => v.into_param(),
            None => Param::Null,
        }
    }
}

/// A parsed cell value (spec §4.5's default parser table, keyed on column `oid`).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

type ParserFn = dyn Fn(Option<&str>) -> Option<Value> + Send + Sync;

/// Per-client pluggable oid → parser dispatch. User entries are probed before the
/// built-in defaults, matching spec §4.5 "user-provided list ... defaults last".
#[derive(Default)]
pub struct ParserTable {
    user: Vec<(u32, Box<ParserFn>)>,
}

impl ParserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or override) the parser used for a given type oid.
    pub fn register(&mut self, oid: u32, parser: impl Fn(Option<&str>) -> Option<Value> + Send + Sync + 'static) {
        self.user.retain(|(o, _)| *o != oid);
        self.user.push((oid, Box::new(parser)));
    }

    /// Parse one cell. Unknown oids return the raw string (spec §4.5), `null` is always
    /// handled explicitly regardless of oid.
    pub fn parse(&self, oid: u32, raw: Option<&str>) -> Value {
        if raw.is_none() {
            return Value::Null;
        }
        if let Some((_, parser)) = self.user.iter().find(|(o, _)| *o == oid) {
            if let Some(v) = parser(raw) {
                return v;
            }
        }
        default_parse(oid, raw)
    }
}

/// oids per spec §4.5: `bool(16)`, `int2/int4(21/23)`, `int8(20)`, `float4/float8(700/701)`,
/// `text/varchar(25/1043)`, `json/jsonb(114/3802)`.
fn default_parse(oid: u32, raw: Option<&str>) -> Value {
    let Some(s) = raw else { return Value::Null };
    match oid {
        16 => Value::Bool(s == "t"),
        21 | 23 | 20 => s.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(s.to_string())),
        700 | 701 => s.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(s.to_string())),
        25 | 1043 => Value::Text(s.to_string()),
        114 | 3802 => serde_json::from_str(s).map(Value::Json).unwrap_or_else(|_| Value::Text(s.to_string())),
        _ => Value::Text(s.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::RawParameter;

    fn inline_text(raw: RawParameter) -> String {
        match raw {
            RawParameter::Text(s) => s,
            _ => panic!("expected RawParameter::Text"),
        }
    }

    #[test]
    fn default_serializers_match_spec_table() {
        assert_eq!(inline_text(true.into_param().into_raw()), "t");
        assert_eq!(inline_text(false.into_param().into_raw()), "f");
        assert_eq!(inline_text(42i32.into_param().into_raw()), "42");
        assert_eq!(inline_text(3.5f64.into_param().into_raw()), "3.5");
        assert_eq!(Option::<i32>::None.into_param(), Param::Null);
    }

    #[test]
    fn default_parsers_cover_spec_oids() {
        let table = ParserTable::new();
        assert_eq!(table.parse(16, Some("t")), Value::Bool(true));
        assert_eq!(table.parse(23, Some("7")), Value::Int(7));
        assert_eq!(table.parse(20, Some("9000000000")), Value::Int(9000000000));
        assert_eq!(table.parse(701, Some("1.5")), Value::Float(1.5));
        assert_eq!(table.parse(25, Some("hi")), Value::Text("hi".into()));
        assert_eq!(table.parse(114, Some("{\"a\":1}")), Value::Json(serde_json::json!({"a":1})));
        assert_eq!(table.parse(9999, None), Value::Null);
        assert_eq!(table.parse(9999, Some("raw")), Value::Text("raw".into()));
    }

    #[test]
    fn user_parser_is_probed_before_default() {
        let mut table = ParserTable::new();
        table.register(25, |raw| raw.map(|s| Value::Text(s.to_uppercase())));
        assert_eq!(table.parse(25, Some("hi")), Value::Text("HI".into()));
    }
}
