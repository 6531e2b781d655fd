//! Per-cell coercion from driver values into statically typed fields.
//!
//! [`convert_assign`] is evaluated once per (row, field) pair:
//!
//! 1. NULL, empty bytes, or whitespace-only text yield the field's zero value.
//!    SQL NULL and the empty string are deliberately indistinguishable here.
//! 2. Byte payloads are normalized to text, then the field type's
//!    [`FromValue::from_value`] takes over. A type that needs to parse driver values
//!    itself implements [`FromValue`] with [`FieldKind::Custom`].
//! 3. `Option<T>` recurses into `T`.
//! 4. Built-in kinds dispatch on their static kind (text, integer, float, bool,
//!    time, JSON, array).

use crate::error::{DecodeError, OrmError, OrmResult};
use crate::value::{Value, describe, naive_to_local};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Static kind of a destination field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Int,
    Uint,
    Float,
    Bool,
    Time,
    Json,
    Array,
    Bytes,
    /// The type parses driver values itself.
    Custom,
}

/// A field type that can be populated from a raw [`Value`].
pub trait FromValue: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    /// The value a field takes when the raw cell is NULL or empty.
    fn zero() -> Self;

    /// Convert a non-empty raw value.
    fn from_value(raw: &Value) -> Result<Self, DecodeError>;
}

/// Coerce `raw` into `T`.
pub fn convert_assign<T: FromValue>(raw: &Value) -> Result<T, DecodeError> {
    if raw.is_empty_sentinel() {
        return Ok(T::zero());
    }
    if T::KIND == FieldKind::Bytes {
        return T::from_value(raw);
    }
    T::from_value(&raw.normalized())
}

fn parse_failed(raw: &Value, target: &'static str) -> DecodeError {
    DecodeError::parse(describe(raw), target)
}

// ── text ────────────────────────────────────────────────────────────────────

impl FromValue for String {
    const KIND: FieldKind = FieldKind::Text;

    fn zero() -> Self {
        String::new()
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        Ok(raw.to_text().unwrap_or_default())
    }
}

// ── integers ────────────────────────────────────────────────────────────────

macro_rules! impl_from_value_int {
    ($kind:expr => $($t:ty),*) => {$(
        impl FromValue for $t {
            const KIND: FieldKind = $kind;

            fn zero() -> Self {
                0
            }

            fn from_value(raw: &Value) -> Result<Self, DecodeError> {
                match raw {
                    Value::Int(i) => <$t>::try_from(*i).map_err(|_| parse_failed(raw, stringify!($t))),
                    Value::Float(f) => {
                        let t = f.trunc();
                        if t.is_finite() && t >= <$t>::MIN as f64 && t <= <$t>::MAX as f64 {
                            Ok(t as $t)
                        } else {
                            Err(parse_failed(raw, stringify!($t)))
                        }
                    }
                    Value::Text(s) => s.trim().parse::<$t>().map_err(|_| parse_failed(raw, stringify!($t))),
                    _ => Err(parse_failed(raw, stringify!($t))),
                }
            }
        }
    )*};
}

impl_from_value_int!(FieldKind::Int => i8, i16, i32, i64, isize);
impl_from_value_int!(FieldKind::Uint => u8, u16, u32, u64, usize);

// ── floats ──────────────────────────────────────────────────────────────────

macro_rules! impl_from_value_float {
    ($($t:ty),*) => {$(
        impl FromValue for $t {
            const KIND: FieldKind = FieldKind::Float;

            fn zero() -> Self {
                0.0
            }

            fn from_value(raw: &Value) -> Result<Self, DecodeError> {
                match raw {
                    Value::Float(f) => Ok(*f as $t),
                    Value::Int(i) => Ok(*i as $t),
                    Value::Text(s) => s.trim().parse::<$t>().map_err(|_| parse_failed(raw, stringify!($t))),
                    _ => Err(parse_failed(raw, stringify!($t))),
                }
            }
        }
    )*};
}

impl_from_value_float!(f32, f64);

// ── bool ────────────────────────────────────────────────────────────────────

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl FromValue for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn zero() -> Self {
        false
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        match raw {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) => parse_bool(s.trim()).ok_or_else(|| parse_failed(raw, "bool")),
            _ => Err(parse_failed(raw, "bool")),
        }
    }
}

// ── time ────────────────────────────────────────────────────────────────────

/// Try the supported textual layouts in order; the first that parses wins.
///
/// Layouts without an offset are read as local time; the `Z` layout is UTC.
pub fn parse_time_text(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(n) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive_to_local(n));
    }
    if let Ok(n) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(n.and_utc().fixed_offset());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(naive_to_local(d.and_time(chrono::NaiveTime::MIN)));
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn time_of(raw: &Value, target: &'static str) -> Result<DateTime<FixedOffset>, DecodeError> {
    match raw {
        Value::Timestamp(t) => Ok(*t),
        Value::Text(s) => parse_time_text(s).ok_or_else(|| parse_failed(raw, target)),
        _ => Err(parse_failed(raw, target)),
    }
}

macro_rules! impl_from_value_time {
    ($($t:ty => $conv:expr),* $(,)?) => {$(
        impl FromValue for $t {
            const KIND: FieldKind = FieldKind::Time;

            fn zero() -> Self {
                <$t>::default()
            }

            fn from_value(raw: &Value) -> Result<Self, DecodeError> {
                let t = time_of(raw, stringify!($t))?;
                Ok($conv(t))
            }
        }
    )*};
}

impl_from_value_time!(
    DateTime<FixedOffset> => |t: DateTime<FixedOffset>| t,
    DateTime<Utc> => |t: DateTime<FixedOffset>| t.with_timezone(&Utc),
    DateTime<Local> => |t: DateTime<FixedOffset>| t.with_timezone(&Local),
    NaiveDateTime => |t: DateTime<FixedOffset>| t.naive_local(),
    NaiveDate => |t: DateTime<FixedOffset>| t.date_naive(),
);

// ── structured payloads ─────────────────────────────────────────────────────

impl FromValue for serde_json::Value {
    const KIND: FieldKind = FieldKind::Json;

    fn zero() -> Self {
        serde_json::Value::Null
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        match raw {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|_| parse_failed(raw, "json")),
            _ => Err(parse_failed(raw, "json")),
        }
    }
}

/// A field holding a JSON-encoded document decoded into `T`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + Default> FromValue for Json<T> {
    const KIND: FieldKind = FieldKind::Json;

    fn zero() -> Self {
        Json(T::default())
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        let parsed = match raw {
            Value::Json(v) => serde_json::from_value(v.clone()),
            Value::Text(s) => serde_json::from_str(s),
            _ => return Err(parse_failed(raw, std::any::type_name::<T>())),
        };
        parsed
            .map(Json)
            .map_err(|_| parse_failed(raw, std::any::type_name::<T>()))
    }
}

impl FromValue for uuid::Uuid {
    const KIND: FieldKind = FieldKind::Custom;

    fn zero() -> Self {
        uuid::Uuid::nil()
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        match raw {
            Value::Text(s) => uuid::Uuid::parse_str(s.trim()).map_err(|_| parse_failed(raw, "uuid")),
            _ => Err(parse_failed(raw, "uuid")),
        }
    }
}

impl FromValue for bytes::Bytes {
    const KIND: FieldKind = FieldKind::Bytes;

    fn zero() -> Self {
        bytes::Bytes::new()
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        match raw {
            Value::Bytes(b) => Ok(bytes::Bytes::copy_from_slice(b)),
            Value::Text(s) => Ok(bytes::Bytes::copy_from_slice(s.as_bytes())),
            _ => Err(parse_failed(raw, "bytes")),
        }
    }
}

// ── sequences ───────────────────────────────────────────────────────────────

/// Parse a one-dimensional Postgres array literal such as `{a,"b,c",NULL}`.
pub fn parse_array_literal(s: &str) -> Result<Vec<Option<String>>, DecodeError> {
    let fail = || DecodeError::parse(s, "array");
    let inner = s
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(fail)?;

    let mut out = Vec::new();
    if inner.trim().is_empty() {
        return Ok(out);
    }

    let mut chars = inner.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let element = if chars.peek() == Some(&'"') {
            chars.next();
            let mut buf = String::new();
            loop {
                match chars.next() {
                    Some('\\') => buf.push(chars.next().ok_or_else(fail)?),
                    Some('"') => break,
                    Some(c) => buf.push(c),
                    None => return Err(fail()),
                }
            }
            Some(buf)
        } else {
            let mut buf = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if c == '{' || c == '}' || c == '"' {
                    return Err(fail());
                }
                buf.push(c);
                chars.next();
            }
            let trimmed = buf.trim();
            if trimmed.eq_ignore_ascii_case("NULL") {
                None
            } else {
                Some(trimmed.to_string())
            }
        };
        out.push(element);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return Err(fail()),
        }
    }
    Ok(out)
}

impl<T: FromValue> FromValue for Vec<T> {
    const KIND: FieldKind = FieldKind::Array;

    fn zero() -> Self {
        Vec::new()
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        if !matches!(
            T::KIND,
            FieldKind::Text | FieldKind::Int | FieldKind::Uint | FieldKind::Float
        ) {
            return Err(DecodeError::UnsupportedKind(format!(
                "array of {}",
                std::any::type_name::<T>()
            )));
        }
        match raw {
            Value::List(items) => items
                .iter()
                .map(|item| {
                    if item.is_null() {
                        Err(parse_failed(raw, "array element"))
                    } else {
                        T::from_value(&item.normalized())
                    }
                })
                .collect(),
            Value::Text(s) => parse_array_literal(s)?
                .into_iter()
                .map(|item| match item {
                    Some(text) => T::from_value(&Value::Text(text)),
                    None => Err(parse_failed(raw, "array element")),
                })
                .collect(),
            _ => Err(parse_failed(raw, "array")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn zero() -> Self {
        None
    }

    fn from_value(raw: &Value) -> Result<Self, DecodeError> {
        T::from_value(raw).map(Some)
    }
}

// ── reading fields back out ─────────────────────────────────────────────────

/// A field type that can be bound as a statement argument.
pub trait ToValue {
    fn to_value(&self) -> OrmResult<Value>;
}

macro_rules! impl_to_value_into {
    ($($t:ty),*) => {$(
        impl ToValue for $t {
            fn to_value(&self) -> OrmResult<Value> {
                Ok(Value::from(self.clone()))
            }
        }
    )*};
}

impl_to_value_into!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    bool,
    String,
    DateTime<FixedOffset>,
    DateTime<Utc>,
    DateTime<Local>,
    NaiveDateTime,
    NaiveDate,
    uuid::Uuid,
    serde_json::Value
);

macro_rules! impl_to_value_wide {
    ($($t:ty),*) => {$(
        impl ToValue for $t {
            fn to_value(&self) -> OrmResult<Value> {
                i64::try_from(*self)
                    .map(Value::Int)
                    .map_err(|_| OrmError::Serialization(format!("{} does not fit in i64", self)))
            }
        }
    )*};
}

impl_to_value_wide!(isize, u64, usize);

impl ToValue for bytes::Bytes {
    fn to_value(&self) -> OrmResult<Value> {
        Ok(Value::Bytes(self.to_vec()))
    }
}

impl<T: Serialize> ToValue for Json<T> {
    fn to_value(&self) -> OrmResult<Value> {
        Ok(Value::Json(serde_json::to_value(&self.0)?))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> OrmResult<Value> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> OrmResult<Value> {
        self.iter()
            .map(ToValue::to_value)
            .collect::<OrmResult<Vec<_>>>()
            .map(Value::List)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use serde::Deserialize;

    #[test]
    fn empty_sentinels_yield_zero() {
        assert_eq!(convert_assign::<String>(&Value::Null).unwrap(), "");
        assert_eq!(convert_assign::<i64>(&Value::Bytes(vec![])).unwrap(), 0);
        assert_eq!(convert_assign::<bool>(&Value::Text("  ".into())).unwrap(), false);
        assert_eq!(convert_assign::<Option<i32>>(&Value::Null).unwrap(), None);
        assert!(convert_assign::<Vec<String>>(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn integers() {
        assert_eq!(convert_assign::<i64>(&Value::Bytes(b"5".to_vec())).unwrap(), 5);
        assert_eq!(convert_assign::<i32>(&Value::Float(3.9)).unwrap(), 3);
        assert_eq!(convert_assign::<i16>(&Value::Text(" -12 ".into())).unwrap(), -12);
        assert_eq!(convert_assign::<u8>(&Value::Int(255)).unwrap(), 255);
        assert!(matches!(
            convert_assign::<u8>(&Value::Int(256)),
            Err(DecodeError::ParseFailed { target: "u8", .. })
        ));
        assert!(convert_assign::<u32>(&Value::Int(-1)).is_err());
        assert!(convert_assign::<i64>(&Value::Text("abc".into())).is_err());
        assert!(convert_assign::<i64>(&Value::Bool(true)).is_err());
    }

    #[test]
    fn floats_and_bools() {
        assert_eq!(convert_assign::<f64>(&Value::Int(2)).unwrap(), 2.0);
        assert_eq!(convert_assign::<f32>(&Value::Text("1.5".into())).unwrap(), 1.5);
        assert!(convert_assign::<bool>(&Value::Int(2)).unwrap());
        assert!(!convert_assign::<bool>(&Value::Int(0)).unwrap());
        assert!(convert_assign::<bool>(&Value::Text("t".into())).unwrap());
        assert!(!convert_assign::<bool>(&Value::Bytes(b"FALSE".to_vec())).unwrap());
        assert!(convert_assign::<bool>(&Value::Text("yes".into())).is_err());
        assert!(convert_assign::<bool>(&Value::Float(1.0)).is_err());
    }

    #[test]
    fn strings_format_scalars() {
        assert_eq!(convert_assign::<String>(&Value::Int(42)).unwrap(), "42");
        assert_eq!(
            convert_assign::<String>(&Value::Bytes(b"hello".to_vec())).unwrap(),
            "hello"
        );
        assert_eq!(convert_assign::<String>(&Value::Bool(true)).unwrap(), "true");
    }

    #[test]
    fn time_layouts_in_order() {
        let t = convert_assign::<NaiveDateTime>(&Value::Text("2024-03-01 10:20:30".into()))
            .unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (10, 20, 30));

        let t = convert_assign::<DateTime<Utc>>(&Value::Text("2024-03-01T10:20:30Z".into()))
            .unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap());

        let d = convert_assign::<NaiveDate>(&Value::Text("2024-03-01".into())).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 3, 1));

        let t = convert_assign::<DateTime<Utc>>(&Value::Text(
            "2024-03-01T12:00:00+02:00".into(),
        ))
        .unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());

        assert!(convert_assign::<NaiveDate>(&Value::Text("03/01/2024".into())).is_err());
    }

    #[test]
    fn native_time_passes_through() {
        let at = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let got = convert_assign::<DateTime<Utc>>(&Value::from(at)).unwrap();
        assert_eq!(got, at);
    }

    #[test]
    fn json_documents() {
        #[derive(Debug, Default, PartialEq, Deserialize)]
        struct Prefs {
            theme: String,
        }
        let got = convert_assign::<Json<Prefs>>(&Value::Bytes(br#"{"theme":"dark"}"#.to_vec()))
            .unwrap();
        assert_eq!(got.theme, "dark");

        let got =
            convert_assign::<serde_json::Value>(&Value::Json(serde_json::json!([1, 2]))).unwrap();
        assert_eq!(got, serde_json::json!([1, 2]));

        assert!(convert_assign::<Json<Prefs>>(&Value::Text("{not json".into())).is_err());
    }

    #[test]
    fn array_literals() {
        assert_eq!(
            parse_array_literal(r#"{a,"b,c", "d\"e" ,NULL}"#).unwrap(),
            vec![
                Some("a".to_string()),
                Some("b,c".to_string()),
                Some("d\"e".to_string()),
                None
            ]
        );
        assert!(parse_array_literal("{}").unwrap().is_empty());
        assert!(parse_array_literal("{{1,2},{3,4}}").is_err());
        assert!(parse_array_literal("1,2").is_err());
        assert!(parse_array_literal(r#"{"open}"#).is_err());
    }

    #[test]
    fn sequences() {
        assert_eq!(
            convert_assign::<Vec<i64>>(&Value::Text("{1,2,3}".into())).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            convert_assign::<Vec<String>>(&Value::from(vec!["x", "y"])).unwrap(),
            vec!["x".to_string(), "y".to_string()]
        );
        assert_eq!(
            convert_assign::<Vec<f64>>(&Value::Bytes(b"{1.5,2}".to_vec())).unwrap(),
            vec![1.5, 2.0]
        );
        assert!(matches!(
            convert_assign::<Vec<bool>>(&Value::Text("{t,f}".into())),
            Err(DecodeError::UnsupportedKind(_))
        ));
        assert!(convert_assign::<Vec<String>>(&Value::Text("{a,NULL}".into())).is_err());
    }

    #[test]
    fn custom_scan_receives_text_for_bytes() {
        #[derive(Debug, PartialEq)]
        struct Money(i64);

        impl FromValue for Money {
            const KIND: FieldKind = FieldKind::Custom;

            fn zero() -> Self {
                Money(0)
            }

            fn from_value(raw: &Value) -> Result<Self, DecodeError> {
                match raw {
                    Value::Text(s) => s
                        .trim_start_matches('$')
                        .replace('.', "")
                        .parse()
                        .map(Money)
                        .map_err(|_| DecodeError::parse(s, "Money")),
                    other => Err(DecodeError::UnsupportedKind(format!("{other:?}"))),
                }
            }
        }

        assert_eq!(
            convert_assign::<Money>(&Value::Bytes(b"$12.50".to_vec())).unwrap(),
            Money(1250)
        );
        assert_eq!(convert_assign::<Option<Money>>(&Value::Null).unwrap(), None);
    }

    #[test]
    fn bytes_keep_raw_payload() {
        let raw = Value::Bytes(vec![0xff, 0x00, 0x10]);
        let got = convert_assign::<bytes::Bytes>(&raw).unwrap();
        assert_eq!(&got[..], &[0xff, 0x00, 0x10]);
    }

    #[test]
    fn to_value_round_trips_field_types() {
        assert_eq!(42_u64.to_value().unwrap(), Value::Int(42));
        assert!(u64::MAX.to_value().is_err());
        assert_eq!(Some("x".to_string()).to_value().unwrap(), Value::Text("x".into()));
        assert_eq!(None::<i32>.to_value().unwrap(), Value::Null);
        assert_eq!(
            Json(vec![1, 2]).to_value().unwrap(),
            Value::Json(serde_json::json!([1, 2]))
        );
    }
}
