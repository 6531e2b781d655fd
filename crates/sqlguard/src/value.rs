//! Dynamically typed cell and argument values.
//!
//! [`Value`] is what flows in both directions across the execution seam: positional
//! arguments bound into a statement, and raw cells read back out of a row before
//! they are coerced into record fields.

use crate::error::{DecodeError, OrmError, OrmResult};
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};

/// A single positional argument or result cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
    Json(serde_json::Value),
    /// A sequence. As a filter argument it is flattened into one placeholder per element.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// NULL, a zero-length byte payload, or whitespace-only text.
    ///
    /// All three decode to the destination's zero value.
    pub fn is_empty_sentinel(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Byte payloads become text; everything else is returned as is.
    pub fn normalized(&self) -> std::borrow::Cow<'_, Value> {
        match self {
            Self::Bytes(b) => {
                std::borrow::Cow::Owned(Self::Text(String::from_utf8_lossy(b).into_owned()))
            }
            other => std::borrow::Cow::Borrowed(other),
        }
    }

    /// Textual form used for string fields and generic row maps. `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Timestamp(t) => t.to_rfc3339(),
            Self::Json(j) => j.to_string(),
            Self::List(items) => array_literal(items),
        })
    }

    /// SQL literal for log output only. Embedded single quotes are doubled.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::List(items) => {
                let mut out = String::from("ARRAY[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&item.to_literal());
                }
                out.push(']');
                out
            }
            other => quote_literal(&other.to_text().unwrap_or_default()),
        }
    }

    fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
            Self::List(_) => "list",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    out.push_str(&s.replace('\'', "''"));
    out.push('\'');
    out
}

/// Postgres one-dimensional array literal: `{a,"b c",NULL}`.
fn array_literal(items: &[Value]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item.to_text() {
            None => out.push_str("NULL"),
            Some(text) => {
                let plain = !text.is_empty()
                    && !text.eq_ignore_ascii_case("null")
                    && !text
                        .chars()
                        .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace());
                if plain {
                    out.push_str(&text);
                } else {
                    out.push('"');
                    for c in text.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                }
            }
        }
    }
    out.push('}');
    out
}

// ── conversions into Value ──────────────────────────────────────────────────

macro_rules! impl_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Self::Int(i64::from(v))
            }
        }
    )*};
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(v: DateTime<Tz>) -> Self {
        Self::Timestamp(v.fixed_offset())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(naive_to_local(v))
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Timestamp(naive_to_local(v.and_time(chrono::NaiveTime::MIN)))
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Wall-clock time interpreted in the local zone. Falls back to UTC inside a DST gap.
pub(crate) fn naive_to_local(v: NaiveDateTime) -> DateTime<FixedOffset> {
    match Local.from_local_datetime(&v).earliest() {
        Some(dt) => dt.fixed_offset(),
        None => v.and_utc().fixed_offset(),
    }
}

// ── positional argument lists ───────────────────────────────────────────────

/// Anything that can be turned into an ordered positional argument list.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Value>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Value> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Vec<Value> {
        self
    }
}

impl IntoArgs for Value {
    fn into_args(self) -> Vec<Value> {
        vec![self]
    }
}

impl IntoArgs for &[Value] {
    fn into_args(self) -> Vec<Value> {
        self.to_vec()
    }
}

macro_rules! impl_into_args_scalar {
    ($($t:ty),*) => {$(
        impl IntoArgs for $t {
            fn into_args(self) -> Vec<Value> {
                vec![Value::from(self)]
            }
        }
    )*};
}

impl_into_args_scalar!(&str, String, &String, bool, i8, i16, i32, i64, u8, u16, u32, f32, f64);

impl<T: Into<Value>, const N: usize> IntoArgs for [T; N] {
    fn into_args(self) -> Vec<Value> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Build a heterogeneous argument list.
///
/// ```
/// use sqlguard::{Value, args};
/// let a: Vec<Value> = args!["active", 18, vec![1, 2]];
/// assert_eq!(a.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($v:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($v)),+]
    };
}

// ── binding into tokio-postgres ─────────────────────────────────────────────

type BoxError = Box<dyn std::error::Error + Sync + Send>;

fn is_text_type(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(b) => b.to_sql(ty, out),
            Self::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::OID {
                    u32::try_from(*i)?.to_sql(ty, out)
                } else if is_text_type(ty) {
                    i.to_string().to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Self::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if is_text_type(ty) {
                    f.to_string().to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Self::Text(s) => {
                if *ty == Type::UUID {
                    uuid::Uuid::parse_str(s)?.to_sql(ty, out)
                } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
                    Self::Int(s.trim().parse()?).to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ || *ty == Type::DATE
                {
                    match crate::decode::parse_time_text(s) {
                        Some(dt) => Self::Timestamp(dt).to_sql(ty, out),
                        None => Err(format!("cannot bind {s:?} as {ty}").into()),
                    }
                } else {
                    s.as_str().to_sql(ty, out)
                }
            }
            Self::Bytes(b) => {
                if is_text_type(ty) {
                    std::str::from_utf8(b)?.to_sql(ty, out)
                } else {
                    b.as_slice().to_sql(ty, out)
                }
            }
            Self::Timestamp(t) => {
                if *ty == Type::TIMESTAMP {
                    t.naive_local().to_sql(ty, out)
                } else if *ty == Type::DATE {
                    t.date_naive().to_sql(ty, out)
                } else if is_text_type(ty) {
                    t.to_rfc3339().to_sql(ty, out)
                } else {
                    t.with_timezone(&Utc).to_sql(ty, out)
                }
            }
            Self::Json(j) => {
                if is_text_type(ty) {
                    j.to_string().to_sql(ty, out)
                } else {
                    j.to_sql(ty, out)
                }
            }
            Self::List(items) => match ty.kind() {
                Kind::Array(_) => items.as_slice().to_sql(ty, out),
                _ => Err(format!("cannot bind a list to non-array parameter of type {ty}").into()),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

// ── decoding tokio-postgres rows ────────────────────────────────────────────

fn list<T>(items: Option<Vec<Option<T>>>) -> Value
where
    T: Into<Value>,
{
    match items {
        None => Value::Null,
        Some(v) => Value::List(v.into_iter().map(Value::from).collect()),
    }
}

/// Read one cell of a Postgres row as a dynamic [`Value`].
pub(crate) fn cell_from_row(row: &Row, idx: usize) -> OrmResult<Value> {
    let column = &row.columns()[idx];
    let ty = column.type_();

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map_or(Value::Null, Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.into()
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.into()
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(idx)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.into()
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(Value::Null, Value::Bytes)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?.into()
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?.into()
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?
            .map_or(Value::Null, |d| Value::Text(d.format("%Y-%m-%d").to_string()))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(idx)?
            .map_or(Value::Null, |t| Value::Text(t.to_string()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?.into()
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx)?.into()
    } else if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<String>>>>(idx)?)
    } else if *ty == Type::INT2_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<i16>>>>(idx)?)
    } else if *ty == Type::INT4_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?)
    } else if *ty == Type::INT8_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)?)
    } else if *ty == Type::FLOAT4_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<f32>>>>(idx)?)
    } else if *ty == Type::FLOAT8_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<f64>>>>(idx)?)
    } else if *ty == Type::BOOL_ARRAY {
        list(row.try_get::<_, Option<Vec<Option<bool>>>>(idx)?)
    } else {
        // Anything WireText cannot render must be cast in SQL.
        match row.try_get::<_, Option<WireText>>(idx) {
            Ok(v) => v.map_or(Value::Null, |t| Value::Text(t.0)),
            Err(_) => {
                return Err(OrmError::decode(
                    column.name(),
                    DecodeError::UnsupportedKind(format!("postgres type {ty}")),
                ));
            }
        }
    };
    Ok(value)
}

/// Read a Postgres row. With `wanted`, unflagged cells are skipped and read as NULL.
pub(crate) fn values_from_row(row: &Row, wanted: Option<&[bool]>) -> OrmResult<Vec<Value>> {
    (0..row.len())
        .map(|i| match wanted.and_then(|w| w.get(i)) {
            Some(false) => Ok(Value::Null),
            _ => cell_from_row(row, i),
        })
        .collect()
}

type WireError = Box<dyn std::error::Error + Sync + Send>;

/// Text form of a cell whose type has no dedicated [`Value`] arm.
///
/// Enums and text-like types arrive as UTF-8. NUMERIC, MONEY, INET and CIDR are
/// rendered from their binary wire form the way Postgres prints them.
struct WireText(String);

impl<'a> FromSql<'a> for WireText {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, WireError> {
        if let Kind::Domain(base) = ty.kind() {
            return Self::from_sql(base, raw);
        }
        let text = if *ty == Type::NUMERIC {
            numeric_text(raw)?
        } else if *ty == Type::MONEY {
            money_text(raw)?
        } else if *ty == Type::INET || *ty == Type::CIDR {
            inet_text(raw, *ty == Type::CIDR)?
        } else if is_text_wire(ty) {
            String::from_utf8(raw.to_vec())?
        } else {
            return Err(format!("no text form for postgres type {ty}").into());
        };
        Ok(Self(text))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn is_text_wire(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_))
        || *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
        || *ty == Type::XML
        || ty.name() == "citext"
}

fn be_u16(raw: &[u8], at: usize) -> Result<u16, WireError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric".into())
}

/// Binary NUMERIC: ndigits, weight, sign, dscale, then base-10000 digits.
fn numeric_text(raw: &[u8]) -> Result<String, WireError> {
    let ndigits = usize::from(be_u16(raw, 0)?);
    let weight = i32::from(be_u16(raw, 2)? as i16);
    let sign = be_u16(raw, 4)?;
    let dscale = usize::from(be_u16(raw, 6)?);
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits)
        .map(|i| be_u16(raw, 8 + 2 * i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |idx: i32| -> u16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            out.push_str(&format!("{:04}", digit(idx)));
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(idx)));
            idx += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// MONEY is an int8 count of cents.
fn money_text(raw: &[u8]) -> Result<String, WireError> {
    let cents = i64::from_be_bytes(raw.try_into().map_err(|_| "truncated money")?);
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    Ok(format!("{sign}{}.{:02}", abs / 100, abs % 100))
}

/// Binary INET/CIDR: family, prefix bits, is_cidr, address length, address.
fn inet_text(raw: &[u8], cidr: bool) -> Result<String, WireError> {
    let [family, bits, _, _, addr @ ..] = raw else {
        return Err("truncated inet".into());
    };
    let (ip, full): (IpAddr, u8) = match (*family, addr.len()) {
        (2, 4) => (Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).into(), 32),
        (3, 16) => {
            let octets: [u8; 16] = addr.try_into().map_err(|_| "truncated inet")?;
            (Ipv6Addr::from(octets).into(), 128)
        }
        _ => return Err("unknown inet family".into()),
    };
    if cidr || *bits != full {
        Ok(format!("{ip}/{bits}"))
    } else {
        Ok(ip.to_string())
    }
}

/// `kind(text)` rendering used in decode error messages.
pub(crate) fn describe(value: &Value) -> String {
    format!("{}({})", value.type_label(), value)
}
