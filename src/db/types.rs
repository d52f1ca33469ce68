//! PostgreSQL row decoding.
//!
//! Rows are handed to callers as JSON maps keyed by column name. Each column's
//! PostgreSQL type name is first classified into a [`TypeCategory`], then decoded
//! with the matching Rust type:
//! - integers and floats become JSON numbers
//! - `NUMERIC` is kept as its exact string representation
//! - `BYTEA` is base64 encoded
//! - dates and timestamps are rendered as ISO-8601 strings
//! - anything else is read as text, or rendered from its raw value when the
//!   driver cannot read it as text (intervals, arrays, `inet`, `timetz`, ...)

use crate::error::{DbError, DbResult};
use crate::models::Row;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgRow, PgTypeInfo, PgTypeKind, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row as _, Type, TypeInfo, ValueRef};
use std::net::IpAddr;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Temporal,
    Text,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if matches!(
        lower.as_str(),
        "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "bigint"
    ) || lower.contains("serial")
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.starts_with("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp") || lower == "date" || lower == "time" {
        return TypeCategory::Temporal;
    }

    // varchar, text, char, interval, ...
    TypeCategory::Text
}

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => {
                let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
                Ok(RawDecimal(s.to_string()))
            }
            PgValueFormat::Binary => Ok(RawDecimal(numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render the binary `NUMERIC` wire format: four big-endian i16 header fields
/// (digit count, weight, sign, display scale) followed by base-10000 digits.
pub(crate) fn numeric_to_string(bytes: &[u8]) -> Result<String, BoxDynError> {
    let word = |i: usize| -> Result<i16, BoxDynError> {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = word(0)?.max(0) as usize;
    let weight = word(1)? as i64;
    let sign = word(2)? as u16;
    let scale = word(3)?.max(0) as usize;
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digit_at = |i: i64| -> i16 {
        usize::try_from(i)
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
        out.push_str(&digit_at(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(i)));
        }
    }

    if scale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        fraction.truncate(scale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

/// Encode binary column data as a base64 JSON string.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Conversion from driver rows to engine rows.
///
/// Only SQL `NULL` becomes JSON `null`; a value that cannot be rendered is a
/// [`DbError::Decode`].
pub trait RowToJson {
    fn to_json_row(&self) -> DbResult<Row>;
}

impl RowToJson for PgRow {
    fn to_json_row(&self) -> DbResult<Row> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                Ok((col.name().to_string(), decode_column(self, idx, category)?))
            })
            .collect()
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> DbResult<JsonValue> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(JsonValue::Null);
    }

    let value = match category {
        TypeCategory::Decimal => JsonValue::String(row.try_get::<RawDecimal, _>(idx)?.0),
        TypeCategory::Integer => decode_integer(row, idx)?,
        TypeCategory::Boolean => JsonValue::Bool(row.try_get::<bool, _>(idx)?),
        TypeCategory::Float => decode_float(row, idx)?,
        TypeCategory::Binary => encode_binary(&row.try_get::<Vec<u8>, _>(idx)?),
        TypeCategory::Json => row.try_get::<JsonValue, _>(idx)?,
        TypeCategory::Temporal => decode_temporal(row, idx)?,
        TypeCategory::Uuid => JsonValue::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        TypeCategory::Text => decode_text(row, idx)?,
    };
    Ok(value)
}

fn decode_integer(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Ok(v.into());
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Ok(v.into());
    }
    Ok(row.try_get::<i64, _>(idx)?.into())
}

fn decode_float(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(float_json(v));
    }
    Ok(float_json(f64::from(row.try_get::<f32, _>(idx)?)))
}

/// NaN and infinities have no JSON number form.
fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn decode_temporal(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Ok(JsonValue::String(v.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
        return Ok(JsonValue::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
        return Ok(JsonValue::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
        return Ok(JsonValue::String(v.to_string()));
    }
    // e.g. 'infinity', which chrono cannot represent
    decode_text(row, idx)
}

fn decode_text(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(JsonValue::String(v));
    }

    let raw = row.try_get_raw(idx)?;
    let type_info = raw.type_info().into_owned();
    decode_raw(&type_info, raw).map_err(|e| {
        DbError::decode(format!(
            "Failed to decode column {} of type {}: {}",
            idx,
            type_info.name(),
            e
        ))
    })
}

/// Render a non-null value whose type has no typed decoder above.
///
/// Text-format values are already in PostgreSQL's own rendering, so they are
/// returned as-is. Binary values are decoded by type.
fn decode_raw(ty: &PgTypeInfo, raw: PgValueRef<'_>) -> Result<JsonValue, BoxDynError> {
    match (ty.kind(), raw.format()) {
        (PgTypeKind::Array(elem), _) => decode_array(elem, raw),
        (_, PgValueFormat::Text) | (PgTypeKind::Enum(_), _) => {
            Ok(JsonValue::String(raw.as_str()?.to_string()))
        }
        (PgTypeKind::Domain(base), _) => decode_raw(base, raw),
        _ => decode_binary(ty, raw),
    }
}

fn decode_binary(ty: &PgTypeInfo, raw: PgValueRef<'_>) -> Result<JsonValue, BoxDynError> {
    let name = ty.name().to_ascii_uppercase();
    let value = match name.as_str() {
        "BOOL" => JsonValue::Bool(decode::<bool>(raw)?),
        "INT2" => decode::<i16>(raw)?.into(),
        "INT4" => decode::<i32>(raw)?.into(),
        "INT8" => decode::<i64>(raw)?.into(),
        "FLOAT4" => float_json(f64::from(decode::<f32>(raw)?)),
        "FLOAT8" => float_json(decode::<f64>(raw)?),
        "NUMERIC" => JsonValue::String(decode::<RawDecimal>(raw)?.0),
        "UUID" => JsonValue::String(decode::<uuid::Uuid>(raw)?.to_string()),
        "DATE" => JsonValue::String(decode::<NaiveDate>(raw)?.to_string()),
        "TIME" => JsonValue::String(decode::<NaiveTime>(raw)?.to_string()),
        "TIMESTAMP" => JsonValue::String(decode::<NaiveDateTime>(raw)?.to_string()),
        "TIMESTAMPTZ" => JsonValue::String(decode::<DateTime<Utc>>(raw)?.to_rfc3339()),
        "JSON" | "JSONB" => decode::<JsonValue>(raw)?,
        "BYTEA" => encode_binary(raw.as_bytes()?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            JsonValue::String(raw.as_str()?.to_string())
        }
        "\"CHAR\"" => JsonValue::String(String::from_utf8_lossy(raw.as_bytes()?).into_owned()),
        "INTERVAL" => {
            let v = decode::<PgInterval>(raw)?;
            JsonValue::String(format_interval(v.months, v.days, v.microseconds))
        }
        "TIMETZ" => {
            let v = decode::<PgTimeTz<NaiveTime, FixedOffset>>(raw)?;
            JsonValue::String(format!(
                "{}{}",
                format_time(v.time),
                format_offset(v.offset.local_minus_utc())
            ))
        }
        "INET" | "CIDR" => JsonValue::String(format_inet(raw.as_bytes()?)?),
        "MONEY" => JsonValue::String(format_money(decode::<PgMoney>(raw)?.0)),
        "OID" => JsonValue::String(decode::<Oid>(raw)?.0.to_string()),
        other => return Err(format!("no decoder for binary {} values", other).into()),
    };
    Ok(value)
}

fn decode_array(elem: &PgTypeInfo, raw: PgValueRef<'_>) -> Result<JsonValue, BoxDynError> {
    let name = elem.name().to_ascii_uppercase();
    match name.as_str() {
        "BOOL" => elements::<bool>(raw, JsonValue::Bool),
        "INT2" => elements::<i16>(raw, JsonValue::from),
        "INT4" => elements::<i32>(raw, JsonValue::from),
        "INT8" => elements::<i64>(raw, JsonValue::from),
        "FLOAT4" => elements::<f32>(raw, |v| float_json(f64::from(v))),
        "FLOAT8" => elements::<f64>(raw, float_json),
        "NUMERIC" => elements::<RawDecimal>(raw, |v| JsonValue::String(v.0)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => elements::<String>(raw, JsonValue::String),
        "UUID" => elements::<uuid::Uuid>(raw, |v| JsonValue::String(v.to_string())),
        "DATE" => elements::<NaiveDate>(raw, |v| JsonValue::String(v.to_string())),
        "TIMESTAMP" => elements::<NaiveDateTime>(raw, |v| JsonValue::String(v.to_string())),
        "TIMESTAMPTZ" => elements::<DateTime<Utc>>(raw, |v| JsonValue::String(v.to_rfc3339())),
        "JSON" | "JSONB" => elements::<JsonValue>(raw, |v| v),
        _ if matches!(elem.kind(), PgTypeKind::Enum(_)) => {
            elements::<String>(raw, JsonValue::String)
        }
        _ if matches!(raw.format(), PgValueFormat::Text) => {
            Ok(JsonValue::String(raw.as_str()?.to_string()))
        }
        other => Err(format!("no decoder for binary {}[] values", other).into()),
    }
}

fn decode<T>(raw: PgValueRef<'_>) -> Result<T, BoxDynError>
where
    T: for<'a> Decode<'a, Postgres>,
{
    T::decode(raw)
}

/// Decode a one-dimensional array, keeping NULL elements as JSON `null`.
fn elements<T>(
    raw: PgValueRef<'_>,
    render: impl Fn(T) -> JsonValue,
) -> Result<JsonValue, BoxDynError>
where
    T: for<'a> Decode<'a, Postgres> + Type<Postgres>,
{
    let items = <Vec<Option<T>> as Decode<Postgres>>::decode(raw)?;
    Ok(JsonValue::Array(
        items
            .into_iter()
            .map(|item| item.map(&render).unwrap_or(JsonValue::Null))
            .collect(),
    ))
}

/// PostgreSQL's default interval style, e.g. `1 year 2 mons 3 days 04:05:06`.
fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    let unit = |n: i64, name: &str| {
        if n == 1 {
            format!("1 {}", name)
        } else {
            format!("{} {}s", n, name)
        }
    };

    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(unit(i64::from(months / 12), "year"));
    }
    if months % 12 != 0 {
        parts.push(unit(i64::from(months % 12), "mon"));
    }
    if days != 0 {
        parts.push(unit(i64::from(days), "day"));
    }
    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let micros = microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        parts.push(format!(
            "{}{:02}:{:02}:{:02}{}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60,
            fraction(micros % 1_000_000)
        ));
    }
    parts.join(" ")
}

fn format_time(time: NaiveTime) -> String {
    format!(
        "{}{}",
        time.format("%H:%M:%S"),
        fraction(u64::from(time.nanosecond() / 1000))
    )
}

/// Fractional seconds without trailing zeros, empty when whole.
fn fraction(micros: u64) -> String {
    if micros == 0 {
        return String::new();
    }
    format!(".{:06}", micros).trim_end_matches('0').to_string()
}

/// UTC offset as `+HH`, `+HH:MM` or `+HH:MM:SS`.
fn format_offset(seconds_east: i32) -> String {
    let sign = if seconds_east < 0 { '-' } else { '+' };
    let abs = seconds_east.unsigned_abs();
    let (h, m, s) = (abs / 3600, abs / 60 % 60, abs % 60);
    match (m, s) {
        (0, 0) => format!("{}{:02}", sign, h),
        (_, 0) => format!("{}{:02}:{:02}", sign, h, m),
        _ => format!("{}{:02}:{:02}:{:02}", sign, h, m, s),
    }
}

/// Binary `inet`/`cidr`: family, mask bits, cidr flag, address length, address.
fn format_inet(bytes: &[u8]) -> Result<String, BoxDynError> {
    const PGSQL_AF_INET: u8 = 2;
    const PGSQL_AF_INET6: u8 = 3;

    let [family, bits, is_cidr, len, addr @ ..] = bytes else {
        return Err("truncated inet value".into());
    };
    if usize::from(*len) != addr.len() {
        return Err("inet address length mismatch".into());
    }
    let (ip, full_mask) = match *family {
        PGSQL_AF_INET => (IpAddr::from(<[u8; 4]>::try_from(addr)?), 32),
        PGSQL_AF_INET6 => (IpAddr::from(<[u8; 16]>::try_from(addr)?), 128),
        other => return Err(format!("unknown inet address family {}", other).into()),
    };
    if *is_cidr == 0 && *bits == full_mask {
        Ok(ip.to_string())
    } else {
        Ok(format!("{}/{}", ip, bits))
    }
}

/// Money in whole cents as a plain decimal; the currency symbol depends on
/// the server locale and is not part of the binary value.
fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
