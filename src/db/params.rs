//! Parameter binding utilities for database queries.
//!
//! Placeholders are left untyped when a statement is prepared, so the server
//! infers each parameter's type from the surrounding SQL (`age = $1` types `$1` as
//! the `age` column). Each `QueryParam` is then converted to that inferred type
//! before it is bound. sqlx always sends parameters in binary format, so a JSON
//! string such as `"2024-01-01"` has to become a real timestamp on this side
//! rather than text the server would parse.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo, PgTypeKind};
use sqlx::types::Json;
use sqlx::{Encode, Postgres, Type, TypeInfo};

/// SQLSTATE for a value that cannot be read as its target type.
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

/// A value already converted to the Rust type matching its placeholder.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Text-like and enum targets; their binary format is the UTF-8 text.
    Text(String),
    /// Exact decimal text, sent in the binary `NUMERIC` layout.
    Numeric(String),
    Json(JsonValue),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
}

/// A converted value bound under the placeholder's inferred type.
#[derive(Debug, Clone)]
pub(crate) struct TypedParam {
    value: PgValue,
    type_info: PgTypeInfo,
}

impl Type<Postgres> for TypedParam {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}

impl<'q> Encode<'q, Postgres> for TypedParam {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match &self.value {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => <bool as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int2(v) => <i16 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int4(v) => <i32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int8(v) => <i64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float4(v) => <f32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float8(v) => <f64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Text(v) => <String as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Numeric(v) => {
                buf.extend_from_slice(&numeric_from_str(v)?);
                Ok(IsNull::No)
            }
            PgValue::Json(v) => <Json<&JsonValue> as Encode<Postgres>>::encode_by_ref(&Json(v), buf),
            PgValue::Uuid(v) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Date(v) => <NaiveDate as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Time(v) => <NaiveTime as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Timestamp(v) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Timestamptz(v) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.type_info.clone())
    }
}

/// Convert every parameter to its placeholder's type, in order.
pub(crate) fn type_params(params: &[QueryParam], types: &[PgTypeInfo]) -> DbResult<Vec<TypedParam>> {
    if params.len() != types.len() {
        return Err(DbError::internal(format!(
            "statement has {} placeholders but {} values were given",
            types.len(),
            params.len()
        )));
    }
    params
        .iter()
        .zip(types)
        .enumerate()
        .map(|(i, (param, ty))| {
            let target = ty.name().to_ascii_uppercase();
            let is_enum = matches!(ty.kind(), PgTypeKind::Enum(_));
            convert(param, &target, is_enum)
                .map(|value| TypedParam {
                    value,
                    type_info: ty.clone(),
                })
                .map_err(|e| match e {
                    DbError::Execution { message, sql_state } => {
                        DbError::execution(format!("parameter ${}: {}", i + 1, message), sql_state)
                    }
                    other => other,
                })
        })
        .collect()
}

/// Build a query with every typed parameter bound in order.
pub(crate) fn bind_all(
    sql: &str,
    params: Vec<TypedParam>,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    params.into_iter().fold(sqlx::query(sql), |query, param| query.bind(param))
}

/// Convert one value to the PostgreSQL type named `target` (upper case).
pub(crate) fn convert(param: &QueryParam, target: &str, is_enum: bool) -> DbResult<PgValue> {
    let textual = is_enum || is_textual(target);

    let value = match param {
        QueryParam::Null => PgValue::Null,
        QueryParam::String(s) if textual => PgValue::Text(s.clone()),
        QueryParam::String(s) => parse_str(s, target)?,
        QueryParam::Bool(b) => match target {
            "BOOL" => PgValue::Bool(*b),
            "JSON" | "JSONB" => PgValue::Json(JsonValue::Bool(*b)),
            _ if textual => PgValue::Text(b.to_string()),
            _ => return Err(mismatch("boolean", target)),
        },
        QueryParam::Int(i) => match target {
            "INT2" => PgValue::Int2(i16::try_from(*i).map_err(|_| out_of_range(*i, target))?),
            "INT4" => PgValue::Int4(i32::try_from(*i).map_err(|_| out_of_range(*i, target))?),
            "INT8" => PgValue::Int8(*i),
            "FLOAT4" => PgValue::Float4(*i as f32),
            "FLOAT8" => PgValue::Float8(*i as f64),
            "NUMERIC" => PgValue::Numeric(i.to_string()),
            "JSON" | "JSONB" => PgValue::Json(JsonValue::from(*i)),
            _ if textual => PgValue::Text(i.to_string()),
            _ => return Err(mismatch("integer", target)),
        },
        QueryParam::Float(f) => match target {
            "FLOAT4" => PgValue::Float4(*f as f32),
            "FLOAT8" => PgValue::Float8(*f),
            "NUMERIC" => PgValue::Numeric(f.to_string()),
            "INT2" | "INT4" | "INT8" if f.fract() == 0.0 => {
                return convert(&QueryParam::Int(*f as i64), target, is_enum);
            }
            "JSON" | "JSONB" => PgValue::Json(JsonValue::from(*f)),
            _ if textual => PgValue::Text(f.to_string()),
            _ => return Err(mismatch("number", target)),
        },
        QueryParam::Json(v) => match target {
            "JSON" | "JSONB" => PgValue::Json(v.clone()),
            _ if textual => PgValue::Text(v.to_string()),
            _ => return Err(mismatch("JSON value", target)),
        },
    };
    Ok(value)
}

fn is_textual(target: &str) -> bool {
    matches!(
        target,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" | "UNKNOWN"
    )
}

fn parse_str(s: &str, target: &str) -> DbResult<PgValue> {
    let trimmed = s.trim();
    let parsed = match target {
        "INT2" => trimmed.parse().ok().map(PgValue::Int2),
        "INT4" => trimmed.parse().ok().map(PgValue::Int4),
        "INT8" => trimmed.parse().ok().map(PgValue::Int8),
        "FLOAT4" => trimmed.parse().ok().map(PgValue::Float4),
        "FLOAT8" => trimmed.parse().ok().map(PgValue::Float8),
        "NUMERIC" => numeric_from_str(trimmed)
            .ok()
            .map(|_| PgValue::Numeric(trimmed.to_string())),
        "BOOL" => parse_bool(trimmed).map(PgValue::Bool),
        "UUID" => uuid::Uuid::parse_str(trimmed).ok().map(PgValue::Uuid),
        "DATE" => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .map(PgValue::Date),
        "TIME" => parse_time(trimmed).map(PgValue::Time),
        "TIMESTAMP" => parse_naive_datetime(trimmed).map(PgValue::Timestamp),
        "TIMESTAMPTZ" => parse_datetime_utc(trimmed).map(PgValue::Timestamptz),
        "JSON" | "JSONB" => serde_json::from_str(s).ok().map(PgValue::Json),
        _ => {
            return Err(DbError::execution(
                format!("cannot bind a string to a parameter of type {}", target),
                None,
            ));
        }
    };
    parsed.ok_or_else(|| {
        DbError::execution(
            format!("invalid input for type {}: \"{}\"", target, s),
            Some(INVALID_TEXT_REPRESENTATION.to_string()),
        )
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Timestamps with an offset keep it; bare ones are taken as UTC.
fn parse_datetime_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::<FixedOffset>::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|naive| naive.and_utc()))
}

fn mismatch(kind: &str, target: &str) -> DbError {
    DbError::execution(
        format!("cannot bind a {} to a parameter of type {}", kind, target),
        None,
    )
}

fn out_of_range(value: i64, target: &str) -> DbError {
    DbError::execution(
        format!("{} is out of range for type {}", value, target),
        Some("22003".to_string()),
    )
}

/// Encode decimal text in the binary `NUMERIC` layout: digit count, weight,
/// sign and display scale as big-endian i16, then base-10000 digits.
pub(crate) fn numeric_from_str(s: &str) -> Result<Vec<u8>, BoxDynError> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;

    let s = s.trim();
    if s.eq_ignore_ascii_case("nan") {
        return Ok(numeric_bytes(0, NUMERIC_NAN, 0, 0, &[]));
    }

    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(format!("invalid numeric value: \"{}\"", s).into());
    }

    // Left-pad the integer part and right-pad the fraction to whole base-10000 groups
    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_part,
        frac_part,
        "0".repeat(frac_pad)
    );
    let int_groups = (int_pad + int_part.len()) / 4;

    let mut groups: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0i16, |acc, d| acc * 10 + i16::from(d - b'0'))
        })
        .collect();

    let mut weight = int_groups as i64 - 1;
    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i64;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let sign = if negative && !groups.is_empty() { NUMERIC_NEG } else { 0 };
    let weight = i16::try_from(weight).map_err(|_| "numeric value out of range")?;
    let scale = i16::try_from(frac_part.len()).map_err(|_| "numeric scale out of range")?;
    Ok(numeric_bytes(weight, sign, scale, groups.len(), &groups))
}

fn numeric_bytes(weight: i16, sign: u16, scale: i16, ndigits: usize, digits: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + digits.len() * 2);
    out.extend_from_slice(&(ndigits as i16).to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&scale.to_be_bytes());
    for d in digits {
        out.extend_from_slice(&d.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::numeric_to_string;

    #[test]
    fn test_null_takes_any_type() {
        for name in ["INT4", "TIMESTAMPTZ", "UUID", "INTERVAL"] {
            assert_eq!(convert(&QueryParam::Null, name, false).unwrap(), PgValue::Null);
        }
    }

    #[test]
    fn test_strings_parse_into_target_type() {
        let ts = convert(&QueryParam::from("2999-01-01"), "TIMESTAMPTZ", false).unwrap();
        assert_eq!(
            ts,
            PgValue::Timestamptz(
                NaiveDate::from_ymd_opt(2999, 1, 1)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
                    .and_utc()
            )
        );

        let with_offset =
            convert(&QueryParam::from("2024-03-01T12:00:00+02:00"), "TIMESTAMPTZ", false).unwrap();
        match with_offset {
            PgValue::Timestamptz(dt) => assert_eq!(dt.to_rfc3339(), "2024-03-01T10:00:00+00:00"),
            other => panic!("unexpected value: {other:?}"),
        }

        assert!(matches!(
            convert(&QueryParam::from("2024-03-01"), "DATE", false).unwrap(),
            PgValue::Date(_)
        ));
        assert!(matches!(
            convert(
                &QueryParam::from("67e55044-10b1-426f-9247-bb680e5fe0c8"),
                "UUID", false
            )
            .unwrap(),
            PgValue::Uuid(_)
        ));
        assert_eq!(
            convert(&QueryParam::from("42"), "INT4", false).unwrap(),
            PgValue::Int4(42)
        );
        assert_eq!(
            convert(&QueryParam::from("yes"), "BOOL", false).unwrap(),
            PgValue::Bool(true)
        );
    }

    #[test]
    fn test_strings_stay_text_for_text_columns() {
        assert_eq!(
            convert(&QueryParam::from("2999-01-01"), "VARCHAR", false).unwrap(),
            PgValue::Text("2999-01-01".to_string())
        );
    }

    #[test]
    fn test_enum_labels_bind_as_text() {
        assert_eq!(
            convert(&QueryParam::from("happy"), "MOOD", true).unwrap(),
            PgValue::Text("happy".to_string())
        );
    }

    #[test]
    fn test_invalid_string_is_reported() {
        let err = convert(&QueryParam::from("not a date"), "DATE", false).unwrap_err();
        assert!(matches!(
            err,
            DbError::Execution { ref sql_state, .. } if sql_state.as_deref() == Some("22P02")
        ));
        assert!(convert(&QueryParam::from("1 day"), "INTERVAL", false).is_err());
    }

    #[test]
    fn test_integers_follow_column_width() {
        assert_eq!(
            convert(&QueryParam::Int(7), "INT2", false).unwrap(),
            PgValue::Int2(7)
        );
        assert!(convert(&QueryParam::Int(i64::MAX), "INT4", false).is_err());
        assert_eq!(
            convert(&QueryParam::Int(7), "NUMERIC", false).unwrap(),
            PgValue::Numeric("7".to_string())
        );
        assert_eq!(
            convert(&QueryParam::Float(3.0), "INT8", false).unwrap(),
            PgValue::Int8(3)
        );
        assert!(convert(&QueryParam::Float(3.5), "INT8", false).is_err());
    }

    #[test]
    fn test_type_params_checks_arity() {
        let err = type_params(&[QueryParam::Int(1)], &[]).unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
    }

    #[test]
    fn test_numeric_encoding_matches_decoder() {
        for text in ["123.45", "-0.05", "10000", "0", "0.000", "98765432.1", "-1", "NaN"] {
            let bytes = numeric_from_str(text).unwrap();
            assert_eq!(numeric_to_string(&bytes).unwrap(), text);
        }
        assert_eq!(
            numeric_to_string(&numeric_from_str("007.50").unwrap()).unwrap(),
            "7.50"
        );
        assert!(numeric_from_str("12a").is_err());
        assert!(numeric_from_str(".").is_err());
    }
}
