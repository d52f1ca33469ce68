//! Query-related data models.
//!
//! This module defines the read and insert descriptors, bound parameter values
//! and the row/batch shapes handed back to callers.

use crate::models::join::JoinDescriptor;
use crate::models::predicate::Predicate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Default number of rows fetched per batch.
pub const DEFAULT_STEP: u64 = 1000;

/// A single result row, keyed by column name in select order.
pub type Row = serde_json::Map<String, JsonValue>;

/// The full row set returned by one underlying `SELECT`.
pub type Batch = Vec<Row>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Arrays and objects, bound as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// The column list of a `SELECT` or `RETURNING` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    /// Raw projection text, e.g. `*` or `id, name`
    Expr(String),
    /// Ordered column expressions, joined with `, `
    Columns(Vec<String>),
}

impl Projection {
    /// Render the projection as SQL text. Empty projections render as `*`.
    pub fn render(&self) -> String {
        match self {
            Self::Expr(expr) if expr.trim().is_empty() => "*".to_string(),
            Self::Expr(expr) => expr.clone(),
            Self::Columns(cols) if cols.is_empty() => "*".to_string(),
            Self::Columns(cols) => cols.join(", "),
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::Expr("*".to_string())
    }
}

impl From<&str> for Projection {
    fn from(v: &str) -> Self {
        Self::Expr(v.to_string())
    }
}

impl<S: Into<String>> From<Vec<S>> for Projection {
    fn from(cols: Vec<S>) -> Self {
        Self::Columns(cols.into_iter().map(Into::into).collect())
    }
}

/// A chunked read: source table, projection, joins, filters and paging.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadQuery {
    pub from: String,
    #[serde(default)]
    pub select: Projection,
    #[serde(default, deserialize_with = "one_or_many")]
    pub join: Vec<JoinDescriptor>,
    /// Multiple predicates are AND-ed together in order.
    #[serde(default, rename = "where", deserialize_with = "one_or_many")]
    pub filters: Vec<Predicate>,
    /// Upper bound on total rows fetched. `"ALL"` and absent both mean no bound.
    #[serde(default, deserialize_with = "deserialize_limit")]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
    /// Rows per batch. Falls back to the engine's default step when unset.
    #[serde(default)]
    pub step: Option<u64>,
}

impl ReadQuery {
    /// Start a read from `table` selecting `*`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            from: table.into(),
            select: Projection::default(),
            join: Vec::new(),
            filters: Vec::new(),
            limit: None,
            offset: 0,
            step: None,
        }
    }

    pub fn select(mut self, select: impl Into<Projection>) -> Self {
        self.select = select.into();
        self
    }

    pub fn join(mut self, join: JoinDescriptor) -> Self {
        self.join.push(join);
        self
    }

    /// Add a predicate; successive predicates are AND-ed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }
}

/// A single-row insert.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsertQuery {
    pub into: Option<String>,
    /// Column/value pairs in insertion order.
    #[serde(default, deserialize_with = "ordered_params")]
    pub data: Vec<(String, QueryParam)>,
    /// Defaults to `*`.
    #[serde(default)]
    pub returning: Option<Projection>,
}

impl InsertQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            into: Some(table.into()),
            ..Self::default()
        }
    }

    /// Set a column value. Columns keep the order they were first set in.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.data.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.data.push((column, value)),
        }
        self
    }

    pub fn returning(mut self, returning: impl Into<Projection>) -> Self {
        self.returning = Some(returning.into());
        self
    }
}

/// Handle describing the currently open transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

// =============================================================================
// Serde helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

fn deserialize_limit<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LimitInput {
        Rows(u64),
        Keyword(String),
    }

    match Option::<LimitInput>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LimitInput::Rows(n)) => Ok(Some(n)),
        Some(LimitInput::Keyword(k)) if k.eq_ignore_ascii_case("all") => Ok(None),
        Some(LimitInput::Keyword(k)) => Err(serde::de::Error::custom(format!(
            "limit must be a non-negative integer or \"ALL\", got \"{}\"",
            k
        ))),
    }
}

fn ordered_params<'de, D>(deserializer: D) -> Result<Vec<(String, QueryParam)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = serde_json::Map::<String, JsonValue>::deserialize(deserializer)?;
    Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect())
}
