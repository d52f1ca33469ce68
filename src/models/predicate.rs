//! Filter descriptors compiled into `WHERE` clauses.
//!
//! A [`Predicate`] is an ordered mapping from field name to a [`Condition`]. All
//! fields are AND-ed together. From JSON, a scalar becomes an equality test, an
//! array becomes an `IN` list and an object of operator tags becomes one
//! comparison per tag:
//!
//! ```text
//! { "status": "active", "id": [1, 2, 3], "age": { "gte": 18, "lt": 65 } }
//! ```

use crate::models::query::QueryParam;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Comparison operator tags accepted in a comparison mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl CompareOp {
    /// Parse an operator tag such as `"gte"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            _ => None,
        }
    }

    /// The SQL operator this tag compiles to.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "=",
            Self::Neq => "!=",
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// The test applied to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field = $n`
    Eq(QueryParam),
    /// `field IN ($n, $n+1, ...)`
    In(Vec<QueryParam>),
    /// `field OP $n [AND field OP $n+1 ...]`, in operator order
    Compare(Vec<(CompareOp, QueryParam)>),
}

impl Condition {
    /// Number of placeholders this condition consumes once compiled.
    pub fn placeholder_count(&self) -> usize {
        match self {
            Self::Eq(_) => 1,
            Self::In(values) => values.len(),
            Self::Compare(ops) => ops.len(),
        }
    }
}

/// Ordered field conditions, AND-ed together.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Map<String, JsonValue>")]
pub struct Predicate {
    fields: Vec<(String, Condition)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field = value`.
    pub fn eq(self, field: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.set(field.into(), Condition::Eq(value.into()))
    }

    /// Require `field IN (values...)`.
    pub fn any_of<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set(field.into(), Condition::In(values))
    }

    /// Add a comparison on `field`. Comparisons on the same field accumulate
    /// and are AND-ed; repeating an operator replaces its value.
    pub fn compare(
        mut self,
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<QueryParam>,
    ) -> Self {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some((_, Condition::Compare(ops))) => {
                match ops.iter_mut().find(|(o, _)| *o == op) {
                    Some(slot) => slot.1 = value,
                    None => ops.push((op, value)),
                }
            }
            Some((_, cond)) => *cond = Condition::Compare(vec![(op, value)]),
            None => self
                .fields
                .push((field, Condition::Compare(vec![(op, value)]))),
        }
        self
    }

    /// Field conditions in insertion order.
    pub fn fields(&self) -> &[(String, Condition)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total placeholders this predicate consumes once compiled.
    pub fn placeholder_count(&self) -> usize {
        self.fields.iter().map(|(_, c)| c.placeholder_count()).sum()
    }

    fn set(mut self, field: String, condition: Condition) -> Self {
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = condition,
            None => self.fields.push((field, condition)),
        }
        self
    }
}

impl TryFrom<serde_json::Map<String, JsonValue>> for Predicate {
    type Error = String;

    fn try_from(map: serde_json::Map<String, JsonValue>) -> Result<Self, Self::Error> {
        let mut fields = Vec::with_capacity(map.len());
        for (field, value) in map {
            let condition = match value {
                JsonValue::Array(items) => {
                    Condition::In(items.into_iter().map(QueryParam::from).collect())
                }
                JsonValue::Object(ops) => {
                    let mut compiled = Vec::with_capacity(ops.len());
                    for (tag, operand) in ops {
                        let op = CompareOp::from_tag(&tag).ok_or_else(|| {
                            format!(
                                "unknown comparison operator '{}' on field '{}' (expected gt, gte, lt, lte, eq or neq)",
                                tag, field
                            )
                        })?;
                        compiled.push((op, QueryParam::from(operand)));
                    }
                    Condition::Compare(compiled)
                }
                scalar => Condition::Eq(QueryParam::from(scalar)),
            };
            fields.push((field, condition));
        }
        Ok(Self { fields })
    }
}
