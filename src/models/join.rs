//! Join descriptors.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

/// Join keyword placed before `JOIN`. Absent means a plain `JOIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum JoinKind {
    #[serde(alias = "inner", alias = "INNER")]
    Inner,
    #[serde(alias = "left", alias = "LEFT")]
    Left,
    #[serde(alias = "left outer", alias = "LEFT OUTER")]
    LeftOuter,
    #[serde(alias = "right", alias = "RIGHT")]
    Right,
    #[serde(alias = "right outer", alias = "RIGHT OUTER")]
    RightOuter,
    #[serde(alias = "full", alias = "FULL")]
    Full,
    #[serde(alias = "full outer", alias = "FULL OUTER")]
    FullOuter,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::LeftOuter => "LEFT OUTER",
            Self::Right => "RIGHT",
            Self::RightOuter => "RIGHT OUTER",
            Self::Full => "FULL",
            Self::FullOuter => "FULL OUTER",
        }
    }
}

/// One `JOIN ... ON ...` clause.
///
/// `source`, `target` and `on` are optional here so that incomplete descriptors
/// can be represented; the join compiler rejects them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JoinDescriptor {
    #[serde(default, rename = "type")]
    pub kind: Option<JoinKind>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    /// Source column to target column pairs, in order.
    #[serde(default, deserialize_with = "ordered_columns")]
    pub on: Vec<(String, String)>,
}

impl JoinDescriptor {
    /// Join `target` onto `source`. Add column pairs with [`JoinDescriptor::on`].
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: None,
            source: Some(source.into()),
            target: Some(target.into()),
            on: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: JoinKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Require `source.source_column = target.target_column`.
    pub fn on(mut self, source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        self.on.push((source_column.into(), target_column.into()));
        self
    }
}

fn ordered_columns<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<serde_json::Map<String, JsonValue>>::deserialize(deserializer)?;
    let Some(map) = map else {
        return Ok(Vec::new());
    };
    map.into_iter()
        .map(|(source_col, target_col)| match target_col {
            JsonValue::String(s) => Ok((source_col, s)),
            other => Err(serde::de::Error::custom(format!(
                "join column for '{}' must be a string, got {}",
                source_col, other
            ))),
        })
        .collect()
}
