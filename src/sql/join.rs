//! Join compiler.

use crate::error::{DbError, DbResult};
use crate::models::JoinDescriptor;

/// Compile one join into `[KIND] JOIN target ON source.a = target.b [AND ...]`.
///
/// Missing `source`, `target` or `on` pairs is a construction error. Table and
/// column names are not checked against the schema.
pub fn compile_join(join: &JoinDescriptor) -> DbResult<String> {
    let source = required(join.source.as_deref(), "source")?;
    let target = required(join.target.as_deref(), "target")?;
    if join.on.is_empty() {
        return Err(DbError::construction(format!(
            "join of '{}' onto '{}' is missing 'on'",
            target, source
        )));
    }

    let conditions: Vec<String> = join
        .on
        .iter()
        .map(|(source_col, target_col)| {
            format!("{}.{} = {}.{}", source, source_col, target, target_col)
        })
        .collect();

    let keyword = match join.kind {
        Some(kind) => format!("{} JOIN", kind.keyword()),
        None => "JOIN".to_string(),
    };

    Ok(format!(
        "{} {} ON {}",
        keyword,
        target,
        conditions.join(" AND ")
    ))
}

/// Compile zero or more joins, preserving order, separated by a single space.
pub fn compile_joins(joins: &[JoinDescriptor]) -> DbResult<String> {
    let compiled = joins
        .iter()
        .map(compile_join)
        .collect::<DbResult<Vec<_>>>()?;
    Ok(compiled.join(" "))
}

fn required<'a>(value: Option<&'a str>, field: &str) -> DbResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DbError::construction(format!("join is missing '{}'", field))),
    }
}
