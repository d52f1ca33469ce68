//! Predicate compiler.
//!
//! Placeholder numbering is a single counter shared across every field (and
//! across every predicate when several are AND-ed), so the Nth value in
//! [`WhereClause::values`] always binds to the Nth placeholder emitted.

use crate::error::{DbError, DbResult};
use crate::models::{Condition, Predicate, QueryParam};

/// A compiled `WHERE` clause and the values for its placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    /// Empty when there is nothing to filter on; otherwise starts with `WHERE `.
    pub statement: String,
    pub values: Vec<QueryParam>,
}

impl WhereClause {
    /// True when no `WHERE` clause should be emitted at all.
    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    /// Placeholder number the next statement fragment should start from.
    pub fn next_index(&self, start_index: usize) -> usize {
        start_index + self.values.len()
    }
}

/// Compile a single predicate, numbering placeholders from `start_index` (1-based).
///
/// An absent or empty predicate compiles to an empty clause, meaning "no `WHERE`".
pub fn compile_predicate(predicate: Option<&Predicate>, start_index: usize) -> DbResult<WhereClause> {
    match predicate {
        Some(p) => compile_predicates(std::slice::from_ref(p), start_index),
        None => Ok(WhereClause::default()),
    }
}

/// Compile several predicates AND-ed together in order.
pub fn compile_predicates(predicates: &[Predicate], start_index: usize) -> DbResult<WhereClause> {
    if start_index == 0 {
        return Err(DbError::construction("placeholder numbering starts at 1"));
    }

    let mut index = start_index;
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    for (field, condition) in predicates.iter().flat_map(|p| p.fields()) {
        if field.trim().is_empty() {
            return Err(DbError::construction("predicate field name is empty"));
        }

        match condition {
            Condition::Eq(value) => {
                clauses.push(format!("{} = ${}", field, index));
                values.push(value.clone());
                index += 1;
            }
            Condition::In(items) => {
                if items.is_empty() {
                    return Err(DbError::construction(format!(
                        "IN list for field '{}' is empty",
                        field
                    )));
                }
                let placeholders: Vec<String> = (index..index + items.len())
                    .map(|i| format!("${}", i))
                    .collect();
                clauses.push(format!("{} IN ({})", field, placeholders.join(", ")));
                values.extend(items.iter().cloned());
                index += items.len();
            }
            Condition::Compare(ops) => {
                if ops.is_empty() {
                    return Err(DbError::construction(format!(
                        "comparison mapping for field '{}' has no operators",
                        field
                    )));
                }
                for (op, value) in ops {
                    clauses.push(format!("{} {} ${}", field, op.as_sql(), index));
                    values.push(value.clone());
                    index += 1;
                }
            }
        }
    }

    if clauses.is_empty() {
        return Ok(WhereClause::default());
    }

    Ok(WhereClause {
        statement: format!("WHERE {}", clauses.join(" AND ")),
        values,
    })
}
