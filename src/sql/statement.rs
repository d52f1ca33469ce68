//! Statement builder.
//!
//! Assembles final SQL text from the compiled pieces. Empty pieces are dropped so
//! statements never carry stray whitespace.

use crate::error::{DbError, DbResult};
use crate::models::{InsertQuery, Projection, QueryParam, ReadQuery};
use crate::sql::join::compile_joins;
use crate::sql::predicate::{WhereClause, compile_predicates};

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// A read descriptor with its joins and filters compiled once, ready to render
/// per-batch statements.
#[derive(Debug, Clone)]
pub struct CompiledRead {
    select: String,
    from: String,
    joins: String,
    filter: WhereClause,
}

impl CompiledRead {
    /// Validate and compile a read descriptor.
    pub fn compile(query: &ReadQuery) -> DbResult<Self> {
        let from = query.from.trim();
        if from.is_empty() {
            return Err(DbError::construction("read is missing 'from'"));
        }

        Ok(Self {
            select: query.select.render(),
            from: from.to_string(),
            joins: compile_joins(&query.join)?,
            filter: compile_predicates(&query.filters, 1)?,
        })
    }

    /// `SELECT count(*)` over the filtered base table. Joins are left out.
    pub fn count_sql(&self) -> String {
        assemble(&["SELECT count(*) FROM", &self.from, &self.filter.statement])
    }

    /// The `SELECT` for one batch.
    pub fn batch_sql(&self, limit: u64, offset: u64) -> String {
        assemble(&[
            "SELECT",
            &self.select,
            "FROM",
            &self.from,
            &self.joins,
            &self.filter.statement,
            &format!("LIMIT {}", limit),
            &format!("OFFSET {}", offset),
        ])
    }

    pub fn count_statement(&self) -> Statement {
        Statement {
            sql: self.count_sql(),
            params: self.filter.values.clone(),
        }
    }

    pub fn batch_statement(&self, limit: u64, offset: u64) -> Statement {
        Statement {
            sql: self.batch_sql(limit, offset),
            params: self.filter.values.clone(),
        }
    }
}

/// Build `INSERT INTO t (cols) VALUES ($1..$n) RETURNING ...`.
pub fn insert_statement(query: &InsertQuery) -> DbResult<Statement> {
    let into = query
        .into
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DbError::construction("insert is missing 'into'"))?;

    if query.data.is_empty() {
        return Err(DbError::construction(format!(
            "insert into '{}' has no data",
            into
        )));
    }

    let columns: Vec<&str> = query.data.iter().map(|(c, _)| c.as_str()).collect();
    if columns.iter().any(|c| c.trim().is_empty()) {
        return Err(DbError::construction(format!(
            "insert into '{}' has an empty column name",
            into
        )));
    }

    let bindings: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let returning = query
        .returning
        .as_ref()
        .map(Projection::render)
        .unwrap_or_else(|| "*".to_string());

    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            into,
            columns.join(", "),
            bindings.join(", "),
            returning
        ),
        params: query.data.iter().map(|(_, v)| v.clone()).collect(),
    })
}

fn assemble(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
