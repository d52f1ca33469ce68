//! SQL text generation.
//!
//! This module turns descriptors into parameterized PostgreSQL statements:
//! - `predicate`: filter descriptors into a `WHERE` clause and its values
//! - `join`: join descriptors into `JOIN ... ON ...` text
//! - `statement`: final `SELECT`, `count(*)` and `INSERT` statements
//!
//! Placeholders use the `$1, $2, ...` form. Every compiler here is pure and runs
//! before any connection is acquired, so malformed descriptors fail without I/O.

pub mod join;
pub mod predicate;
pub mod statement;

pub use join::{compile_join, compile_joins};
pub use predicate::{WhereClause, compile_predicate, compile_predicates};
pub use statement::{CompiledRead, Statement, insert_statement};
