//! Descriptor models for reads, joins, filters and inserts.
//!
//! This module re-exports all model types used throughout the crate.

pub mod join;
pub mod predicate;
pub mod query;

// Re-export commonly used types
pub use join::{JoinDescriptor, JoinKind};
pub use predicate::{CompareOp, Condition, Predicate};
pub use query::{
    Batch, DEFAULT_STEP, InsertQuery, Projection, QueryParam, ReadQuery, Row, TransactionInfo,
};
