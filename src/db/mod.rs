//! Database access layer.
//!
//! This module provides:
//! - Driver collaborator traits and the sqlx PostgreSQL driver
//! - Row decoding and parameter binding
//! - The transaction controller and connection router
//! - Batch planning and the lazy batch stream
//! - The [`Engine`] tying them together

pub mod driver;
pub mod engine;
pub mod pagination;
pub mod params;
pub mod postgres;
pub mod router;
pub mod transaction;
pub mod types;

pub use driver::{ConnectionPool, PoolConnection};
pub use engine::Engine;
pub use pagination::{BatchPlan, BatchStream, BatchWindow, parse_count};
pub use postgres::{PgDriver, PgPooledConnection};
pub use router::{ConnectionRouter, RoutedConnection};
pub use transaction::{OpenTransaction, TransactionController, TransactionSlot};
pub use types::{RowToJson, TypeCategory, categorize_type};
