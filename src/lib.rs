//! pg-batch-reader library
//!
//! Chunked, cancellable reads over PostgreSQL. A read descriptor is compiled into
//! parameterized `SELECT ... LIMIT ... OFFSET ...` statements which run one batch
//! at a time as the caller pulls from a stream. An engine can hold one open
//! transaction; while it is open every statement runs on its reserved connection.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sql;

pub use config::{Config, DatabaseConfig, EngineOptions, PoolOptions};
pub use db::{BatchStream, Engine, PgDriver};
pub use error::{DbError, DbResult};
pub use models::{
    Batch, CompareOp, InsertQuery, JoinDescriptor, JoinKind, Predicate, Projection, QueryParam,
    ReadQuery, Row, TransactionInfo,
};
