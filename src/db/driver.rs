//! Driver collaborator interface.
//!
//! The engine never talks to a database directly. It checks connections out of a
//! [`ConnectionPool`], runs parameterized SQL on them and hands them back. Pool
//! sizing, acquire timeouts and transport retries all live behind these traits.

use crate::error::DbResult;
use crate::models::{Batch, QueryParam};
use async_trait::async_trait;

/// A shared pool of database connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: PoolConnection + 'static;

    /// Check a connection out of the pool.
    async fn acquire(&self) -> DbResult<Self::Connection>;

    /// Drain the pool. Connections still checked out are closed when released.
    async fn close(&self);
}

/// A connection checked out of a [`ConnectionPool`].
#[async_trait]
pub trait PoolConnection: Send {
    /// Execute `sql` with positional `$n` parameters and return every row.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Batch>;

    /// Return the connection to its pool.
    async fn release(self);
}
