//! Connection router.
//!
//! Hands out the transaction's reserved connection while a transaction is open,
//! and a freshly pooled connection otherwise. [`RoutedConnection::release`] only
//! returns pooled connections to the pool; the reserved one stays owned by the
//! transaction controller.

use crate::db::driver::{ConnectionPool, PoolConnection};
use crate::db::transaction::{TransactionController, TransactionSlot};
use crate::error::{DbError, DbResult};
use crate::models::{Batch, QueryParam};
use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::debug;

pub struct ConnectionRouter<P: ConnectionPool> {
    pool: Arc<P>,
    transactions: Arc<TransactionController<P>>,
}

/// A connection obtained from [`ConnectionRouter::acquire`].
pub enum RoutedConnection<'a, C> {
    /// The open transaction's connection, held exclusively until dropped.
    Reserved(MutexGuard<'a, TransactionSlot<C>>),
    /// Checked out of the pool for this operation only.
    Pooled(C),
}

impl<P: ConnectionPool> ConnectionRouter<P> {
    pub fn new(pool: Arc<P>, transactions: Arc<TransactionController<P>>) -> Self {
        Self { pool, transactions }
    }

    /// Route to the reserved connection if a transaction is open, else the pool.
    pub async fn acquire(&self) -> DbResult<RoutedConnection<'_, P::Connection>> {
        let slot = self.transactions.lock().await;
        if slot.is_some() {
            return Ok(RoutedConnection::Reserved(slot));
        }
        drop(slot);

        let conn = self.pool.acquire().await?;
        Ok(RoutedConnection::Pooled(conn))
    }

    /// Acquire, execute one statement, and release.
    ///
    /// The connection is released whether or not the statement succeeded.
    pub async fn run(&self, sql: &str, params: &[QueryParam]) -> DbResult<Batch> {
        let mut conn = self.acquire().await?;
        debug!(
            sql = %sql,
            params = params.len(),
            reserved = conn.is_reserved(),
            "Executing statement"
        );
        let result = conn.execute(sql, params).await;
        conn.release().await;
        result
    }
}

impl<C: PoolConnection> RoutedConnection<'_, C> {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Batch> {
        match self {
            Self::Reserved(slot) => match slot.as_mut() {
                Some(open) => open.connection.execute(sql, params).await,
                None => Err(DbError::internal("reserved connection is no longer held")),
            },
            Self::Pooled(conn) => conn.execute(sql, params).await,
        }
    }

    /// Return a pooled connection to the pool. A reserved connection is only
    /// unlocked; its transaction keeps it.
    pub async fn release(self) {
        match self {
            Self::Reserved(_) => {}
            Self::Pooled(conn) => conn.release().await,
        }
    }
}
