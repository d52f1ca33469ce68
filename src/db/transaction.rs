//! Transaction controller.
//!
//! Owns at most one reserved connection. While a transaction is open every engine
//! operation is routed onto that connection (see [`crate::db::router`]); only
//! [`TransactionController::commit`] and [`TransactionController::rollback`] end
//! the reservation and hand the connection back to the pool.
//!
//! The reserved connection sits behind an async mutex, so two operations can never
//! use it at the same time.

use crate::db::driver::{ConnectionPool, PoolConnection};
use crate::error::{DbError, DbResult};
use crate::models::TransactionInfo;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// An open transaction and its reserved connection.
pub struct OpenTransaction<C> {
    pub(crate) info: TransactionInfo,
    pub(crate) connection: C,
}

impl<C> OpenTransaction<C> {
    pub fn info(&self) -> &TransactionInfo {
        &self.info
    }
}

pub type TransactionSlot<C> = Option<OpenTransaction<C>>;

/// Open/closed state machine around a single reserved connection.
pub struct TransactionController<P: ConnectionPool> {
    pool: Arc<P>,
    slot: Mutex<TransactionSlot<P::Connection>>,
}

impl<P: ConnectionPool> TransactionController<P> {
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            slot: Mutex::new(None),
        }
    }

    /// Reserve a connection and issue `BEGIN`.
    ///
    /// Fails with a transaction state error, without touching the pool, if a
    /// transaction is already open.
    pub async fn open(&self) -> DbResult<TransactionInfo> {
        let mut slot = self.slot.lock().await;
        if let Some(open) = slot.as_ref() {
            return Err(DbError::transaction_state(format!(
                "transaction {} is already open",
                open.info.id
            )));
        }

        let mut connection = self.pool.acquire().await?;
        if let Err(e) = connection.execute("BEGIN", &[]).await {
            connection.release().await;
            return Err(e);
        }

        let info = TransactionInfo {
            id: generate_transaction_id(),
            started_at: Utc::now(),
        };
        info!(transaction_id = %info.id, "Transaction started");

        *slot = Some(OpenTransaction {
            info: info.clone(),
            connection,
        });
        Ok(info)
    }

    /// Issue `COMMIT` and release the reserved connection.
    pub async fn commit(&self) -> DbResult<()> {
        self.finish("COMMIT").await
    }

    /// Issue `ROLLBACK` and release the reserved connection.
    pub async fn rollback(&self) -> DbResult<()> {
        self.finish("ROLLBACK").await
    }

    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn info(&self) -> Option<TransactionInfo> {
        self.slot.lock().await.as_ref().map(|open| open.info.clone())
    }

    /// Lock the slot for routing. The guard keeps other operations off the
    /// reserved connection until it is dropped.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, TransactionSlot<P::Connection>> {
        self.slot.lock().await
    }

    /// The state is closed once this returns, whether or not the statement succeeded.
    async fn finish(&self, statement: &'static str) -> DbResult<()> {
        let mut slot = self.slot.lock().await;
        let Some(mut open) = slot.take() else {
            return Err(DbError::transaction_state(format!(
                "cannot {}: no transaction is open",
                statement
            )));
        };

        let result = open.connection.execute(statement, &[]).await;
        open.connection.release().await;

        match &result {
            Ok(_) => info!(
                transaction_id = %open.info.id,
                statement,
                "Transaction closed"
            ),
            Err(e) => warn!(
                transaction_id = %open.info.id,
                statement,
                error = %e,
                "Transaction closed with a failed statement"
            ),
        }

        result.map(|_| ())
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
