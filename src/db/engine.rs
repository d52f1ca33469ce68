//! Query engine.
//!
//! [`Engine`] is the public entry point. It compiles descriptors, routes every
//! statement through the [`ConnectionRouter`] (so an open transaction captures all
//! traffic), and exposes reads as lazy [`BatchStream`]s.

use crate::config::{DatabaseConfig, EngineOptions};
use crate::db::driver::ConnectionPool;
use crate::db::pagination::{BatchStream, batch_stream, count_rows};
use crate::db::postgres::PgDriver;
use crate::db::router::ConnectionRouter;
use crate::db::transaction::TransactionController;
use crate::error::{DbError, DbResult};
use crate::models::{Batch, InsertQuery, ReadQuery, Row, TransactionInfo};
use crate::sql::{CompiledRead, insert_statement};
use futures_util::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chunked reads, inserts and a single optional transaction over a connection pool.
///
/// Cloning is cheap; clones share the pool and the transaction state.
pub struct Engine<P: ConnectionPool> {
    pool: Arc<P>,
    transactions: Arc<TransactionController<P>>,
    router: Arc<ConnectionRouter<P>>,
    options: EngineOptions,
}

impl<P: ConnectionPool> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            transactions: Arc::clone(&self.transactions),
            router: Arc::clone(&self.router),
            options: self.options,
        }
    }
}

impl Engine<PgDriver> {
    /// Connect to PostgreSQL using the pool and engine options in `config`.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        config
            .pool_options
            .validate()
            .map_err(DbError::construction)?;
        let driver = PgDriver::connect(config).await?;
        Ok(Self::with_options(driver, config.engine_options))
    }
}

impl<P: ConnectionPool> Engine<P> {
    pub fn new(pool: P) -> Self {
        Self::with_options(pool, EngineOptions::default())
    }

    pub fn with_options(pool: P, options: EngineOptions) -> Self {
        let pool = Arc::new(pool);
        let transactions = Arc::new(TransactionController::new(Arc::clone(&pool)));
        let router = Arc::new(ConnectionRouter::new(
            Arc::clone(&pool),
            Arc::clone(&transactions),
        ));
        Self {
            pool,
            transactions,
            router,
            options,
        }
    }

    /// The underlying driver collaborator.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Start a chunked read.
    ///
    /// Malformed descriptors fail here, before any connection is acquired. The
    /// returned stream runs nothing until polled and yields one element per batch.
    pub fn read(&self, query: ReadQuery) -> DbResult<BatchStream> {
        let step = query.step.unwrap_or(self.options.default_step);
        let read = CompiledRead::compile(&query)?;
        debug!(
            from = %query.from,
            limit = ?query.limit,
            offset = query.offset,
            step,
            "Starting batched read"
        );
        batch_stream(
            Arc::clone(&self.router),
            read,
            query.limit,
            step,
            query.offset,
        )
    }

    /// Run a read to completion and concatenate its batches in order.
    pub async fn read_all(&self, query: ReadQuery) -> DbResult<Vec<Row>> {
        let batches: Vec<Batch> = self.read(query)?.try_collect().await?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Number of rows matching the read's base table and filters. Joins, limit
    /// and offset are ignored.
    pub async fn count(&self, query: &ReadQuery) -> DbResult<u64> {
        let read = CompiledRead::compile(query)?;
        count_rows(&self.router, &read).await
    }

    /// Insert one row and return what `RETURNING` yields.
    pub async fn insert(&self, query: InsertQuery) -> DbResult<Batch> {
        let statement = insert_statement(&query)?;
        self.router.run(&statement.sql, &statement.params).await
    }

    /// Open a transaction. Until it is committed or rolled back, every engine
    /// operation runs on its reserved connection.
    pub async fn begin_transaction(&self) -> DbResult<TransactionInfo> {
        self.transactions.open().await
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.transactions.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.transactions.rollback().await
    }

    pub async fn in_transaction(&self) -> bool {
        self.transactions.is_open().await
    }

    pub async fn transaction_info(&self) -> Option<TransactionInfo> {
        self.transactions.info().await
    }

    /// Drain the pool. An open transaction is rolled back first.
    pub async fn close(&self) {
        if let Some(open) = self.transactions.info().await {
            warn!(
                transaction_id = %open.id,
                "Closing engine with an open transaction, rolling back"
            );
            if let Err(e) = self.transactions.rollback().await {
                warn!(error = %e, "Rollback during close failed");
            }
        }
        self.pool.close().await;
        info!("Connection pool closed");
    }
}
