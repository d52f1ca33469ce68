//! Chunked pagination.
//!
//! A read is split into batches of at most `step` rows. Each batch is one
//! `SELECT ... LIMIT n OFFSET m` run on a connection from the router, and the
//! batches are delivered as a pull-driven stream:
//! - nothing is executed until the stream is polled
//! - batch `n + 1` is only queried after batch `n` has been handed to the consumer
//! - dropping the stream stops all further queries
//! - the first failing batch ends the stream with its error
//!
//! How many batches to run comes from a [`BatchPlan`]. With a caller-supplied
//! limit the plan is pure arithmetic; without one, a `count(*)` query over the
//! filtered base table runs when the stream is first polled.

use crate::db::driver::ConnectionPool;
use crate::db::router::ConnectionRouter;
use crate::error::{DbError, DbResult};
use crate::models::{Batch, Row};
use crate::sql::CompiledRead;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

/// A stream of row batches in increasing offset order.
pub type BatchStream = BoxStream<'static, DbResult<Batch>>;

/// `LIMIT`/`OFFSET` pair for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub limit: u64,
    pub offset: u64,
}

/// How many batches a read runs and the window of each.
///
/// Every batch but the last uses `LIMIT step`. The last uses the remainder of the
/// row total over `step`, or `step` when the total divides evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    batch_count: u64,
    step: u64,
    offset: u64,
    last_limit: u64,
}

impl BatchPlan {
    /// Plan for a caller-supplied limit. Needs no database round-trip.
    ///
    /// A limit below `step` is a single batch of exactly `limit` rows.
    pub fn for_limit(limit: u64, step: u64, offset: u64) -> DbResult<Self> {
        let step = validate_step(step)?;
        if limit < step {
            return Ok(Self {
                batch_count: 1,
                step,
                offset,
                last_limit: limit,
            });
        }
        Ok(Self::covering(limit, step, offset))
    }

    /// Plan for a table holding `rows` matching rows.
    pub fn for_row_count(rows: u64, step: u64, offset: u64) -> DbResult<Self> {
        let step = validate_step(step)?;
        Ok(Self::covering(rows, step, offset))
    }

    fn covering(total: u64, step: u64, offset: u64) -> Self {
        let remainder = total % step;
        Self {
            batch_count: total.div_ceil(step),
            step,
            offset,
            last_limit: if remainder == 0 { step } else { remainder },
        }
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Window of batch `n` (0-based), or `None` past the last batch.
    pub fn window(&self, n: u64) -> Option<BatchWindow> {
        if n >= self.batch_count {
            return None;
        }
        let limit = if n + 1 == self.batch_count {
            self.last_limit
        } else {
            self.step
        };
        Some(BatchWindow {
            limit,
            offset: self.offset.saturating_add(n.saturating_mul(self.step)),
        })
    }

    /// All windows in order.
    pub fn windows(&self) -> impl Iterator<Item = BatchWindow> + '_ {
        (0..self.batch_count).filter_map(|n| self.window(n))
    }
}

fn validate_step(step: u64) -> DbResult<u64> {
    if step == 0 {
        return Err(DbError::construction("step must be greater than 0"));
    }
    Ok(step)
}

/// Read the row total out of a `count(*)` result.
///
/// Accepts the count as a number or a numeric string. No rows means zero.
pub fn parse_count(rows: &[Row]) -> DbResult<u64> {
    let Some(row) = rows.first() else {
        return Ok(0);
    };
    let value = row
        .get("count")
        .or_else(|| row.values().next())
        .ok_or_else(|| DbError::decode("count query returned a row with no columns"))?;

    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .ok_or_else(|| DbError::decode(format!("count is not a non-negative integer: {}", n))),
        JsonValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| DbError::decode(format!("count is not a non-negative integer: '{}'", s))),
        JsonValue::Null => Ok(0),
        other => Err(DbError::decode(format!("unexpected count value: {}", other))),
    }
}

/// Run the `count(*)` query for a compiled read.
pub(crate) async fn count_rows<P: ConnectionPool>(
    router: &ConnectionRouter<P>,
    read: &CompiledRead,
) -> DbResult<u64> {
    let count = read.count_statement();
    let rows = router.run(&count.sql, &count.params).await?;
    let total = parse_count(&rows)?;
    debug!(total, "Counted matching rows");
    Ok(total)
}

enum Cursor {
    /// No limit was given; the plan comes from a count query on first poll.
    NeedsCount { step: u64, offset: u64 },
    Planned { plan: BatchPlan, next: u64 },
}

struct ReadState<P: ConnectionPool> {
    router: Arc<ConnectionRouter<P>>,
    read: CompiledRead,
    cursor: Cursor,
}

/// Build the lazy batch stream for a compiled read.
///
/// `step` must already be validated; construction errors belong to the caller.
pub(crate) fn batch_stream<P: ConnectionPool>(
    router: Arc<ConnectionRouter<P>>,
    read: CompiledRead,
    limit: Option<u64>,
    step: u64,
    offset: u64,
) -> DbResult<BatchStream> {
    let cursor = match limit {
        Some(limit) => Cursor::Planned {
            plan: BatchPlan::for_limit(limit, step, offset)?,
            next: 0,
        },
        None => {
            validate_step(step)?;
            Cursor::NeedsCount { step, offset }
        }
    };

    let state = ReadState {
        router,
        read,
        cursor,
    };

    Ok(stream::try_unfold(state, next_batch).boxed())
}

/// Fetch the next batch, planning first if the read has no limit.
async fn next_batch<P: ConnectionPool>(
    mut state: ReadState<P>,
) -> DbResult<Option<(Batch, ReadState<P>)>> {
    let (plan, n) = match state.cursor {
        Cursor::Planned { plan, next } => (plan, next),
        Cursor::NeedsCount { step, offset } => {
            let total = count_rows(&state.router, &state.read).await?;
            (BatchPlan::for_row_count(total, step, offset)?, 0)
        }
    };

    let Some(window) = plan.window(n) else {
        debug!(batches = plan.batch_count(), "Read complete");
        return Ok(None);
    };

    debug!(
        batch = n,
        of = plan.batch_count(),
        limit = window.limit,
        offset = window.offset,
        "Fetching batch"
    );
    let statement = state.read.batch_statement(window.limit, window.offset);
    let rows = state.router.run(&statement.sql, &statement.params).await?;

    state.cursor = Cursor::Planned { plan, next: n + 1 };
    Ok(Some((rows, state)))
}
