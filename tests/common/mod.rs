//! In-memory recording driver shared by the integration tests.
//!
//! Every acquire, execute and release is logged so tests can assert exactly which
//! statements ran on which connection. Responses are synthesized from the SQL:
//! - `SELECT count(*)` returns the scripted count
//! - `SELECT ... LIMIT n OFFSET m` returns `n` rows with ids `m..m+n`
//! - `INSERT ...` echoes its parameters back as one row
//! - everything else returns no rows

#![allow(dead_code)]

use async_trait::async_trait;
use pg_batch_reader::db::{ConnectionPool, PoolConnection};
use pg_batch_reader::{Batch, DbError, DbResult, QueryParam, Row};
use serde_json::{Value as JsonValue, json};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire(u64),
    Execute {
        conn: u64,
        sql: String,
        params: Vec<QueryParam>,
    },
    Release(u64),
    Close,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    next_id: u64,
    executed: usize,
    count: Option<JsonValue>,
    fail_on_statement: Option<usize>,
    fail_matching: Option<String>,
}

/// A scripted pool. Clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct MockPool {
    state: Arc<Mutex<State>>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned in the `count` column of count queries (default 0).
    pub fn with_count(self, count: JsonValue) -> Self {
        self.state.lock().unwrap().count = Some(count);
        self
    }

    /// Fail the `n`th executed statement (1-based).
    pub fn fail_on_statement(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_on_statement = Some(n);
        self
    }

    /// Fail every statement whose SQL contains `needle`.
    pub fn fail_matching(self, needle: &str) -> Self {
        self.state.lock().unwrap().fail_matching = Some(needle.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Executed SQL in order.
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// `(connection id, sql)` for every execute.
    pub fn executions(&self) -> Vec<(u64, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { conn, sql, .. } => Some((conn, sql)),
                _ => None,
            })
            .collect()
    }

    pub fn acquired(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Acquire(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Release(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Connections acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.acquired().len() - self.released().len()
    }

    pub fn count_queries(&self) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.starts_with("SELECT count(*)"))
            .count()
    }

    /// Batch `SELECT`s, i.e. everything that is not a count query.
    pub fn batch_queries(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("SELECT") && !s.starts_with("SELECT count(*)"))
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.events().contains(&Event::Close)
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> DbResult<MockConnection> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.events.push(Event::Acquire(id));
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&self) {
        self.state.lock().unwrap().events.push(Event::Close);
    }
}

pub struct MockConnection {
    id: u64,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl PoolConnection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Batch> {
        let mut state = self.state.lock().unwrap();
        state.executed += 1;
        state.events.push(Event::Execute {
            conn: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let failing = state.fail_on_statement == Some(state.executed)
            || state
                .fail_matching
                .as_deref()
                .is_some_and(|needle| sql.contains(needle));
        if failing {
            return Err(DbError::execution(
                format!("scripted failure: {}", sql),
                Some("XX000".to_string()),
            ));
        }

        Ok(respond(sql, params, state.count.clone()))
    }

    async fn release(self) {
        self.state.lock().unwrap().events.push(Event::Release(self.id));
    }
}

fn respond(sql: &str, params: &[QueryParam], count: Option<JsonValue>) -> Batch {
    if sql.starts_with("SELECT count(*)") {
        let mut row = Row::new();
        row.insert("count".to_string(), count.unwrap_or(json!(0)));
        return vec![row];
    }
    if sql.starts_with("SELECT") {
        let limit = keyword_value(sql, "LIMIT").unwrap_or(0);
        let offset = keyword_value(sql, "OFFSET").unwrap_or(0);
        return (offset..offset + limit)
            .map(|id| {
                let mut row = Row::new();
                row.insert("id".to_string(), json!(id));
                row
            })
            .collect();
    }
    if sql.starts_with("INSERT") {
        let mut row = Row::new();
        for (i, p) in params.iter().enumerate() {
            row.insert(format!("${}", i + 1), serde_json::to_value(p).unwrap());
        }
        return vec![row];
    }
    Vec::new()
}

/// Numeric token following `keyword` in `sql`.
pub fn keyword_value(sql: &str, keyword: &str) -> Option<u64> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| *t == keyword)?;
    tokens.next()?.parse().ok()
}

/// `(limit, offset)` of each batch statement.
pub fn windows(statements: &[String]) -> Vec<(u64, u64)> {
    statements
        .iter()
        .map(|s| {
            (
                keyword_value(s, "LIMIT").unwrap(),
                keyword_value(s, "OFFSET").unwrap(),
            )
        })
        .collect()
}
