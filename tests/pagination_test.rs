//! Integration tests for chunked reads against the recording driver.

mod common;

use common::{MockPool, windows};
use futures_util::{StreamExt, TryStreamExt};
use pg_batch_reader::{
    Batch, CompareOp, Engine, EngineOptions, JoinDescriptor, Predicate, QueryParam, ReadQuery,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

async fn collect(engine: &Engine<MockPool>, query: ReadQuery) -> Vec<Batch> {
    let stream = assert_ok!(engine.read(query));
    assert_ok!(stream.try_collect::<Vec<_>>().await)
}

#[tokio::test]
async fn test_limit_divisible_by_step() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let batches = collect(&engine, ReadQuery::table("events").limit(50_000).step(5000)).await;

    assert_eq!(batches.len(), 10);
    assert!(batches.iter().all(|b| b.len() == 5000));
    assert_eq!(pool.count_queries(), 0);

    let expected: Vec<(u64, u64)> = (0..10).map(|n| (5000, n * 5000)).collect();
    assert_eq!(windows(&pool.batch_queries()), expected);
}

#[tokio::test]
async fn test_limit_with_remainder() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let batches = collect(&engine, ReadQuery::table("events").limit(1001).step(1000)).await;

    assert_eq!(batches.len(), 2);
    assert_eq!(windows(&pool.batch_queries()), vec![(1000, 0), (1, 1000)]);
    assert_eq!(pool.count_queries(), 0);
}

#[tokio::test]
async fn test_unbounded_read_uses_count() {
    let pool = MockPool::new().with_count(json!("2500"));
    let engine = Engine::new(pool.clone());

    let batches = collect(&engine, ReadQuery::table("events").step(1000)).await;

    assert_eq!(
        batches.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![1000, 1000, 500]
    );
    assert_eq!(pool.count_queries(), 1);
    assert_eq!(pool.statements()[0], "SELECT count(*) FROM events");
    assert_eq!(
        windows(&pool.batch_queries()),
        vec![(1000, 0), (1000, 1000), (500, 2000)]
    );
}

#[tokio::test]
async fn test_limit_below_step_is_single_query() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let batches = collect(&engine, ReadQuery::table("events").limit(500).step(1000)).await;

    assert_eq!(batches.len(), 1);
    assert_eq!(
        pool.statements(),
        vec!["SELECT * FROM events LIMIT 500 OFFSET 0".to_string()]
    );
}

#[tokio::test]
async fn test_limit_equal_to_step() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    collect(&engine, ReadQuery::table("events").limit(1000).step(1000)).await;

    assert_eq!(windows(&pool.batch_queries()), vec![(1000, 0)]);
    assert_eq!(pool.count_queries(), 0);
}

#[tokio::test]
async fn test_empty_count_yields_no_batches() {
    let pool = MockPool::new().with_count(json!(0));
    let engine = Engine::new(pool.clone());

    let batches = collect(&engine, ReadQuery::table("events")).await;

    assert!(batches.is_empty());
    assert_eq!(pool.count_queries(), 1);
    assert!(pool.batch_queries().is_empty());
}

#[tokio::test]
async fn test_offset_shifts_batches() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    collect(
        &engine,
        ReadQuery::table("events").limit(25).step(10).offset(100),
    )
    .await;

    assert_eq!(
        windows(&pool.batch_queries()),
        vec![(10, 100), (10, 110), (5, 120)]
    );
}

#[tokio::test]
async fn test_default_step_comes_from_options() {
    let pool = MockPool::new();
    let engine = Engine::with_options(pool.clone(), EngineOptions { default_step: 100 });

    collect(&engine, ReadQuery::table("events").limit(250)).await;

    assert_eq!(
        windows(&pool.batch_queries()),
        vec![(100, 0), (100, 100), (50, 200)]
    );
}

#[tokio::test]
async fn test_filters_bind_on_count_and_batches() {
    let pool = MockPool::new().with_count(json!(3));
    let engine = Engine::new(pool.clone());

    let query = ReadQuery::table("posts")
        .join(JoinDescriptor::new("posts", "users").on("posted_by", "id"))
        .filter(
            Predicate::new()
                .eq("published", true)
                .compare("views", CompareOp::Gte, 10),
        );
    collect(&engine, query).await;

    let expected_params = vec![QueryParam::Bool(true), QueryParam::Int(10)];
    let executes: Vec<_> = pool
        .events()
        .into_iter()
        .filter_map(|e| match e {
            common::Event::Execute { sql, params, .. } => Some((sql, params)),
            _ => None,
        })
        .collect();

    assert_eq!(executes.len(), 2);
    assert_eq!(
        executes[0].0,
        "SELECT count(*) FROM posts WHERE published = $1 AND views >= $2"
    );
    assert_eq!(
        executes[1].0,
        "SELECT * FROM posts JOIN users ON posts.posted_by = users.id \
         WHERE published = $1 AND views >= $2 LIMIT 3 OFFSET 0"
    );
    assert!(executes.iter().all(|(_, p)| *p == expected_params));
}

#[tokio::test]
async fn test_read_is_lazy() {
    let pool = MockPool::new().with_count(json!(10));
    let engine = Engine::new(pool.clone());

    let stream = assert_ok!(engine.read(ReadQuery::table("events")));
    assert!(pool.events().is_empty());
    drop(stream);
    assert!(pool.events().is_empty());
}

#[tokio::test]
async fn test_dropping_stream_stops_queries() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let mut stream = assert_ok!(engine.read(ReadQuery::table("events").limit(5000).step(1000)));
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1000);
    drop(stream);

    assert_eq!(pool.batch_queries().len(), 1);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_batches_are_not_prefetched() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let mut stream = assert_ok!(engine.read(ReadQuery::table("events").limit(3000).step(1000)));
    for expected in 1..=3 {
        assert_ok!(stream.next().await.unwrap());
        assert_eq!(pool.batch_queries().len(), expected);
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_failing_batch_aborts_stream() {
    let pool = MockPool::new().fail_on_statement(2);
    let engine = Engine::new(pool.clone());

    let mut stream = assert_ok!(engine.read(ReadQuery::table("events").limit(4000).step(1000)));
    assert_ok!(stream.next().await.unwrap());
    let err = assert_err!(stream.next().await.unwrap());
    assert!(matches!(
        err,
        pg_batch_reader::DbError::Execution { ref sql_state, .. } if sql_state.as_deref() == Some("XX000")
    ));
    assert!(stream.next().await.is_none());

    assert_eq!(pool.batch_queries().len(), 2);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_failing_count_aborts_stream() {
    let pool = MockPool::new().fail_matching("count(*)");
    let engine = Engine::new(pool.clone());

    let result = engine.read(ReadQuery::table("events")).unwrap().try_collect::<Vec<_>>().await;
    assert_err!(result);
    assert!(pool.batch_queries().is_empty());
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_each_batch_uses_a_released_pooled_connection() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    collect(&engine, ReadQuery::table("events").limit(3000).step(1000)).await;

    assert_eq!(pool.acquired(), vec![1, 2, 3]);
    assert_eq!(pool.released(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_construction_errors_precede_io() {
    let pool = MockPool::new();
    let engine = Engine::new(pool.clone());

    let zero_step = engine.read(ReadQuery::table("events").step(0));
    assert!(zero_step.err().unwrap().is_construction());

    let no_on = engine.read(ReadQuery::table("posts").join(JoinDescriptor::new("posts", "users")));
    assert!(no_on.err().unwrap().is_construction());

    let no_from = engine.read(ReadQuery::table(""));
    assert!(no_from.err().unwrap().is_construction());

    let empty_in = engine.read(
        ReadQuery::table("events").filter(Predicate::new().any_of("kind", Vec::<QueryParam>::new())),
    );
    assert!(empty_in.err().unwrap().is_construction());

    assert!(pool.events().is_empty());
}

#[tokio::test]
async fn test_read_all_flattens_in_order() {
    let pool = MockPool::new().with_count(json!(2500));
    let engine = Engine::new(pool.clone());

    let rows = assert_ok!(engine.read_all(ReadQuery::table("events")).await);
    assert_eq!(rows.len(), 2500);
    let ids: Vec<u64> = rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, (0..2500).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_count_runs_only_the_count_query() {
    let pool = MockPool::new().with_count(json!(42));
    let engine = Engine::new(pool.clone());

    let query = ReadQuery::table("events").filter(Predicate::new().eq("kind", "click"));
    assert_eq!(assert_ok!(engine.count(&query).await), 42);
    assert_eq!(
        pool.statements(),
        vec!["SELECT count(*) FROM events WHERE kind = $1".to_string()]
    );
}

#[tokio::test]
async fn test_unparseable_count_is_an_error() {
    let pool = MockPool::new().with_count(json!("lots"));
    let engine = Engine::new(pool.clone());

    let err = assert_err!(engine.read_all(ReadQuery::table("events")).await);
    assert!(matches!(err, pg_batch_reader::DbError::Decode { .. }));
    assert!(pool.batch_queries().is_empty());
}
