//! pg-batch-reader - Main entry point.
//!
//! Streams a table (optionally joined and filtered) out of PostgreSQL in batches,
//! printing every row as one JSON line on stdout.

use clap::Parser;
use futures_util::StreamExt;
use pg_batch_reader::Engine;
use pg_batch_reader::config::{Config, DatabaseConfig};
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so stdout carries only rows
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    let db_config = DatabaseConfig::parse(&config.database)?;
    let query = config.read_query()?;

    info!(
        database = %db_config.masked(),
        from = %query.from,
        "Starting pg-batch-reader v{}",
        env!("CARGO_PKG_VERSION")
    );

    let engine = Engine::connect(&db_config).await?;

    let result = async {
        let mut batches = engine.read(query)?;
        let stdout = std::io::stdout();
        let mut rows = 0usize;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            let mut out = stdout.lock();
            for row in &batch {
                serde_json::to_writer(&mut out, row)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            rows += batch.len();
        }
        Ok::<_, Box<dyn std::error::Error>>(rows)
    }
    .await;

    engine.close().await;

    match result {
        Ok(rows) => {
            info!(rows, "Read complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Read failed");
            Err(e)
        }
    }
}
