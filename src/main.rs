//! db-query-kit - command line entry point.
//!
//! Reads one JSON query descriptor, compiles it for the target database and
//! either prints the compiled statement (`--dry-run`) or runs it and prints
//! the result as JSON.

use db_query_kit::DbResult;
use db_query_kit::config::Config;
use db_query_kit::db::{Database, PoolManager};
use db_query_kit::models::{ConnectionConfig, QueryDescriptor, QueryOutput};
use db_query_kit::sql::BuildStatement;
use serde_json::Value as JsonValue;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries only the JSON result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

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

/// Read the descriptor from the input file, or stdin.
async fn read_descriptor(config: &Config) -> Result<JsonValue, Box<dyn std::error::Error>> {
    let text = match config.input_path() {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    Ok(serde_json::from_str(&text)?)
}

/// Run the descriptor, inside a transaction when requested.
async fn execute(
    database: &Database,
    descriptor: &QueryDescriptor,
    in_transaction: bool,
) -> DbResult<QueryOutput> {
    if !in_transaction {
        return database.run(descriptor).await;
    }

    let mut session = database.transaction().await?;
    match session.run(descriptor).await {
        Ok(output) => {
            session.commit().await?;
            Ok(output)
        }
        Err(e) => {
            session.rollback().await;
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    let connection: ConnectionConfig = config
        .database_config()
        .and_then(|db| db.into_connection_config())?;
    let descriptor = QueryDescriptor::parse(config.kind, read_descriptor(&config).await?)?;

    if config.dry_run {
        let statement = descriptor.build(connection.db_type)?;
        println!("{}", serde_json::to_string_pretty(&statement)?);
        return Ok(());
    }

    info!(
        kind = %config.kind,
        database = %connection.masked_connection_string(),
        transaction = config.transaction,
        "Running query"
    );

    let manager = PoolManager::new();
    let result = match Database::connect(&manager, &connection).await {
        Ok(database) => execute(&database, &descriptor, config.transaction).await,
        Err(e) => Err(e),
    };
    manager.close_all().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, suggestion = ?e.suggestion(), "Query failed");
            Err(e.into())
        }
    }
}
