//! Statement execution.
//!
//! [`StatementExecutor`] runs a [`CompiledStatement`] either on a pool (any
//! free connection) or on a connection reserved by a transaction session.
//! Every run is timed; slow statements and failures are reported through the
//! configured [`LogSink`](crate::logging::LogSink).
//!
//! Backend-specific code lives in the `mysql`, `postgres` and `sqlite`
//! submodules, which share one shape so the differences stay visible.

use crate::db::pool::{DbConnection, DbPool};
use crate::error::{DbError, DbResult};
use crate::logging::{SharedSink, default_sink};
use crate::models::{CompiledStatement, DatabaseType, QueryDescriptor, QueryOutput};
use crate::sql::BuildStatement;
use serde_json::{Map, Value as JsonValue, json};
use std::time::{Duration, Instant};
use tracing::debug;

/// Statements running longer than this are logged as slow.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(1000);

/// Where a statement runs.
#[derive(Debug)]
pub enum Target<'a> {
    /// Any free connection of the pool.
    Pool(&'a DbPool),
    /// A connection reserved by the caller.
    Connection(&'a mut DbConnection),
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    pub rows_affected: u64,
    /// Generated key of the last inserted row (MySQL, SQLite). Only
    /// meaningful after an INSERT.
    pub last_insert_id: Option<i64>,
}

/// Runs compiled statements and reports on them.
#[derive(Clone)]
pub struct StatementExecutor {
    sink: SharedSink,
}

impl std::fmt::Debug for StatementExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementExecutor").finish_non_exhaustive()
    }
}

impl Default for StatementExecutor {
    fn default() -> Self {
        Self::new(default_sink())
    }
}

impl StatementExecutor {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Run a statement and return its rows as JSON objects.
    pub async fn fetch_all(
        &self,
        target: Target<'_>,
        statement: &CompiledStatement,
    ) -> DbResult<Vec<Map<String, JsonValue>>> {
        let sql = statement.sql.as_str();
        let params = statement.params.as_slice();
        debug!(sql = %sql, params = params.len(), "Fetching rows");

        let start = Instant::now();
        let result = match target {
            Target::Pool(DbPool::MySql(pool)) => {
                mysql::fetch_all(pool, sql, params).await
            }
            Target::Pool(DbPool::Postgres(pool)) => {
                postgres::fetch_all(pool, sql, params).await
            }
            Target::Pool(DbPool::SQLite(pool)) => {
                sqlite::fetch_all(pool, sql, params).await
            }
            Target::Connection(DbConnection::MySql(conn)) => {
                mysql::fetch_all(&mut **conn, sql, params).await
            }
            Target::Connection(DbConnection::Postgres(conn)) => {
                postgres::fetch_all(&mut **conn, sql, params).await
            }
            Target::Connection(DbConnection::SQLite(conn)) => {
                sqlite::fetch_all(&mut **conn, sql, params).await
            }
        };
        self.report(statement, start.elapsed(), result)
    }

    /// Run a statement that returns no rows.
    pub async fn execute(
        &self,
        target: Target<'_>,
        statement: &CompiledStatement,
    ) -> DbResult<ExecSummary> {
        let sql = statement.sql.as_str();
        let params = statement.params.as_slice();
        debug!(sql = %sql, params = params.len(), "Executing statement");

        let start = Instant::now();
        let result = match target {
            Target::Pool(DbPool::MySql(pool)) => mysql::execute(pool, sql, params).await,
            Target::Pool(DbPool::Postgres(pool)) => postgres::execute(pool, sql, params).await,
            Target::Pool(DbPool::SQLite(pool)) => sqlite::execute(pool, sql, params).await,
            Target::Connection(DbConnection::MySql(conn)) => {
                mysql::execute(&mut **conn, sql, params).await
            }
            Target::Connection(DbConnection::Postgres(conn)) => {
                postgres::execute(&mut **conn, sql, params).await
            }
            Target::Connection(DbConnection::SQLite(conn)) => {
                sqlite::execute(&mut **conn, sql, params).await
            }
        };
        self.report(statement, start.elapsed(), result)
    }

    /// Compile a descriptor for `db_type` and run it.
    ///
    /// SELECT descriptors return rows; the other kinds report affected rows.
    pub async fn run(
        &self,
        target: Target<'_>,
        descriptor: &QueryDescriptor,
        db_type: DatabaseType,
    ) -> DbResult<QueryOutput> {
        let statement = descriptor.build(db_type)?;
        let start = Instant::now();
        let mut output = match descriptor {
            QueryDescriptor::Select(_) => QueryOutput {
                rows: self.fetch_all(target, &statement).await?,
                ..QueryOutput::default()
            },
            _ => {
                let summary = self.execute(target, &statement).await?;
                let is_insert = matches!(descriptor, QueryDescriptor::Insert(_));
                QueryOutput {
                    rows_affected: summary.rows_affected,
                    last_insert_id: summary.last_insert_id.filter(|_| is_insert),
                    ..QueryOutput::default()
                }
            }
        };
        output.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Log slow or failed runs. Driver errors pass through unchanged.
    fn report<T>(
        &self,
        statement: &CompiledStatement,
        elapsed: Duration,
        result: Result<T, sqlx::Error>,
    ) -> DbResult<T> {
        let duration_ms = elapsed.as_millis() as u64;
        match result {
            Ok(value) => {
                if elapsed > SLOW_QUERY_THRESHOLD {
                    self.sink.warn(
                        "Slow statement",
                        &json!({
                            "sql": statement.sql,
                            "duration_ms": duration_ms,
                            "params": statement.params,
                        }),
                    );
                }
                Ok(value)
            }
            Err(e) => {
                self.sink.error(
                    "Statement failed",
                    &json!({
                        "sql": statement.sql,
                        "params": statement.params,
                        "duration_ms": duration_ms,
                        "error": e.to_string(),
                    }),
                );
                Err(DbError::Sqlx(e))
            }
        }
    }
}

// Statements without parameters go over the text protocol so that
// statements the server refuses to prepare still run.

mod mysql {
    use super::ExecSummary;
    use crate::db::params::bind_mysql_param;
    use crate::db::types::RowToJson;
    use crate::models::SqlValue;
    use futures_util::TryStreamExt;
    use serde_json::{Map, Value as JsonValue};
    use sqlx::{Executor, MySql};

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<Vec<Map<String, JsonValue>>, sqlx::Error>
    where
        E: Executor<'e, Database = MySql>,
    {
        if params.is_empty() {
            return executor
                .fetch(sql)
                .map_ok(|row| row.to_json_map())
                .try_collect()
                .await;
        }
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_mysql_param(query, param));
        query
            .fetch(executor)
            .map_ok(|row| row.to_json_map())
            .try_collect()
            .await
    }

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<ExecSummary, sqlx::Error>
    where
        E: Executor<'e, Database = MySql>,
    {
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), |query, param| bind_mysql_param(query, param))
                .execute(executor)
                .await?
        };
        let id = result.last_insert_id();
        Ok(ExecSummary {
            rows_affected: result.rows_affected(),
            last_insert_id: (id > 0).then_some(id as i64),
        })
    }
}

mod postgres {
    use super::ExecSummary;
    use crate::db::params::bind_postgres_param;
    use crate::db::types::RowToJson;
    use crate::models::SqlValue;
    use futures_util::TryStreamExt;
    use serde_json::{Map, Value as JsonValue};
    use sqlx::{Executor, Postgres};

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<Vec<Map<String, JsonValue>>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if params.is_empty() {
            return executor
                .fetch(sql)
                .map_ok(|row| row.to_json_map())
                .try_collect()
                .await;
        }
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_postgres_param(query, param));
        query
            .fetch(executor)
            .map_ok(|row| row.to_json_map())
            .try_collect()
            .await
    }

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<ExecSummary, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), |query, param| bind_postgres_param(query, param))
                .execute(executor)
                .await?
        };
        // Generated keys come back through RETURNING instead
        Ok(ExecSummary {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}

mod sqlite {
    use super::ExecSummary;
    use crate::db::params::bind_sqlite_param;
    use crate::db::types::RowToJson;
    use crate::models::SqlValue;
    use futures_util::TryStreamExt;
    use serde_json::{Map, Value as JsonValue};
    use sqlx::{Executor, Sqlite};

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<Vec<Map<String, JsonValue>>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if params.is_empty() {
            return executor
                .fetch(sql)
                .map_ok(|row| row.to_json_map())
                .try_collect()
                .await;
        }
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_sqlite_param(query, param));
        query
            .fetch(executor)
            .map_ok(|row| row.to_json_map())
            .try_collect()
            .await
    }

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [SqlValue],
    ) -> Result<ExecSummary, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = if params.is_empty() {
            executor.execute(sql).await?
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), |query, param| bind_sqlite_param(query, param))
                .execute(executor)
                .await?
        };
        let rows_affected = result.rows_affected();
        Ok(ExecSummary {
            rows_affected,
            last_insert_id: (rows_affected > 0).then(|| result.last_insert_rowid()),
        })
    }
}
