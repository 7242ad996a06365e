//! Transaction sessions.
//!
//! A [`TransactionSession`] reserves one pooled connection for its whole
//! lifetime and runs every statement on it:
//!
//! ```text
//! Created --init()--> Active --commit()/rollback()--> Terminated
//! ```
//!
//! The reserved connection stays in the session until the server has
//! answered `COMMIT` or `ROLLBACK`, and is then taken exactly once. A
//! terminal call that is cancelled half way leaves the session active, so
//! a later `rollback()` or the `Drop` impl still cleans the connection up.

use crate::db::executor::{ExecSummary, StatementExecutor, Target};
use crate::db::pool::{DbConnection, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::{
    CompiledStatement, DataMap, DatabaseType, DeleteQuery, InsertQuery, QueryDescriptor,
    QueryOutput, SelectQuery, SqlValue, UpdateQuery,
};
use crate::sql::{BuildStatement, WhereClause, guard};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::runtime::Handle;

/// Lifecycle state of a [`TransactionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created,
    Active,
    Terminated,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            _ => Self::Terminated,
        }
    }
}

/// Read-only view of a session's state that does not need the session
/// itself, so it can be checked while another task holds the session.
#[derive(Debug, Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A database transaction pinned to one reserved connection.
///
/// Methods take `&mut self`, so statements inside one session are always
/// sequential. Share a session across tasks through
/// [`SharedSession`](crate::db::SharedSession).
#[derive(Debug)]
pub struct TransactionSession {
    id: String,
    pool: DbPool,
    executor: StatementExecutor,
    conn: Option<DbConnection>,
    state: StateHandle,
    /// PostgreSQL refuses every statement after a failed one until the
    /// transaction ends, and turns `COMMIT` into a silent rollback.
    aborted: bool,
}

impl TransactionSession {
    /// Create a session. No connection is reserved until [`init`](Self::init).
    pub fn new(pool: DbPool, executor: StatementExecutor) -> Self {
        Self {
            id: generate_transaction_id(),
            pool,
            executor,
            conn: None,
            state: StateHandle::new(SessionState::Created),
            aborted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// A handle that keeps reporting this session's state.
    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    /// Reserve a connection and issue `BEGIN`.
    ///
    /// Waits for a free connection when the pool is exhausted. On failure the
    /// connection (if any) is released and the session becomes unusable.
    pub async fn init(&mut self) -> DbResult<()> {
        if self.state() != SessionState::Created {
            return Err(DbError::transaction(
                "transaction already initialized",
                self.id.as_str(),
            ));
        }

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                self.state.set(SessionState::Terminated);
                self.log_error("Failed to reserve connection", &e);
                return Err(e);
            }
        };

        if let Err(e) = conn.execute_raw("BEGIN").await {
            self.state.set(SessionState::Terminated);
            // State of a connection that refused BEGIN is unknown
            conn.detach();
            self.log_error("Failed to begin transaction", &e);
            return Err(e);
        }

        self.conn = Some(conn);
        self.state.set(SessionState::Active);
        self.executor.sink().info(
            "Transaction started",
            &json!({ "transaction_id": self.id, "db_type": self.db_type().to_string() }),
        );
        Ok(())
    }

    /// Run a statement that returns rows on the reserved connection.
    pub async fn fetch_all(
        &mut self,
        statement: &CompiledStatement,
    ) -> DbResult<Vec<Map<String, JsonValue>>> {
        let (executor, conn) = self.active()?;
        let result = executor
            .fetch_all(Target::Connection(conn), statement)
            .await;
        self.note_failure(&result);
        result
    }

    /// Run a statement that returns no rows on the reserved connection.
    pub async fn execute(&mut self, statement: &CompiledStatement) -> DbResult<ExecSummary> {
        let (executor, conn) = self.active()?;
        let result = executor.execute(Target::Connection(conn), statement).await;
        self.note_failure(&result);
        result
    }

    pub async fn select(&mut self, query: &SelectQuery) -> DbResult<Vec<Map<String, JsonValue>>> {
        self.ensure_active()?;
        let statement = query.build(self.db_type())?;
        self.fetch_all(&statement).await
    }

    pub async fn update(&mut self, query: &UpdateQuery) -> DbResult<ExecSummary> {
        self.ensure_active()?;
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    pub async fn delete(&mut self, query: &DeleteQuery) -> DbResult<ExecSummary> {
        self.ensure_active()?;
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    pub async fn insert(&mut self, query: &InsertQuery) -> DbResult<ExecSummary> {
        self.ensure_active()?;
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    /// `UPDATE` with a hand-written WHERE clause using `?` placeholders.
    pub async fn update_where(
        &mut self,
        table: &str,
        data: &DataMap,
        clause: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecSummary> {
        self.ensure_active()?;
        let clause = WhereClause::parse(clause)?;
        let statement = guard::update_where(self.db_type(), table, data, &clause, params)?;
        self.execute(&statement).await
    }

    /// `DELETE` with a hand-written WHERE clause using `?` placeholders.
    pub async fn delete_where(
        &mut self,
        table: &str,
        clause: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecSummary> {
        self.ensure_active()?;
        let clause = WhereClause::parse(clause)?;
        let statement = guard::delete_where(self.db_type(), table, &clause, params)?;
        self.execute(&statement).await
    }

    /// Compile and run any descriptor inside the transaction.
    pub async fn run(&mut self, descriptor: &QueryDescriptor) -> DbResult<QueryOutput> {
        let db_type = self.db_type();
        let (executor, conn) = self.active()?;
        let result = executor
            .run(Target::Connection(conn), descriptor, db_type)
            .await;
        self.note_failure(&result);
        result
    }

    /// Commit and release the connection.
    ///
    /// If `COMMIT` fails, a `ROLLBACK` is attempted and the `COMMIT` error is
    /// returned. On PostgreSQL a transaction in which a statement already
    /// failed cannot commit; it is rolled back and an error is returned.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.ensure_active()?;

        if self.aborted {
            let rollback = self.control("ROLLBACK").await;
            let err = DbError::transaction(
                "transaction aborted by a failed statement, rolled back instead of committed",
                self.id.as_str(),
            );
            self.log_error("Commit refused", &err);
            if let Err(rollback_err) = &rollback {
                self.log_error("Rollback of aborted transaction failed", rollback_err);
            }
            self.release(rollback.is_err());
            return Err(err);
        }

        let result = self.control("COMMIT").await;
        match result {
            Ok(()) => {
                self.release(false);
                self.executor
                    .sink()
                    .info("Transaction committed", &json!({ "transaction_id": self.id }));
                Ok(())
            }
            Err(e) => {
                self.log_error("Commit failed, rolling back", &e);
                let rollback = self.control("ROLLBACK").await;
                if let Err(rollback_err) = &rollback {
                    self.log_error("Rollback after failed commit failed", rollback_err);
                }
                self.release(rollback.is_err());
                Err(e)
            }
        }
    }

    /// Roll back and release the connection.
    ///
    /// Does nothing unless the session is active. Rollback failures are
    /// logged, not returned.
    pub async fn rollback(&mut self) {
        if self.ensure_active().is_err() {
            return;
        }

        let result = self.control("ROLLBACK").await;
        // Never hand a connection that may still be inside a transaction
        // back to the pool
        self.release(result.is_err());
        match result {
            Ok(()) => self
                .executor
                .sink()
                .info("Transaction rolled back", &json!({ "transaction_id": self.id })),
            Err(e) => self.log_error("Rollback failed", &e),
        }
    }

    fn active(&mut self) -> DbResult<(&StatementExecutor, &mut DbConnection)> {
        let Self {
            id,
            executor,
            conn,
            state,
            ..
        } = self;
        match conn {
            Some(conn) if state.get() == SessionState::Active => Ok((&*executor, conn)),
            _ => Err(DbError::transaction("no active transaction", id.as_str())),
        }
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.is_active() && self.conn.is_some() {
            Ok(())
        } else {
            Err(self.inactive_error())
        }
    }

    /// Run a control statement on the reserved connection, leaving it in
    /// place.
    async fn control(&mut self, sql: &str) -> DbResult<()> {
        let Self { id, conn, .. } = self;
        match conn {
            Some(conn) => conn.execute_raw(sql).await,
            None => Err(DbError::transaction("no active transaction", id.as_str())),
        }
    }

    /// Terminate the session and give up its connection, dropping it from
    /// the pool when it may still be inside a transaction.
    fn release(&mut self, detach: bool) {
        self.state.set(SessionState::Terminated);
        match self.conn.take() {
            Some(conn) if detach => conn.detach(),
            Some(conn) => drop(conn),
            None => {}
        }
    }

    fn note_failure<T>(&mut self, result: &DbResult<T>) {
        if matches!(result, Err(DbError::Sqlx(_))) && self.db_type() == DatabaseType::PostgreSQL {
            self.aborted = true;
        }
    }

    fn inactive_error(&self) -> DbError {
        DbError::transaction("no active transaction", self.id.as_str())
    }

    fn log_error(&self, message: &str, error: &DbError) {
        self.executor.sink().error(
            message,
            &json!({ "transaction_id": self.id, "error": error.to_string() }),
        );
    }
}

impl Drop for TransactionSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Active {
            return;
        }
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.state.set(SessionState::Terminated);

        let sink = self.executor.sink().clone();
        let fields = json!({ "transaction_id": self.id });
        match Handle::try_current() {
            Ok(handle) => {
                sink.warn("Transaction dropped while active, rolling back", &fields);
                handle.spawn(async move {
                    let result = conn.execute_raw("ROLLBACK").await;
                    if let Err(e) = result {
                        sink.error(
                            "Rollback of dropped transaction failed",
                            &json!({ "transaction_id": fields["transaction_id"], "error": e.to_string() }),
                        );
                        conn.detach();
                    }
                });
            }
            Err(_) => {
                sink.warn(
                    "Transaction dropped outside a runtime, closing its connection",
                    &fields,
                );
                conn.detach();
            }
        }
    }
}

fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::RecordingSink;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::sync::Arc;

    async fn sqlite_pool(dir: &tempfile::TempDir, max: u32) -> DbPool {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("session.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, v TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    /// Connections go back to the pool on a background task.
    async fn wait_in_use(pool: &DbPool, expected: usize) {
        for _ in 0..100 {
            if pool.in_use() == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(pool.in_use(), expected);
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 35);
    }

    #[tokio::test]
    async fn test_statements_require_init() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 2).await;
        let mut session = TransactionSession::new(pool.clone(), StatementExecutor::default());
        assert_eq!(session.state(), SessionState::Created);

        let err = session
            .execute(&CompiledStatement::new("DELETE FROM t", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));
        assert!(err.to_string().contains("no active transaction"));

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));

        // rollback before init is a no-op
        session.rollback().await;
        assert_eq!(session.state(), SessionState::Created);
        wait_in_use(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_double_init_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 2).await;
        let mut session = TransactionSession::new(pool, StatementExecutor::default());
        session.init().await.unwrap();
        let err = session.init().await.unwrap_err();
        assert!(err.to_string().contains("already initialized"));
        session.rollback().await;
    }

    #[tokio::test]
    async fn test_commit_persists_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 2).await;
        let sink = Arc::new(RecordingSink::default());
        wait_in_use(&pool, 0).await;

        let mut session =
            TransactionSession::new(pool.clone(), StatementExecutor::new(sink.clone()));
        session.init().await.unwrap();
        assert_eq!(pool.in_use(), 1);

        let summary = session
            .execute(&CompiledStatement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![SqlValue::from("a")],
            ))
            .await
            .unwrap();
        assert_eq!(summary.rows_affected, 1);

        session.commit().await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
        wait_in_use(&pool, 0).await;

        // terminal state is permanent
        session.rollback().await;
        assert!(session.commit().await.is_err());
        wait_in_use(&pool, 0).await;
        assert_eq!(sink.levels(), vec!["info", "info"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 2).await;

        let mut session = TransactionSession::new(pool.clone(), StatementExecutor::default());
        session.init().await.unwrap();
        session.delete_where("t", "1 = 1", &[]).await.unwrap();
        session
            .execute(&CompiledStatement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![SqlValue::from("gone")],
            ))
            .await
            .unwrap();
        session.rollback().await;
        session.rollback().await;

        let DbPool::SQLite(p) = &pool else { unreachable!() };
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t WHERE v = 'gone'")
            .fetch_one(p)
            .await
            .unwrap();
        assert_eq!(count, 0);
        wait_in_use(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_init_on_closed_pool_leaves_session_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 1).await;
        pool.close().await;

        let mut session = TransactionSession::new(pool.clone(), StatementExecutor::default());
        assert!(session.init().await.is_err());
        assert_eq!(session.state(), SessionState::Terminated);

        let err = session.init().await.unwrap_err();
        assert!(err.to_string().contains("already initialized"));
        session.rollback().await;
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_failed_begin_releases_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 1).await;

        // Leave a transaction open on the only pooled connection
        let mut stale = pool.acquire().await.unwrap();
        stale.execute_raw("BEGIN").await.unwrap();
        drop(stale);
        wait_in_use(&pool, 0).await;

        let sink = Arc::new(RecordingSink::default());
        let mut session =
            TransactionSession::new(pool.clone(), StatementExecutor::new(sink.clone()));
        assert!(session.init().await.is_err());
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(sink.levels(), vec!["error"]);
        wait_in_use(&pool, 0).await;

        // The broken connection was discarded, a fresh one can begin
        let mut next = TransactionSession::new(pool.clone(), StatementExecutor::default());
        next.init().await.unwrap();
        next.commit().await.unwrap();
        wait_in_use(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_cancelled_commit_keeps_connection_until_rollback() {
        use sqlx::sqlite::{SqliteConnection, SqliteJournalMode};
        use sqlx::{Connection, Executor};

        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("locked.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let raw = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .execute(&raw)
            .await
            .unwrap();
        let pool = DbPool::SQLite(raw);

        let mut session = TransactionSession::new(pool.clone(), StatementExecutor::default());
        session.init().await.unwrap();
        session
            .execute(&CompiledStatement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![SqlValue::from("x")],
            ))
            .await
            .unwrap();

        // A reader holding a SHARED lock makes COMMIT wait on the busy handler
        let mut reader = SqliteConnection::connect_with(&options).await.unwrap();
        (&mut reader).execute("BEGIN").await.unwrap();
        let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&mut reader)
            .await
            .unwrap();

        let commit =
            tokio::time::timeout(std::time::Duration::from_millis(100), session.commit()).await;
        assert!(commit.is_err());
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(pool.in_use(), 1);

        (&mut reader).execute("ROLLBACK").await.unwrap();
        reader.close().await.unwrap();

        session.rollback().await;
        assert_eq!(session.state(), SessionState::Terminated);
        wait_in_use(&pool, 0).await;

        // Whatever the interrupted COMMIT did, the pool hands out a clean
        // connection
        let mut next = TransactionSession::new(pool.clone(), StatementExecutor::default());
        next.init().await.unwrap();
        next.execute(&CompiledStatement::new(
            "INSERT INTO t (v) VALUES (?)",
            vec![SqlValue::from("y")],
        ))
        .await
        .unwrap();
        next.commit().await.unwrap();
        wait_in_use(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_state_handle_follows_session() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir, 1).await;
        let mut session = TransactionSession::new(pool, StatementExecutor::default());
        let handle = session.state_handle();
        assert_eq!(handle.get(), SessionState::Created);

        session.init().await.unwrap();
        assert_eq!(handle.get(), SessionState::Active);
        session.rollback().await;
        assert_eq!(handle.get(), SessionState::Terminated);
    }
}
