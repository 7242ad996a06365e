//! The [`Database`] handle.
//!
//! Bundles one pool with the executor (and its log sink) and the transaction
//! registry, and exposes the builder entry points on top of them.

use crate::db::executor::{ExecSummary, StatementExecutor, Target};
use crate::db::pool::{DbPool, PoolManager};
use crate::db::session::TransactionSession;
use crate::db::transaction_registry::{SharedSession, TransactionRegistry};
use crate::error::DbResult;
use crate::logging::SharedSink;
use crate::models::{
    CompiledStatement, ConnectionConfig, DataMap, DatabaseType, DeleteQuery, InsertQuery,
    QueryDescriptor, QueryOutput, SelectQuery, SqlValue, UpdateQuery,
};
use crate::sql::{BuildStatement, WhereClause, guard};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Entry point for running statements against one database.
///
/// Cloning is cheap; clones share the pool and the registry.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    executor: StatementExecutor,
    registry: Arc<TransactionRegistry>,
}

impl Database {
    /// Wrap an existing pool, logging through `tracing`.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            executor: StatementExecutor::default(),
            registry: Arc::new(TransactionRegistry::new()),
        }
    }

    /// Resolve the pool for `config` through `manager`.
    pub async fn connect(manager: &PoolManager, config: &ConnectionConfig) -> DbResult<Self> {
        let pool = manager.resolve(config).await?;
        Ok(Self::new(pool))
    }

    /// Report slow statements, failures and transaction events to `sink`.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.executor = StatementExecutor::new(sink);
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub async fn select(&self, query: &SelectQuery) -> DbResult<Vec<Map<String, JsonValue>>> {
        let statement = query.build(self.db_type())?;
        self.fetch_all(&statement).await
    }

    pub async fn update(&self, query: &UpdateQuery) -> DbResult<ExecSummary> {
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    /// Fails before touching the database unless the query has a filter.
    pub async fn delete(&self, query: &DeleteQuery) -> DbResult<ExecSummary> {
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    pub async fn insert(&self, query: &InsertQuery) -> DbResult<ExecSummary> {
        let statement = query.build(self.db_type())?;
        self.execute(&statement).await
    }

    /// `UPDATE` with a hand-written WHERE clause using `?` placeholders.
    ///
    /// The clause must be non-blank and parse as a single SQL expression.
    pub async fn update_where(
        &self,
        table: &str,
        data: &DataMap,
        clause: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecSummary> {
        let clause = WhereClause::parse(clause)?;
        let statement = guard::update_where(self.db_type(), table, data, &clause, params)?;
        self.execute(&statement).await
    }

    /// `DELETE` with a hand-written WHERE clause using `?` placeholders.
    pub async fn delete_where(
        &self,
        table: &str,
        clause: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecSummary> {
        let clause = WhereClause::parse(clause)?;
        let statement = guard::delete_where(self.db_type(), table, &clause, params)?;
        self.execute(&statement).await
    }

    /// Run raw SQL that returns rows on any free connection.
    pub async fn fetch_all(
        &self,
        statement: &CompiledStatement,
    ) -> DbResult<Vec<Map<String, JsonValue>>> {
        self.executor
            .fetch_all(Target::Pool(&self.pool), statement)
            .await
    }

    /// Run raw SQL that returns no rows on any free connection.
    pub async fn execute(&self, statement: &CompiledStatement) -> DbResult<ExecSummary> {
        self.executor
            .execute(Target::Pool(&self.pool), statement)
            .await
    }

    /// Compile and run any descriptor outside a transaction.
    pub async fn run(&self, descriptor: &QueryDescriptor) -> DbResult<QueryOutput> {
        self.executor
            .run(Target::Pool(&self.pool), descriptor, self.db_type())
            .await
    }

    /// Begin a transaction on a newly reserved connection.
    pub async fn transaction(&self) -> DbResult<TransactionSession> {
        let mut session = TransactionSession::new(self.pool.clone(), self.executor.clone());
        session.init().await?;
        Ok(session)
    }

    /// Begin a transaction wrapped for sharing, e.g. through the registry.
    pub async fn shared_transaction(&self) -> DbResult<SharedSession> {
        let session = self.transaction().await?;
        Ok(SharedSession::new(session))
    }
}
