//! db-query-kit library
//!
//! Compiles structured query descriptors and operator-annotated condition
//! trees into parameterized SQL for MySQL, PostgreSQL and SQLite, and runs
//! them on pooled connections, optionally inside explicit transactions.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod sql;

pub use config::Config;
pub use db::{Database, PoolManager, TransactionSession};
pub use error::{DbError, DbResult};
