//! Database access layer.
//!
//! - `pool`: per-key connection pools and reserved connections
//! - `executor`: timed statement execution with slow/failure reporting
//! - `session`: transactions pinned to one reserved connection
//! - `transaction_registry`: single slot for the current session
//! - `database`: the [`Database`] handle tying these together
//! - `params`, `types`: value binding and row decoding per backend

pub mod database;
pub mod executor;
pub mod params;
pub mod pool;
pub mod session;
pub mod transaction_registry;
pub mod types;

pub use database::Database;
pub use executor::{ExecSummary, SLOW_QUERY_THRESHOLD, StatementExecutor, Target};
pub use pool::{DbConnection, DbPool, PoolManager};
pub use session::{SessionState, StateHandle, TransactionSession};
pub use transaction_registry::{SharedSession, TransactionRegistry};
