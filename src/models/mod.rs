//! Data models for the query kit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod condition;
pub mod connection;
pub mod query;
pub mod value;

// Re-export commonly used types
pub use condition::{Condition, Filter, Operator, Predicate};
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType, PoolKey};
pub use query::{
    CompiledStatement, DataMap, DeleteQuery, InsertQuery, Join, JoinKind, QueryDescriptor,
    QueryKind, QueryOutput, RawExpression, SelectQuery, SetValue, UpdateQuery,
};
pub use value::SqlValue;
