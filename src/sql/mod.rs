//! SQL generation.
//!
//! Descriptors from [`crate::models`] are turned into [`CompiledStatement`]s:
//! parameterized SQL text plus the bound values in placeholder order. Nothing
//! here touches the network, so every usage error surfaces before a
//! connection is acquired.
//!
//! - `writer`: placeholder-aware text accumulator shared by all builders
//! - `condition`: condition tree compiler (WHERE / HAVING)
//! - `select`, `update`, `delete`, `insert`: statement builders
//! - `guard`: validation of textual WHERE clauses

pub mod condition;
pub mod delete;
pub mod guard;
pub mod insert;
pub mod select;
pub mod update;
pub mod writer;

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DatabaseType, QueryDescriptor};

pub use condition::compile;
pub use guard::WhereClause;
pub use writer::SqlWriter;

/// Compiles a descriptor into a statement for one database dialect.
pub trait BuildStatement {
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement>;
}

impl BuildStatement for QueryDescriptor {
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement> {
        match self {
            QueryDescriptor::Select(q) => q.build(db_type),
            QueryDescriptor::Update(q) => q.build(db_type),
            QueryDescriptor::Delete(q) => q.build(db_type),
            QueryDescriptor::Insert(q) => q.build(db_type),
        }
    }
}

fn require_table<'a>(table: &'a str, statement: &str) -> DbResult<&'a str> {
    let table = table.trim();
    if table.is_empty() {
        return Err(DbError::invalid_input(format!(
            "{} requires a table name",
            statement
        )));
    }
    Ok(table)
}
