//! DELETE statement builder.

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DatabaseType, DeleteQuery};
use crate::sql::condition::write_clause;
use crate::sql::writer::SqlWriter;
use crate::sql::{BuildStatement, require_table};

impl BuildStatement for DeleteQuery {
    /// Refuses to build an unconditional DELETE, including filters that
    /// reduce to nothing such as `{}` or `{"$and": []}`.
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement> {
        let table = require_table(&self.table, "DELETE")?;
        let mut w = SqlWriter::new(db_type);
        w.push("DELETE FROM ").push(table);
        if !write_clause(&mut w, "WHERE", self.filter.as_ref()) {
            return Err(DbError::invalid_input(format!(
                "DELETE from '{}' requires a non-empty WHERE condition",
                table
            )));
        }
        Ok(w.finish())
    }
}
