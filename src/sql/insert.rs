//! Single-row INSERT builder.

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DatabaseType, InsertQuery, SetValue};
use crate::sql::writer::SqlWriter;
use crate::sql::{BuildStatement, require_table};

impl BuildStatement for InsertQuery {
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement> {
        let table = require_table(&self.table, "INSERT")?;
        let entries: Vec<&(String, SetValue)> = self
            .data
            .iter()
            .filter(|(_, v)| !matches!(v, SetValue::Skip))
            .collect();
        if entries.is_empty() {
            return Err(DbError::invalid_input("INSERT has no valid fields to insert"));
        }

        let columns: Vec<&str> = entries.iter().map(|(c, _)| c.as_str()).collect();
        let mut w = SqlWriter::new(db_type);
        w.push("INSERT INTO ")
            .push(table)
            .push(" (")
            .push(&columns.join(", "))
            .push(") VALUES (");
        for (i, (_, value)) in entries.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            match value {
                SetValue::Bind(v) => {
                    w.bind(v.clone());
                }
                SetValue::Null => {
                    w.push("NULL");
                }
                SetValue::Raw(raw) => {
                    w.push(raw.as_str());
                }
                SetValue::Skip => {}
            }
        }
        w.push(")");
        Ok(w.finish())
    }
}
