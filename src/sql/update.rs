//! UPDATE statement builder.

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DatabaseType, SetValue, UpdateQuery};
use crate::sql::condition::write_clause;
use crate::sql::writer::SqlWriter;
use crate::sql::{BuildStatement, require_table};

impl BuildStatement for UpdateQuery {
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement> {
        let table = require_table(&self.table, "UPDATE")?;
        let mut w = SqlWriter::new(db_type);
        w.push("UPDATE ").push(table).push(" SET ");
        write_assignments(&mut w, &self.data)?;
        write_clause(&mut w, "WHERE", self.filter.as_ref());
        Ok(w.finish())
    }
}

/// Write `a = ?, b = NULL, c = <raw>`; SET parameters precede any WHERE ones.
pub(crate) fn write_assignments(w: &mut SqlWriter, data: &[(String, SetValue)]) -> DbResult<()> {
    let mut count = 0;
    for (column, value) in data {
        if matches!(value, SetValue::Skip) {
            continue;
        }
        if count > 0 {
            w.push(", ");
        }
        w.push(column).push(" = ");
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
        count += 1;
    }
    if count == 0 {
        return Err(DbError::invalid_input("UPDATE has no valid fields to update"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, RawExpression, SqlValue};
    use serde_json::json;

    #[test]
    fn test_update_with_where() {
        let stmt = UpdateQuery::new("users")
            .set("name", "ann")
            .set("age", 31)
            .filter(Condition::eq("id", 7))
            .build(DatabaseType::MySQL)
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE users SET name = ?, age = ? WHERE id = ?");
        assert_eq!(
            stmt.params,
            vec![SqlValue::from("ann"), SqlValue::Int(31), SqlValue::Int(7)]
        );
    }

    #[test]
    fn test_only_skip_values_fails() {
        let err = UpdateQuery::new("users")
            .set("name", None::<String>)
            .set("age", SetValue::Skip)
            .build(DatabaseType::MySQL)
            .unwrap_err();
        assert!(err.is_usage_error());
        assert!(err.to_string().contains("no valid fields"));
    }

    #[test]
    fn test_null_and_raw_have_no_params() {
        let query: UpdateQuery = serde_json::from_value(json!({
            "table": "products",
            "data": {"stock": {"__raw": true, "value": "stock - 1"}, "note": null},
            "where": {"id": 3}
        }))
        .unwrap();
        let stmt = query.build(DatabaseType::MySQL).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE products SET stock = stock - 1, note = NULL WHERE id = ?"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(3)]);
    }

    #[test]
    fn test_where_is_optional() {
        let stmt = UpdateQuery::new("flags")
            .set("enabled", RawExpression::new("NOT enabled"))
            .build(DatabaseType::SQLite)
            .unwrap();
        assert_eq!(stmt.sql, "UPDATE flags SET enabled = NOT enabled");
    }

    #[test]
    fn test_postgres_numbering_spans_set_and_where() {
        let stmt = UpdateQuery::new("t")
            .set("a", 1)
            .set("b", SetValue::Null)
            .set("c", 2)
            .filter(Condition::is_in("id", [3, 4]))
            .build(DatabaseType::PostgreSQL)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE t SET a = $1, b = NULL, c = $2 WHERE id IN ($3, $4)"
        );
    }
}
