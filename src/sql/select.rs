//! SELECT statement builder.

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DatabaseType, SelectQuery};
use crate::sql::condition::write_clause;
use crate::sql::writer::SqlWriter;
use crate::sql::{BuildStatement, require_table};

impl BuildStatement for SelectQuery {
    fn build(&self, db_type: DatabaseType) -> DbResult<CompiledStatement> {
        let table = require_table(&self.table, "SELECT")?;
        let mut w = SqlWriter::new(db_type);

        let fields: Vec<&str> = self
            .fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        w.push("SELECT ");
        if fields.is_empty() {
            w.push("*");
        } else {
            w.push(&fields.join(", "));
        }

        w.push(" FROM ").push(table);
        push_alias(&mut w, self.alias.as_deref());

        for join in &self.joins {
            w.push(" ").push(join.kind.keyword()).push(" ").push(join.table.trim());
            push_alias(&mut w, join.alias.as_deref());
            let on: Vec<&str> = join
                .on
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect();
            if on.is_empty() {
                return Err(DbError::invalid_input(format!(
                    "{} {} requires an ON condition",
                    join.kind.keyword(),
                    join.table.trim()
                )));
            }
            w.push(" ON ").push(&on.join(" AND "));
        }

        write_clause(&mut w, "WHERE", self.filter.as_ref());

        if !self.group_by.is_empty() {
            w.push(" GROUP BY ").push(&self.group_by.join(", "));
        }

        write_clause(&mut w, "HAVING", self.having.as_ref());

        if !self.order_by.is_empty() {
            w.push(" ORDER BY ").push(&self.order_by.join(", "));
        }

        if let Some(limit) = self.limit.filter(|n| *n > 0) {
            w.push(" LIMIT ").push(&limit.to_string());
            if let Some(offset) = self.offset.filter(|n| *n > 0) {
                w.push(" OFFSET ").push(&offset.to_string());
            }
        }

        if self.for_update && db_type.supports_row_locks() {
            w.push(" FOR UPDATE");
        }

        Ok(w.finish())
    }
}

fn push_alias(w: &mut SqlWriter, alias: Option<&str>) {
    if let Some(alias) = alias.map(str::trim).filter(|a| !a.is_empty()) {
        w.push(" ").push(alias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Filter, Join, SqlValue};
    use serde_json::json;

    #[test]
    fn test_minimal_select() {
        let stmt = SelectQuery::new("users").build(DatabaseType::MySQL).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_blank_fields_filtered() {
        let stmt = SelectQuery::new("users")
            .fields(["id", " ", "", "name"])
            .build(DatabaseType::MySQL)
            .unwrap();
        assert_eq!(stmt.sql, "SELECT id, name FROM users");
    }

    #[test]
    fn test_missing_table_is_usage_error() {
        let err = SelectQuery::new("  ").build(DatabaseType::MySQL).unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_full_select_clause_order() {
        let query = SelectQuery::new("orders")
            .alias("o")
            .fields(["o.customer_id", "COUNT(*) AS n"])
            .join(Join::left("customers", "c.id = o.customer_id").alias("c").and_on("c.active = 1"))
            .filter(Condition::eq("o.status", "open"))
            .group_by("o.customer_id")
            .having(Condition::gt("COUNT(*)", 2))
            .order_by("n DESC")
            .limit(10)
            .offset(5)
            .for_update();
        let stmt = query.build(DatabaseType::MySQL).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT o.customer_id, COUNT(*) AS n FROM orders o \
             LEFT JOIN customers c ON c.id = o.customer_id AND c.active = 1 \
             WHERE o.status = ? GROUP BY o.customer_id HAVING COUNT(*) > ? \
             ORDER BY n DESC LIMIT 10 OFFSET 5 FOR UPDATE"
        );
        assert_eq!(stmt.params, vec![SqlValue::from("open"), SqlValue::Int(2)]);
    }

    #[test]
    fn test_join_without_on_is_usage_error() {
        for on in [json!([]), json!(["  ", ""]), json!("")] {
            let query: SelectQuery = serde_json::from_value(json!({
                "table": "orders",
                "joins": [{"type": "left", "table": "customers", "on": on}]
            }))
            .unwrap();
            let err = query.build(DatabaseType::MySQL).unwrap_err();
            assert!(err.is_usage_error());
            assert!(err.to_string().contains("LEFT JOIN customers"));
        }
    }

    #[test]
    fn test_offset_requires_limit() {
        let stmt = SelectQuery::new("t").offset(10).build(DatabaseType::MySQL).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t");
    }

    #[test]
    fn test_sqlite_omits_for_update() {
        let stmt = SelectQuery::new("t").for_update().build(DatabaseType::SQLite).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t");
    }

    #[test]
    fn test_having_params_follow_where_params_on_postgres() {
        let query: SelectQuery = serde_json::from_value(json!({
            "table": "t",
            "where": {"a": 1, "b": {"$in": [2, 3]}},
            "groupBy": "a",
            "having": {"total": {"$gt": 4}}
        }))
        .unwrap();
        let stmt = query.build(DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM t WHERE a = $1 AND b IN ($2, $3) GROUP BY a HAVING total > $4"
        );
    }

    #[test]
    fn test_empty_where_emits_no_clause() {
        let stmt = SelectQuery::new("t")
            .filter(Filter::from_json(&json!({})).unwrap())
            .build(DatabaseType::MySQL)
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM t");
    }
}
