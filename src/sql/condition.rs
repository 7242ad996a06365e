//! Compiles condition trees into WHERE / HAVING fragments.

use crate::models::{CompiledStatement, Condition, DatabaseType, Filter, Operator, SqlValue};
use crate::sql::writer::SqlWriter;

/// Compile a filter on its own.
///
/// Returns `None` when the filter is absent or every branch is empty, meaning
/// no clause should be emitted at all.
pub fn compile(filter: Option<&Filter>, db_type: DatabaseType) -> Option<CompiledStatement> {
    let mut w = SqlWriter::new(db_type);
    if write_filter(&mut w, filter?) {
        Some(w.finish())
    } else {
        None
    }
}

/// Write `keyword` followed by the compiled filter, or nothing.
///
/// Returns whether a clause was written.
pub(crate) fn write_clause(w: &mut SqlWriter, keyword: &str, filter: Option<&Filter>) -> bool {
    let Some(filter) = filter else {
        return false;
    };
    let mark = w.mark();
    w.push(" ").push(keyword).push(" ");
    if write_filter(w, filter) {
        true
    } else {
        w.reset(mark);
        false
    }
}

/// Top-level entries joined with AND, without surrounding parentheses.
pub(crate) fn write_filter(w: &mut SqlWriter, filter: &Filter) -> bool {
    write_joined(w, &filter.conditions, " AND ")
}

fn write_joined(w: &mut SqlWriter, conditions: &[Condition], separator: &str) -> bool {
    let mut wrote = false;
    for condition in conditions {
        let mark = w.mark();
        if wrote {
            w.push(separator);
        }
        if write_condition(w, condition) {
            wrote = true;
        } else {
            w.reset(mark);
        }
    }
    wrote
}

fn write_group(w: &mut SqlWriter, conditions: &[Condition], separator: &str) -> bool {
    let mark = w.mark();
    w.push("(");
    if write_joined(w, conditions, separator) {
        w.push(")");
        true
    } else {
        w.reset(mark);
        false
    }
}

fn write_condition(w: &mut SqlWriter, condition: &Condition) -> bool {
    match condition {
        Condition::Leaf(predicate) => {
            write_operator(w, &predicate.column, &predicate.operator);
            true
        }
        Condition::And(children) => write_group(w, children, " AND "),
        Condition::Or(children) => write_group(w, children, " OR "),
        Condition::Not(inner) => {
            let mark = w.mark();
            w.push("NOT ");
            // Groups bring their own parentheses.
            let wrote = match inner.as_ref() {
                Condition::And(_) | Condition::Or(_) => write_condition(w, inner),
                _ => {
                    w.push("(");
                    let wrote = write_condition(w, inner);
                    w.push(")");
                    wrote
                }
            };
            if !wrote {
                w.reset(mark);
            }
            wrote
        }
    }
}

fn write_operator(w: &mut SqlWriter, column: &str, operator: &Operator) {
    let compare = |w: &mut SqlWriter, op: &str, value: &SqlValue| {
        w.push(column).push(" ").push(op).push(" ").bind(value.clone());
    };

    match operator {
        Operator::Eq(SqlValue::Null) | Operator::IsNull => {
            w.push(column).push(" IS NULL");
        }
        Operator::Ne(SqlValue::Null) | Operator::IsNotNull => {
            w.push(column).push(" IS NOT NULL");
        }
        Operator::Eq(v) => compare(w, "=", v),
        Operator::Ne(v) => compare(w, "!=", v),
        Operator::Gt(v) => compare(w, ">", v),
        Operator::Gte(v) => compare(w, ">=", v),
        Operator::Lt(v) => compare(w, "<", v),
        Operator::Lte(v) => compare(w, "<=", v),
        Operator::Like(v) => compare(w, "LIKE", v),
        // An empty list can never match, and `IN ()` is a syntax error.
        Operator::In(values) if values.is_empty() => {
            w.push("1 = 0");
        }
        Operator::NotIn(values) if values.is_empty() => {
            w.push("1 = 1");
        }
        Operator::In(values) => {
            w.push(column).push(" IN (");
            w.bind_list(values.iter().cloned()).push(")");
        }
        Operator::NotIn(values) => {
            w.push(column).push(" NOT IN (");
            w.bind_list(values.iter().cloned()).push(")");
        }
        Operator::Between(low, high) => {
            w.push(column)
                .push(" BETWEEN ")
                .bind(low.clone())
                .push(" AND ")
                .bind(high.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mysql(value: serde_json::Value) -> Option<CompiledStatement> {
        let filter = Filter::from_json(&value).unwrap();
        compile(Some(&filter), DatabaseType::MySQL)
    }

    #[test]
    fn test_plain_scalars_and_implicit_and() {
        let stmt = mysql(json!({"status": "active", "age": {"$gte": 18}})).unwrap();
        assert_eq!(stmt.sql, "status = ? AND age >= ?");
        assert_eq!(stmt.params, vec![SqlValue::from("active"), SqlValue::Int(18)]);
    }

    #[test]
    fn test_null_has_no_param() {
        let stmt = mysql(json!({"age": null})).unwrap();
        assert_eq!(stmt.sql, "age IS NULL");
        assert!(stmt.params.is_empty());

        let stmt = mysql(json!({"a": {"$eq": null, "$ne": null}})).unwrap();
        assert_eq!(stmt.sql, "a IS NULL AND a IS NOT NULL");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_between() {
        let stmt = mysql(json!({"price": {"$between": [10, 100]}})).unwrap();
        assert_eq!(stmt.sql, "price BETWEEN ? AND ?");
        assert_eq!(stmt.params, vec![SqlValue::Int(10), SqlValue::Int(100)]);
    }

    #[test]
    fn test_in_lists() {
        let stmt = mysql(json!({"id": {"$in": [1, 2, 3]}, "tag": {"$nin": ["x"]}})).unwrap();
        assert_eq!(stmt.sql, "id IN (?, ?, ?) AND tag NOT IN (?)");
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn test_empty_in_lists() {
        assert_eq!(mysql(json!({"s": {"$in": []}})).unwrap().sql, "1 = 0");
        assert_eq!(mysql(json!({"s": {"$nin": []}})).unwrap().sql, "1 = 1");
    }

    #[test]
    fn test_or_is_parenthesized() {
        let stmt = mysql(json!({"$or": [{"a": 1}, {"b": 2}]})).unwrap();
        assert_eq!(stmt.sql, "(a = ? OR b = ?)");
        assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_not() {
        let stmt = mysql(json!({"$not": {"name": {"$like": "tmp%"}}})).unwrap();
        assert_eq!(stmt.sql, "NOT (name LIKE ?)");

        let stmt = mysql(json!({"$not": {"$or": [{"a": 1}, {"b": 2}]}})).unwrap();
        assert_eq!(stmt.sql, "NOT (a = ? OR b = ?)");
    }

    #[test]
    fn test_empty_branches_vanish() {
        assert!(mysql(json!({})).is_none());
        assert!(mysql(json!({"$and": []})).is_none());
        assert!(mysql(json!({"$or": [{"$and": []}], "$not": {"$or": []}})).is_none());

        let stmt = mysql(json!({"$and": [], "a": 1, "$or": [{"$and": []}, {"b": 2}]})).unwrap();
        assert_eq!(stmt.sql, "a = ? AND (b = ?)");
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_params_follow_placeholder_order() {
        let stmt = mysql(json!({
            "a": 1,
            "$or": [{"b": {"$between": [2, 3]}}, {"c": {"$in": [4, 5]}}],
            "$not": {"d": 6},
            "e": {"$lt": 7}
        }))
        .unwrap();
        assert_eq!(
            stmt.sql,
            "a = ? AND (b BETWEEN ? AND ? OR c IN (?, ?)) AND NOT (d = ?) AND e < ?"
        );
        let expected: Vec<SqlValue> = (1..=7).map(SqlValue::Int).collect();
        assert_eq!(stmt.params, expected);
        assert_eq!(stmt.sql.matches('?').count(), stmt.params.len());
    }

    #[test]
    fn test_postgres_numbered_placeholders() {
        let filter = Filter::new()
            .eq("a", 1)
            .and(Condition::or([Condition::gt("b", 2), Condition::is_in("c", [3, 4])]));
        let stmt = compile(Some(&filter), DatabaseType::PostgreSQL).unwrap();
        assert_eq!(stmt.sql, "a = $1 AND (b > $2 OR c IN ($3, $4))");
    }

    #[test]
    fn test_write_clause_skips_empty_filter() {
        let mut w = SqlWriter::new(DatabaseType::MySQL);
        w.push("SELECT * FROM t");
        assert!(!write_clause(&mut w, "WHERE", Some(&Filter::from_json(&json!({"$or": []})).unwrap())));
        assert!(!write_clause(&mut w, "WHERE", None));
        assert_eq!(w.finish().sql, "SELECT * FROM t");
    }
}
