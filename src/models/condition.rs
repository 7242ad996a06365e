//! Condition trees describing WHERE / HAVING predicates.
//!
//! A [`Filter`] is a list of [`Condition`]s that are implicitly AND-ed. Trees
//! are built either through the typed constructors or parsed from the JSON
//! mini-language:
//!
//! ```text
//! {"age": null}                                  age IS NULL
//! {"status": "active"}                           status = ?
//! {"price": {"$gte": 10, "$lt": 100}}            price >= ? AND price < ?
//! {"id": {"$in": [1, 2, 3]}}                     id IN (?, ?, ?)
//! {"$or": [{"a": 1}, {"b": 2}]}                  (a = ? OR b = ?)
//! {"$not": {"name": {"$like": "tmp%"}}}          NOT (name LIKE ?)
//! ```
//!
//! Parsing validates the whole tree, so malformed input (unknown operators,
//! a `$between` operand that is not a two-element array, ...) is rejected
//! before any SQL is produced.

use crate::error::{DbError, DbResult};
use crate::models::value::SqlValue;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};

/// Operator applied to a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(SqlValue),
    Ne(SqlValue),
    Gt(SqlValue),
    Gte(SqlValue),
    Lt(SqlValue),
    Lte(SqlValue),
    In(Vec<SqlValue>),
    NotIn(Vec<SqlValue>),
    /// Wildcards are supplied by the caller.
    Like(SqlValue),
    /// Bounds are not checked for order.
    Between(SqlValue, SqlValue),
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Build an operator from its mini-language name and JSON operand.
    pub fn parse(column: &str, name: &str, operand: &JsonValue) -> DbResult<Self> {
        let scalar = || SqlValue::from_json(operand);
        let op = match name {
            "$eq" => Operator::Eq(scalar()),
            "$ne" => Operator::Ne(scalar()),
            "$gt" => Operator::Gt(scalar()),
            "$gte" => Operator::Gte(scalar()),
            "$lt" => Operator::Lt(scalar()),
            "$lte" => Operator::Lte(scalar()),
            "$like" => Operator::Like(scalar()),
            "$in" => Operator::In(list_operand(column, name, operand)?),
            "$nin" | "$notIn" | "$nIn" => Operator::NotIn(list_operand(column, name, operand)?),
            "$between" => match operand.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    Operator::Between(SqlValue::from_json(low), SqlValue::from_json(high))
                }
                _ => {
                    return Err(DbError::invalid_input(format!(
                        "$between on column '{}' requires exactly two values [min, max]",
                        column
                    )));
                }
            },
            other => {
                return Err(DbError::invalid_input(format!(
                    "Unrecognized operator '{}' on column '{}'",
                    other, column
                )));
            }
        };
        Ok(op)
    }
}

fn list_operand(column: &str, name: &str, operand: &JsonValue) -> DbResult<Vec<SqlValue>> {
    operand
        .as_array()
        .map(|items| items.iter().map(SqlValue::from_json).collect())
        .ok_or_else(|| {
            DbError::invalid_input(format!(
                "{} on column '{}' requires an array operand",
                name, column
            ))
        })
}

/// A column together with the operator applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
}

/// One node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(Predicate),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    fn leaf(column: impl Into<String>, operator: Operator) -> Self {
        Condition::Leaf(Predicate {
            column: column.into(),
            operator,
        })
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Eq(value.into()))
    }

    pub fn ne(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Ne(value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Gt(value.into()))
    }

    pub fn gte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Gte(value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Lt(value.into()))
    }

    pub fn lte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Lte(value.into()))
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<SqlValue>) -> Self {
        Self::leaf(column, Operator::Like(pattern.into()))
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        Self::leaf(column, Operator::Between(low.into(), high.into()))
    }

    pub fn is_in<V: Into<SqlValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::leaf(
            column,
            Operator::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<V: Into<SqlValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::leaf(
            column,
            Operator::NotIn(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::leaf(column, Operator::IsNull)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::leaf(column, Operator::IsNotNull)
    }

    pub fn and(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(children.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    /// Parse a nested node: an object (keys AND-ed) or a bare array (AND list).
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Object(map) => {
                let mut parts = parse_object(map)?;
                if parts.len() == 1 {
                    Ok(parts.remove(0))
                } else {
                    Ok(Condition::And(parts))
                }
            }
            JsonValue::Array(items) => Ok(Condition::And(parse_list(items)?)),
            other => Err(DbError::invalid_input(format!(
                "Expected a condition object or array, got {}",
                other
            ))),
        }
    }
}

/// Top-level condition list; entries are joined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    /// Create an empty filter (no WHERE clause).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Shorthand for `column = value`.
    pub fn eq(self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.and(Condition::eq(column, value))
    }

    /// True when the filter holds no conditions at all.
    ///
    /// A non-empty filter may still compile to nothing, e.g. `{"$and": []}`.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Parse the JSON mini-language. `null` yields an empty filter.
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        let conditions = match value {
            JsonValue::Null => Vec::new(),
            JsonValue::Object(map) => parse_object(map)?,
            JsonValue::Array(items) => parse_list(items)?,
            other => {
                return Err(DbError::invalid_input(format!(
                    "WHERE condition must be an object or array, got {}",
                    other
                )));
            }
        };
        Ok(Self { conditions })
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
        }
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Filter::from_json(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_list(items: &[JsonValue]) -> DbResult<Vec<Condition>> {
    items.iter().map(Condition::from_json).collect()
}

fn parse_object(map: &Map<String, JsonValue>) -> DbResult<Vec<Condition>> {
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" => out.push(Condition::And(parse_children(key, value)?)),
            "$or" => out.push(Condition::Or(parse_children(key, value)?)),
            "$not" => out.push(Condition::not(Condition::from_json(value)?)),
            k if k.starts_with('$') => {
                return Err(DbError::invalid_input(format!(
                    "Unrecognized logical operator '{}'",
                    k
                )));
            }
            column => out.extend(parse_column(column, value)?),
        }
    }
    Ok(out)
}

/// Children of `$and` / `$or`: an array of nodes, or an object whose keys
/// each become one child.
fn parse_children(key: &str, value: &JsonValue) -> DbResult<Vec<Condition>> {
    match value {
        JsonValue::Array(items) => parse_list(items),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                Condition::from_json(&JsonValue::Object(single))
            })
            .collect(),
        other => Err(DbError::invalid_input(format!(
            "{} expects an array or object, got {}",
            key, other
        ))),
    }
}

fn parse_column(column: &str, value: &JsonValue) -> DbResult<Vec<Condition>> {
    if column.trim().is_empty() {
        return Err(DbError::invalid_input("Condition column name cannot be empty"));
    }
    match value {
        JsonValue::Null => Ok(vec![Condition::is_null(column)]),
        JsonValue::Object(ops) => ops
            .iter()
            .map(|(name, operand)| {
                Operator::parse(column, name, operand).map(|op| Condition::leaf(column, op))
            })
            .collect(),
        JsonValue::Array(_) => Err(DbError::invalid_input(format!(
            "Column '{}' cannot be compared to an array; use $in",
            column
        ))),
        scalar => Ok(vec![Condition::eq(column, SqlValue::from_json(scalar))]),
    }
}
