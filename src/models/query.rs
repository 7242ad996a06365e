//! Query descriptors and execution results.
//!
//! Descriptors are plain data: they can be built fluently from Rust or
//! deserialized from the JSON shapes accepted by the CLI, e.g.
//!
//! ```json
//! {
//!   "table": "orders", "alias": "o",
//!   "fields": ["o.id", "c.name"],
//!   "joins": [{"type": "left", "table": "customers", "alias": "c", "on": "c.id = o.customer_id"}],
//!   "where": {"o.status": {"$in": ["open", "held"]}},
//!   "orderBy": "o.id DESC", "limit": 20, "offset": 40
//! }
//! ```

use crate::error::{DbError, DbResult};
use crate::models::condition::Filter;
use crate::models::value::SqlValue;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

/// SQL text with its positional parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledStatement {
    /// Wrap hand-written SQL.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// SQL fragment inserted verbatim, without escaping or parameter binding.
///
/// Only use with trusted text such as `stock - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawExpression(String);

impl RawExpression {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Value assigned to a column by UPDATE or INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Bind(SqlValue),
    /// Literal `NULL`, no parameter.
    Null,
    Raw(RawExpression),
    /// Column is left out of the statement entirely.
    Skip,
}

impl SetValue {
    /// Interpret one entry of a JSON `data` map.
    ///
    /// `{"__raw": true, "value": "<sql>"}` is the only shape treated as a raw
    /// expression; other objects bind as JSON.
    pub fn from_json(column: &str, value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Null => Ok(SetValue::Null),
            JsonValue::Object(map) if map.get("__raw") == Some(&JsonValue::Bool(true)) => {
                match map.get("value").and_then(JsonValue::as_str) {
                    Some(sql) if !sql.trim().is_empty() => {
                        Ok(SetValue::Raw(RawExpression::new(sql)))
                    }
                    _ => Err(DbError::invalid_input(format!(
                        "Raw expression for column '{}' requires a non-empty string 'value'",
                        column
                    ))),
                }
            }
            other => Ok(SetValue::Bind(SqlValue::from_json(other))),
        }
    }
}

impl From<SqlValue> for SetValue {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => SetValue::Null,
            v => SetValue::Bind(v),
        }
    }
}

impl From<RawExpression> for SetValue {
    fn from(v: RawExpression) -> Self {
        SetValue::Raw(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SetValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => SetValue::from(v.into()),
            None => SetValue::Skip,
        }
    }
}

macro_rules! impl_set_value_from {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for SetValue {
                fn from(v: $ty) -> Self {
                    SetValue::Bind(v.into())
                }
            }
        )+
    };
}

impl_set_value_from!(bool, i32, i64, u32, f64, String, &str, Vec<u8>);

/// Ordered column assignments.
pub type DataMap = Vec<(String, SetValue)>;

fn deserialize_data<'de, D>(deserializer: D) -> Result<DataMap, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Map::<String, JsonValue>::deserialize(deserializer)?;
    map.iter()
        .map(|(column, value)| {
            SetValue::from_json(column, value)
                .map(|v| (column.clone(), v))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Accept `"a, b"`-style single strings as well as arrays of strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Positive integers only; anything else means "not set".
fn positive_int<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64()).filter(|n| *n > 0))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    #[serde(alias = "INNER")]
    Inner,
    #[serde(alias = "LEFT")]
    Left,
    #[serde(alias = "RIGHT")]
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Join {
    #[serde(rename = "type", default)]
    pub kind: JoinKind,
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Conditions AND-ed together, emitted verbatim.
    #[serde(deserialize_with = "string_or_list")]
    pub on: Vec<String>,
}

impl Join {
    pub fn new(kind: JoinKind, table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            alias: None,
            on: vec![on.into()],
        }
    }

    pub fn inner(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(JoinKind::Inner, table, on)
    }

    pub fn left(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(JoinKind::Left, table, on)
    }

    pub fn right(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(JoinKind::Right, table, on)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add another ON condition.
    pub fn and_on(mut self, on: impl Into<String>) -> Self {
        self.on.push(on.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectQuery {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(rename = "where", default)]
    pub filter: Option<Filter>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub order_by: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub having: Option<Filter>,
    #[serde(default, deserialize_with = "positive_int")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "positive_int")]
    pub offset: Option<u64>,
    #[serde(default)]
    pub for_update: bool,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn group_by(mut self, expr: impl Into<String>) -> Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn having(mut self, filter: impl Into<Filter>) -> Self {
        self.having = Some(filter.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit).filter(|n| *n > 0);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset).filter(|n| *n > 0);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateQuery {
    #[serde(default)]
    pub table: String,
    #[serde(default, deserialize_with = "deserialize_data")]
    pub data: DataMap,
    #[serde(rename = "where", default)]
    pub filter: Option<Filter>,
}

impl UpdateQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<SetValue>) -> Self {
        self.data.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub table: String,
    #[serde(rename = "where", default)]
    pub filter: Option<Filter>,
}

impl DeleteQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Single-row INSERT.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InsertQuery {
    #[serde(default)]
    pub table: String,
    #[serde(default, deserialize_with = "deserialize_data")]
    pub data: DataMap,
}

impl InsertQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            data: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<SetValue>) -> Self {
        self.data.push((column.into(), value.into()));
        self
    }
}

/// Statement kind selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum QueryKind {
    Select,
    Update,
    Delete,
    Insert,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
        }
    }
}

/// Any of the four descriptors.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryDescriptor {
    Select(SelectQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    Insert(InsertQuery),
}

impl QueryDescriptor {
    /// Deserialize the descriptor for `kind` from JSON.
    pub fn parse(kind: QueryKind, value: JsonValue) -> DbResult<Self> {
        let invalid = |e: serde_json::Error| {
            DbError::invalid_input(format!("Invalid {} descriptor: {}", kind, e))
        };
        Ok(match kind {
            QueryKind::Select => Self::Select(serde_json::from_value(value).map_err(invalid)?),
            QueryKind::Update => Self::Update(serde_json::from_value(value).map_err(invalid)?),
            QueryKind::Delete => Self::Delete(serde_json::from_value(value).map_err(invalid)?),
            QueryKind::Insert => Self::Insert(serde_json::from_value(value).map_err(invalid)?),
        })
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Select(_) => QueryKind::Select,
            Self::Update(_) => QueryKind::Update,
            Self::Delete(_) => QueryKind::Delete,
            Self::Insert(_) => QueryKind::Insert,
        }
    }
}

/// Result of running a statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    /// Empty for statements that return no rows.
    pub rows: Vec<Map<String, JsonValue>>,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::condition::Condition;
    use serde_json::json;

    #[test]
    fn test_select_descriptor_from_json() {
        let query: SelectQuery = serde_json::from_value(json!({
            "table": "orders",
            "alias": "o",
            "fields": "o.id",
            "joins": [{"type": "LEFT", "table": "customers", "alias": "c", "on": ["c.id = o.customer_id", "c.active = 1"]}],
            "where": {"o.status": "open"},
            "orderBy": ["o.id DESC"],
            "limit": 10,
            "offset": 20,
            "forUpdate": true
        }))
        .unwrap();

        assert_eq!(query.fields, vec!["o.id"]);
        assert_eq!(query.joins[0].kind, JoinKind::Left);
        assert_eq!(query.joins[0].on.len(), 2);
        assert_eq!(
            query.filter,
            Some(Filter::from(Condition::eq("o.status", "open")))
        );
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
        assert!(query.for_update);
    }

    #[test]
    fn test_non_positive_limit_is_ignored() {
        let query: SelectQuery =
            serde_json::from_value(json!({"table": "t", "limit": 0, "offset": -5})).unwrap();
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, None);
        assert_eq!(SelectQuery::new("t").limit(0).limit, None);
    }

    #[test]
    fn test_data_map_keeps_order_and_raw_tag() {
        let query: UpdateQuery = serde_json::from_value(json!({
            "table": "products",
            "data": {"stock": {"__raw": true, "value": "stock - 1"}, "note": null, "meta": {"a": 1}, "name": "x"}
        }))
        .unwrap();

        let columns: Vec<&str> = query.data.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, vec!["stock", "note", "meta", "name"]);
        assert_eq!(
            query.data[0].1,
            SetValue::Raw(RawExpression::new("stock - 1"))
        );
        assert_eq!(query.data[1].1, SetValue::Null);
        assert_eq!(query.data[2].1, SetValue::Bind(SqlValue::Json(json!({"a": 1}))));
    }

    #[test]
    fn test_raw_tag_requires_value() {
        let result: Result<UpdateQuery, _> = serde_json::from_value(json!({
            "table": "t", "data": {"a": {"__raw": true}}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_option_none_is_skip() {
        let query = UpdateQuery::new("t")
            .set("a", None::<i64>)
            .set("b", Some("x"))
            .set("c", SqlValue::Null);
        assert_eq!(query.data[0].1, SetValue::Skip);
        assert_eq!(query.data[1].1, SetValue::Bind(SqlValue::from("x")));
        assert_eq!(query.data[2].1, SetValue::Null);
    }

    #[test]
    fn test_descriptor_parse_reports_kind() {
        let err = QueryDescriptor::parse(QueryKind::Delete, json!({"where": {"a": {"$bad": 1}}}))
            .unwrap_err();
        assert!(err.to_string().contains("delete"));
        assert!(err.is_usage_error());
    }
}
