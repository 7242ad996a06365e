//! SQL text accumulator that keeps placeholders and parameters in lockstep.

use crate::models::{CompiledStatement, DatabaseType, SqlValue};

/// Position inside a [`SqlWriter`] that can be rolled back to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mark {
    sql_len: usize,
    param_len: usize,
}

/// Builds statement text while collecting bound parameters.
///
/// Every call to [`SqlWriter::bind`] writes the dialect's placeholder and
/// records the value at the same index, so `$n` numbering on PostgreSQL always
/// matches the parameter position.
#[derive(Debug)]
pub struct SqlWriter {
    db_type: DatabaseType,
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// Append literal SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder bound to `value`.
    pub fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.params.push(value);
        match self.db_type {
            DatabaseType::PostgreSQL => {
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
            DatabaseType::MySQL | DatabaseType::SQLite => self.sql.push('?'),
        }
        self
    }

    /// Append `a, b, c` with one placeholder per value.
    pub fn bind_list(&mut self, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    pub(crate) fn mark(&self) -> Mark {
        Mark {
            sql_len: self.sql.len(),
            param_len: self.params.len(),
        }
    }

    /// Discard everything written after `mark`.
    pub(crate) fn reset(&mut self, mark: Mark) {
        self.sql.truncate(mark.sql_len);
        self.params.truncate(mark.param_len);
    }

    pub fn finish(self) -> CompiledStatement {
        CompiledStatement {
            sql: self.sql,
            params: self.params,
        }
    }
}
