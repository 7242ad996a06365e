//! Guard for textual WHERE clauses.
//!
//! `update_where` / `delete_where` accept a hand-written WHERE clause instead
//! of a condition tree. The clause must be non-blank and parse as a single SQL
//! expression, which rules out statement smuggling such as `1=1; DROP TABLE t`.
//! Placeholders are always written as `?`; on PostgreSQL they are renumbered
//! so they continue after any SET parameters.

use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, DataMap, DatabaseType, SqlValue};
use crate::sql::require_table;
use crate::sql::update::write_assignments;
use crate::sql::writer::SqlWriter;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashSet;

/// A textual WHERE clause that passed validation.
#[derive(Debug, Clone)]
pub struct WhereClause {
    text: String,
    /// (line, column) of every `?` placeholder, 1-based as reported by the tokenizer.
    placeholders: HashSet<(u64, u64)>,
}

impl WhereClause {
    /// Validate `clause` as a standalone SQL expression.
    pub fn parse(clause: &str) -> DbResult<Self> {
        let text = clause.trim();
        if text.is_empty() {
            return Err(DbError::invalid_input(
                "A WHERE clause is required for this operation",
            ));
        }

        // `?` is a JSON operator in the PostgreSQL dialect, so parse generically.
        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(text)
            .map_err(|e| DbError::invalid_input(format!("Invalid WHERE clause: {}", e)))?;
        parser
            .parse_expr()
            .map_err(|e| DbError::invalid_input(format!("Invalid WHERE clause: {}", e)))?;
        let rest = parser.peek_token();
        if rest.token != Token::EOF {
            return Err(DbError::invalid_input(format!(
                "Invalid WHERE clause: unexpected '{}' after expression",
                rest.token
            )));
        }

        let tokens = Tokenizer::new(&dialect, text)
            .tokenize_with_location()
            .map_err(|e| DbError::invalid_input(format!("Invalid WHERE clause: {}", e)))?;
        let mut placeholders = HashSet::new();
        for t in tokens {
            if let Token::Placeholder(p) = &t.token {
                if p != "?" {
                    return Err(DbError::invalid_input(format!(
                        "Unsupported placeholder '{}' in WHERE clause; use '?'",
                        p
                    )));
                }
                placeholders.insert((t.span.start.line, t.span.start.column));
            }
        }

        Ok(Self {
            text: text.to_string(),
            placeholders,
        })
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Append ` WHERE <clause>`, binding `params` to its placeholders in order.
    pub(crate) fn write(&self, w: &mut SqlWriter, params: &[SqlValue]) -> DbResult<()> {
        if params.len() != self.placeholders.len() {
            return Err(DbError::invalid_input(format!(
                "WHERE clause has {} placeholder(s) but {} parameter(s) were supplied",
                self.placeholders.len(),
                params.len()
            )));
        }

        w.push(" WHERE ");
        let mut params = params.iter();
        let (mut line, mut column) = (1u64, 1u64);
        let mut literal_start = 0;
        for (idx, ch) in self.text.char_indices() {
            if self.placeholders.contains(&(line, column)) {
                w.push(&self.text[literal_start..idx]);
                if let Some(value) = params.next() {
                    w.bind(value.clone());
                }
                literal_start = idx + ch.len_utf8();
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        w.push(&self.text[literal_start..]);
        Ok(())
    }
}

/// `UPDATE <table> SET ... WHERE <clause>`.
pub fn update_where(
    db_type: DatabaseType,
    table: &str,
    data: &DataMap,
    clause: &WhereClause,
    params: &[SqlValue],
) -> DbResult<CompiledStatement> {
    let table = require_table(table, "UPDATE")?;
    let mut w = SqlWriter::new(db_type);
    w.push("UPDATE ").push(table).push(" SET ");
    write_assignments(&mut w, data)?;
    clause.write(&mut w, params)?;
    Ok(w.finish())
}

/// `DELETE FROM <table> WHERE <clause>`.
pub fn delete_where(
    db_type: DatabaseType,
    table: &str,
    clause: &WhereClause,
    params: &[SqlValue],
) -> DbResult<CompiledStatement> {
    let table = require_table(table, "DELETE")?;
    let mut w = SqlWriter::new(db_type);
    w.push("DELETE FROM ").push(table);
    clause.write(&mut w, params)?;
    Ok(w.finish())
}
