//! Helpers shared by the entity services: paging, column parsing, text normalisation and
//! dynamic `WHERE` clause assembly.

use crate::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use rusqlite::types::{ToSql, Type};
use rusqlite::Row;
use serde::Deserialize;
use std::str::FromStr;

/// Requested window of a search result.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct Page {
    /// Maximum rows to return (default 50, capped at 500).
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Limit clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// Reads a text column and parses it with `FromStr`.
///
/// Parsing failures surface as `FromSqlConversionFailure` so they flow through the usual
/// `rusqlite::Error` path.
pub(crate) fn parse_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

/// Like [`parse_column`] for nullable columns.
pub(crate) fn parse_optional_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| {
        value.parse::<T>().map_err(|e| {
            let index = row.as_ref().column_index(column).unwrap_or(0);
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Trims optional free text, mapping blank values to `None`.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Escapes `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Incrementally assembles a `WHERE` clause with numbered parameters.
#[derive(Default)]
pub(crate) struct QueryFilter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl QueryFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a clause bound to a single parameter; every `?` in `clause` refers to `value`.
    pub(crate) fn push(&mut self, clause: &str, value: impl ToSql + 'static) {
        self.params.push(Box::new(value));
        let placeholder = format!("?{}", self.params.len());
        self.clauses.push(clause.replace('?', &placeholder));
    }

    /// Adds a clause without parameters.
    pub(crate) fn push_raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    /// Renders ` WHERE a AND b ORDER BY ..` and appends paging.
    pub(crate) fn finish(mut self, order_by: &str, page: &Page) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::new();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
        let n = self.params.len();
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", n + 1, n + 2));
        self.params.push(Box::new(page.limit()));
        self.params.push(Box::new(page.offset()));
        (sql, self.params)
    }
}
