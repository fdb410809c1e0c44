//! Statement builder for the data nodes.
//!
//! Only key/value objects are accepted. Identifiers are checked and quoted,
//! every value is bound as a positional parameter.

use serde_json::{Map, Value};

use kestrel_core::error::{KestrelError, Result};
use kestrel_policy::check_identifier;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

fn quote(ident: &str) -> Result<String> {
    check_identifier(ident)?;
    Ok(format!("\"{}\"", ident))
}

fn where_clause(filter: &Map<String, Value>, params: &mut Vec<Value>) -> Result<String> {
    let mut terms = Vec::with_capacity(filter.len());
    for (column, value) in filter {
        let column = quote(column)?;
        if value.is_null() {
            terms.push(format!("{} IS NULL", column));
        } else {
            params.push(value.clone());
            terms.push(format!("{} = ?{}", column, params.len()));
        }
    }
    Ok(terms.join(" AND "))
}

fn non_empty<'a>(field: &str, values: &'a Map<String, Value>) -> Result<&'a Map<String, Value>> {
    if values.is_empty() {
        return Err(KestrelError::MissingRequiredInput {
            field: field.to_string(),
        });
    }
    Ok(values)
}

pub fn select(
    table: &str,
    columns: &[String],
    filter: &Map<String, Value>,
    limit: Option<u64>,
) -> Result<Statement> {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| quote(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ")
    };
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", projection, quote(table)?);
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause(filter, &mut params)?);
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok(Statement { sql, params })
}

pub fn insert(table: &str, values: &Map<String, Value>) -> Result<Statement> {
    let values = non_empty("values", values)?;
    let mut columns = Vec::with_capacity(values.len());
    let mut slots = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(quote(column)?);
        params.push(value.clone());
        slots.push(format!("?{}", params.len()));
    }
    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table)?,
            columns.join(", "),
            slots.join(", ")
        ),
        params,
    })
}

/// The caller has already refused an empty filter; an empty one here is
/// refused again rather than producing an unfiltered UPDATE.
pub fn update(
    table: &str,
    values: &Map<String, Value>,
    filter: &Map<String, Value>,
) -> Result<Statement> {
    let values = non_empty("values", values)?;
    if filter.is_empty() {
        return Err(KestrelError::DbEmptyWhere {
            operation: "update".into(),
            table: table.to_string(),
        });
    }
    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(values.len());
    for (column, value) in values {
        params.push(value.clone());
        assignments.push(format!("{} = ?{}", quote(column)?, params.len()));
    }
    let condition = where_clause(filter, &mut params)?;
    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            quote(table)?,
            assignments.join(", "),
            condition
        ),
        params,
    })
}

pub fn delete(table: &str, filter: &Map<String, Value>) -> Result<Statement> {
    if filter.is_empty() {
        return Err(KestrelError::DbEmptyWhere {
            operation: "delete".into(),
            table: table.to_string(),
        });
    }
    let mut params = Vec::new();
    let condition = where_clause(filter, &mut params)?;
    Ok(Statement {
        sql: format!("DELETE FROM {} WHERE {}", quote(table)?, condition),
        params,
    })
}
