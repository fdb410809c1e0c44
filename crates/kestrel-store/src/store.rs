use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use tracing::debug;

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::traits::{DataStore, Row};

fn db_err(e: impl std::fmt::Display) -> KestrelError {
    KestrelError::Database(e.to_string())
}

/// SQLite-backed data store for the data nodes.
pub struct SqliteDataStore {
    conn: Mutex<Connection>,
}

impl SqliteDataStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KestrelError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;

        debug!(path = %path.display(), "SQLite data store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a batch of DDL. The nodes never call this; it is for setup.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(db_err)?;
        conn.execute_batch(sql).map_err(db_err)
    }

    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut record = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(db_err)?;
                record.insert(name.clone(), from_sql(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.conn.lock().map_err(db_err)?;
        let affected = conn
            .execute(sql, params_from_iter(params.iter().map(to_sql)))
            .map_err(db_err)?;
        Ok(affected as u64)
    }
}

impl DataStore for SqliteDataStore {
    fn query(&self, sql: String, params: Vec<Value>) -> BoxFuture<'_, Result<Vec<Row>>> {
        Box::pin(async move { self.query_sync(&sql, &params) })
    }

    fn execute(&self, sql: String, params: Vec<Value>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { self.execute_sync(&sql, &params) })
    }
}

/// Objects and arrays are bound as their JSON text.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} byte blob>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteDataStore {
        let store = SqliteDataStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, active INTEGER, meta TEXT, score REAL);",
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn insert_and_query() {
        let store = store();
        let affected = store
            .execute(
                "INSERT INTO \"users\" (\"active\", \"meta\", \"name\", \"score\") VALUES (?1, ?2, ?3, ?4)".into(),
                vec![json!(true), json!({"team": "ops"}), json!("Ada"), json!(9.5)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = store
            .query(
                "SELECT * FROM \"users\" WHERE \"active\" = ?1".into(),
                vec![json!(true)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["active"], json!(1));
        assert_eq!(rows[0]["meta"], json!("{\"team\":\"ops\"}"));
        assert_eq!(rows[0]["score"], json!(9.5));
    }

    #[tokio::test]
    async fn affected_counts() {
        let store = store();
        for name in ["a", "b", "c"] {
            store
                .execute(
                    "INSERT INTO users (name, active) VALUES (?1, 1)".into(),
                    vec![json!(name)],
                )
                .await
                .unwrap();
        }
        let affected = store
            .execute("UPDATE users SET active = 0 WHERE name != ?1".into(), vec![json!("a")])
            .await
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[tokio::test]
    async fn bad_sql_is_database_error() {
        let err = store()
            .query("SELECT * FROM missing".into(), vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Database");
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        SqliteDataStore::open(&path).unwrap();
        assert!(path.exists());
    }
}
