use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;

/// A row as returned by storage: column name to loosely typed value.
pub type RowMap = Map<String, Value>;

/// Parameterized SQL text plus its bound values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Statement {
            sql: sql.into(),
            params,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The table or column a statement names does not exist.
    #[error("schema object missing: {0}")]
    MissingSchema(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error(transparent)]
    Backend(sqlx::Error),
}

impl StorageError {
    pub fn is_schema(&self) -> bool {
        matches!(self, StorageError::MissingSchema(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            let message = db.message();
            if message.starts_with("no such table") || message.starts_with("no such column") {
                return StorageError::MissingSchema(message.to_string());
            }
            if db.is_unique_violation() {
                return StorageError::UniqueViolation(message.to_string());
            }
        }
        StorageError::Backend(error)
    }
}

/// The relational connection the engine runs statements against.
pub trait Storage: Send + Sync {
    fn fetch_all<'a>(
        &'a self,
        statement: &'a Statement,
    ) -> BoxFuture<'a, Result<Vec<RowMap>, StorageError>>;

    /// Runs a write and returns the number of rows affected.
    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<u64, StorageError>>;
}

#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Storage for SqliteStorage {
    fn fetch_all<'a>(
        &'a self,
        statement: &'a Statement,
    ) -> BoxFuture<'a, Result<Vec<RowMap>, StorageError>> {
        async move {
            let mut query = sqlx::query(&statement.sql);
            for value in &statement.params {
                query = bind_value(query, value);
            }
            let rows = query.fetch_all(&self.pool).await?;
            Ok(rows.into_iter().map(row_to_map).collect())
        }
        .boxed()
    }

    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<u64, StorageError>> {
        async move {
            let mut query = sqlx::query(&statement.sql);
            for value in &statement.params {
                query = bind_value(query, value);
            }
            let result = query.execute(&self.pool).await?;
            Ok(result.rows_affected())
        }
        .boxed()
    }
}

fn row_to_map(row: SqliteRow) -> RowMap {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = row.try_get_raw(idx).ok();
        let val = match v {
            Some(raw) => {
                if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                }
            }
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    map
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(i64::from(*b)),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}
