//! External sources for `database`-typed context variables.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::ContextError;

/// Fetches one value for a `database` context variable. `query` is the
/// free-form query text from the manifest.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Option<Value>, ContextError>;
}

/// SQLite-backed source: runs the query and returns the first column of the
/// first row (NULL and no-rows both map to `None`).
pub struct SqliteContextSource {
    db_path: PathBuf,
}

impl SqliteContextSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ContextSource for SqliteContextSource {
    async fn fetch(&self, query: &str) -> Result<Option<Value>, ContextError> {
        let db_path = self.db_path.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ContextError::Source(e.to_string()))?;
            let mut stmt = conn
                .prepare(&query)
                .map_err(|e| ContextError::Source(e.to_string()))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| ContextError::Source(e.to_string()))?;
            let Some(row) = rows
                .next()
                .map_err(|e| ContextError::Source(e.to_string()))?
            else {
                return Ok(None);
            };
            let value = match row.get_ref(0).map_err(|e| ContextError::Source(e.to_string()))? {
                rusqlite::types::ValueRef::Null => return Ok(None),
                rusqlite::types::ValueRef::Integer(i) => Value::from(i),
                rusqlite::types::ValueRef::Real(f) => Value::from(f),
                rusqlite::types::ValueRef::Text(t) => {
                    Value::String(String::from_utf8_lossy(t).into_owned())
                }
                rusqlite::types::ValueRef::Blob(_) => {
                    return Err(ContextError::Source(
                        "blob columns are not supported for context variables".to_string(),
                    ))
                }
            };
            Ok(Some(value))
        })
        .await
        .map_err(|e| ContextError::Source(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fetches_first_column_of_first_row() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let conn = rusqlite::Connection::open(file.path()).unwrap();
            conn.execute("CREATE TABLE plans (tier TEXT)", []).unwrap();
            conn.execute("INSERT INTO plans (tier) VALUES ('gold')", [])
                .unwrap();
        }
        let source = SqliteContextSource::new(file.path());
        let value = source.fetch("SELECT tier FROM plans").await.unwrap();
        assert_eq!(value, Some(json!("gold")));
        let none = source
            .fetch("SELECT tier FROM plans WHERE tier = 'none'")
            .await
            .unwrap();
        assert_eq!(none, None);
    }
}
