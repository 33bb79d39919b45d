//! Built-in backend tool: looks up an order by id in a SQLite table.
//!
//! The table is created on first use and seeded with demo rows when empty, so
//! the bundled example workflow runs against a fresh data directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

use super::{Tool, ToolCallContext, ToolError, ToolOutput, ToolSpec};

pub struct OrderLookupTool {
    db_path: PathBuf,
}

impl OrderLookupTool {
    /// Creates the tool; the database file is created lazily on first call.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
        }
    }

    fn open(path: &Path) -> Result<Connection, ToolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::Execution {
                name: "order_lookup".to_string(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| ToolError::Execution {
            name: "order_lookup".to_string(),
            reason: e.to_string(),
        })?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                total_cents INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| ToolError::Execution {
            name: "order_lookup".to_string(),
            reason: e.to_string(),
        })?;
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
            .map_err(|e| ToolError::Execution {
                name: "order_lookup".to_string(),
                reason: e.to_string(),
            })?;
        if rows == 0 {
            conn.execute_batch(
                r#"
                INSERT INTO orders (id, status, total_cents) VALUES
                    ('1001', 'shipped', 2499),
                    ('1002', 'refund_pending', 9900),
                    ('1003', 'processing', 1250);
                "#,
            )
            .map_err(|e| ToolError::Execution {
                name: "order_lookup".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(conn)
    }
}

#[async_trait]
impl Tool for OrderLookupTool {
    fn name(&self) -> &str {
        "order_lookup"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "order_lookup".to_string(),
            description: Some("Looks up an order by id and returns its status.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_id": { "type": "string", "description": "The order id to look up." }
                },
                "required": ["order_id"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        let order_id = args
            .get("order_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs {
                name: "order_lookup".to_string(),
                reason: "order_id (string) is required".to_string(),
            })?
            .to_string();

        let db_path = self.db_path.clone();
        let row = tokio::task::spawn_blocking(move || {
            let conn = Self::open(&db_path)?;
            conn.query_row(
                "SELECT status, total_cents FROM orders WHERE id = ?1",
                params![order_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(|e| ToolError::Execution {
                name: "order_lookup".to_string(),
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| ToolError::Execution {
            name: "order_lookup".to_string(),
            reason: e.to_string(),
        })??;

        let order_id = args["order_id"].clone();
        let result = match row {
            Some((status, total_cents)) => json!({
                "order_id": order_id,
                "status": status,
                "total_cents": total_cents,
            }),
            None => json!({
                "order_id": order_id,
                "status": "not_found",
            }),
        };
        Ok(ToolOutput::Value(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> ToolCallContext {
        ToolCallContext {
            chat_id: "c1".to_string(),
            agent: "resolver".to_string(),
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn seeds_demo_data_and_finds_an_order() {
        let dir = tempfile::tempdir().unwrap();
        let tool = OrderLookupTool::new(dir.path().join("orders.db"));
        let out = tool
            .call(json!({"order_id": "1002"}), &ctx())
            .await
            .unwrap();
        match out {
            ToolOutput::Value(v) => {
                assert_eq!(v["status"], "refund_pending");
                assert_eq!(v["total_cents"], 9900);
            }
            _ => panic!("expected value output"),
        }
    }

    #[tokio::test]
    async fn unknown_order_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tool = OrderLookupTool::new(dir.path().join("orders.db"));
        let out = tool
            .call(json!({"order_id": "9999"}), &ctx())
            .await
            .unwrap();
        match out {
            ToolOutput::Value(v) => assert_eq!(v["status"], "not_found"),
            _ => panic!("expected value output"),
        }
    }

    #[tokio::test]
    async fn missing_order_id_is_invalid_args() {
        let dir = tempfile::tempdir().unwrap();
        let tool = OrderLookupTool::new(dir.path().join("orders.db"));
        let err = tool.call(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn existing_rows_are_not_reseeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        {
            let conn = OrderLookupTool::open(&path).unwrap();
            conn.execute("UPDATE orders SET status = 'delivered' WHERE id = '1001'", [])
                .unwrap();
        }
        let tool = OrderLookupTool::new(&path);
        let out = tool
            .call(json!({"order_id": "1001"}), &ctx())
            .await
            .unwrap();
        match out {
            ToolOutput::Value(v) => assert_eq!(v["status"], "delivered"),
            _ => panic!("expected value output"),
        }
    }
}
