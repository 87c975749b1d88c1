//! SQLite-backed insight store.

use super::InsightStore;
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

/// Insights table in a single SQLite database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        info!("Connected to database at {}", path.display());
        Self::init(conn)
    }

    /// Create an in-memory database (for testing and dry runs)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS insights (
                metric TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;
        debug!("Database tables initialized");
        Ok(Self { conn })
    }
}

impl InsightStore for SqliteStore {
    fn upsert(&self, rows: &[(String, String)]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO insights (metric, value)
                VALUES (?1, ?2)
                ON CONFLICT(metric) DO UPDATE SET value = excluded.value
                "#,
            )?;
            for (metric, value) in rows {
                debug!("Upserting metric '{}' with value '{}'", metric, value);
                stmt.execute(params![metric, value])?;
            }
        }
        tx.commit()?;

        info!("{} insights upserted", rows.len());
        Ok(rows.len())
    }

    fn get(&self, metric: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM insights WHERE metric = ?1",
                params![metric],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn all(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT metric, value FROM insights ORDER BY metric")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
