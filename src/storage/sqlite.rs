use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Result as SqliteResult};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{Complexity, PriorAnalysis};
use crate::services::analysis_store::AnalysisStore;

// One hundred years; larger values overflow chrono's duration range
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// SQLite storage for prior analyses
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteAnalysisStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteAnalysisStore {
    /// Open (or create) the store. Accepts `sqlite:` / `sqlite://` URLs.
    pub async fn new<P: AsRef<Path>>(db_path: P, ttl_secs: u64) -> SqliteResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS prior_analyses (
                query_key TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                sql_text TEXT NOT NULL,
                complexity TEXT NOT NULL,
                selected_tables TEXT NOT NULL DEFAULT '[]',
                session_id TEXT,
                stored_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_prior_analyses_session ON prior_analyses(session_id, stored_at DESC)",
            [],
        )?;

        Ok(())
    }

    pub async fn save_analysis(&self, key: &str, analysis: &PriorAnalysis) -> SqliteResult<()> {
        let selected_tables =
            serde_json::to_string(&analysis.selected_tables).unwrap_or_else(|_| "[]".to_string());

        let db_conn = self.conn.lock().await;
        db_conn.execute(
            r#"
            INSERT OR REPLACE INTO prior_analyses
            (query_key, question, sql_text, complexity, selected_tables, session_id, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                key,
                analysis.question,
                analysis.sql,
                analysis.complexity.token(),
                selected_tables,
                analysis.session_id,
                analysis.stored_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Stored analysis for a key, ignoring entries older than the TTL
    pub async fn get_analysis(&self, key: &str) -> SqliteResult<Option<PriorAnalysis>> {
        let cutoff = Utc::now() - self.ttl;

        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare(
            "SELECT query_key, question, sql_text, complexity, selected_tables, session_id, stored_at FROM prior_analyses WHERE query_key = ?1",
        )?;

        let result = stmt.query_row(rusqlite::params![key], |row| {
            let stored_at = parse_timestamp(&row.get::<_, String>(6)?, 6)?;
            let selected_tables: BTreeSet<String> =
                serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default();
            Ok(PriorAnalysis {
                query_key: row.get(0)?,
                question: row.get(1)?,
                sql: row.get(2)?,
                complexity: Complexity::from_token(&row.get::<_, String>(3)?)
                    .unwrap_or(Complexity::Simple),
                selected_tables,
                session_id: row.get(5)?,
                stored_at,
            })
        });

        match result {
            Ok(analysis) if analysis.stored_at >= cutoff => Ok(Some(analysis)),
            Ok(_) => {
                tracing::debug!("Stored analysis expired for key: {}", key);
                Ok(None)
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Unexpired analyses recorded for a session, newest first
    pub async fn list_session_analyses(&self, session_id: &str) -> SqliteResult<Vec<PriorAnalysis>> {
        let cutoff = (Utc::now() - self.ttl).to_rfc3339();
        let db_conn = self.conn.lock().await;
        let mut stmt = db_conn.prepare(
            "SELECT query_key, question, sql_text, complexity, selected_tables, session_id, stored_at FROM prior_analyses WHERE session_id = ?1 AND stored_at >= ?2 ORDER BY stored_at DESC",
        )?;

        let rows = stmt.query_map(rusqlite::params![session_id, cutoff], |row| {
            Ok(PriorAnalysis {
                query_key: row.get(0)?,
                question: row.get(1)?,
                sql: row.get(2)?,
                complexity: Complexity::from_token(&row.get::<_, String>(3)?)
                    .unwrap_or(Complexity::Simple),
                selected_tables: serde_json::from_str(&row.get::<_, String>(4)?)
                    .unwrap_or_default(),
                session_id: row.get(5)?,
                stored_at: parse_timestamp(&row.get::<_, String>(6)?, 6)?,
            })
        })?;

        let mut analyses = Vec::new();
        for row in rows {
            analyses.push(row?);
        }
        Ok(analyses)
    }

    /// Drop analyses older than the TTL
    pub async fn purge_expired(&self) -> SqliteResult<usize> {
        let cutoff = (Utc::now() - self.ttl).to_rfc3339();
        let db_conn = self.conn.lock().await;
        let removed = db_conn.execute(
            "DELETE FROM prior_analyses WHERE stored_at < ?1",
            rusqlite::params![cutoff],
        )?;
        if removed > 0 {
            tracing::info!("Purged {} expired analyses", removed);
        }
        Ok(removed)
    }
}

fn parse_timestamp(text: &str, column: usize) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn get(&self, key: &str) -> Result<Option<PriorAnalysis>> {
        Ok(self.get_analysis(key).await?)
    }

    async fn put(&self, key: &str, analysis: PriorAnalysis) -> Result<()> {
        Ok(self.save_analysis(key, &analysis).await?)
    }

    async fn session_analyses(&self, session_id: &str) -> Result<Vec<PriorAnalysis>> {
        Ok(self.list_session_analyses(session_id).await?)
    }
}
