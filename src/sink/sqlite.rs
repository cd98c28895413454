/// SQLite run history
///
/// Persists every finished run to a `runs` table. The full `RunResult` is kept
/// as JSON while the lookup fields get their own indexed columns.

use crate::runtime::engine::RunResult;
use crate::sink::{RunSink, SinkFuture};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteRunSink {
    pool: SqlitePool,
}

/// Row summary for run listings
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub workflow_id: String,
    pub status: String,
    pub error_kind: Option<String>,
    pub failed_state: Option<String>,
    pub finished_at: String,
}

impl SqliteRunSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) `runs.db` under `data_dir` and prepare the schema
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir.display(), e)
        })?;
        let db_path = data_dir.join("runs.db");
        tracing::info!("🗄️ Opening run history database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let sink = Self::new(pool);
        sink.init_schema().await?;
        Ok(sink)
    }

    /// Create the runs table and indexes; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error_kind TEXT,
                failed_state TEXT,
                result JSON NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_runs_workflow
            ON runs(workflow_id, finished_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, result: &RunResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let error_kind = result.error.as_ref().map(|failure| failure.kind.code());
        let failed_state = result.error.as_ref().map(|failure| failure.state.as_str());

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, workflow_id, status, error_kind, failed_state, result, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.run_id.to_string())
        .bind(&result.workflow_id)
        .bind(result.status.as_str())
        .bind(error_kind)
        .bind(failed_state)
        .bind(&json)
        .bind(timestamp(&result.started_at))
        .bind(timestamp(&result.finished_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<RunResult>> {
        let row = sqlx::query("SELECT result FROM runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("result");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Most recent runs of a workflow first
    pub async fn list_runs(&self, workflow_id: &str, limit: u32) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, workflow_id, status, error_kind, failed_state, finished_at
            FROM runs
            WHERE workflow_id = ?
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RunSummary {
                run_id: row.get("run_id"),
                workflow_id: row.get("workflow_id"),
                status: row.get("status"),
                error_kind: row.get("error_kind"),
                failed_state: row.get("failed_state"),
                finished_at: row.get("finished_at"),
            })
            .collect())
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl RunSink for SqliteRunSink {
    fn record<'a>(&'a self, result: &'a RunResult) -> SinkFuture<'a> {
        Box::pin(self.insert(result))
    }
}
