//! SQLite-backed checkpointer.
//!
//! Durable implementation of the [`Checkpointer`] contract with full
//! per-lane history and pending-write recording. Checkpoints and
//! metadata are stored as JSON columns; insertion order (rowid) gives
//! the newest-first listing for a lane, which matches generation order
//! because the loop is the only writer per thread.
//!
//! # Storage growth
//!
//! Full history is retained; the engine never requires garbage
//! collection. Long-running deployments should prune by time or by
//! per-thread depth:
//!
//! ```bash
//! sqlite3 stepweave.db \
//!   "DELETE FROM checkpoints WHERE created_at < datetime('now', '-30 days')"
//! ```

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::instrument;

use super::{
    CheckpointQuery, CheckpointTuple, Checkpointer, CheckpointerError, PendingWrite, Result,
};
use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::config::RunConfig;
use crate::types::ChannelVersion;

const CREATE_CHECKPOINTS: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id       TEXT NOT NULL,
    checkpoint_ns   TEXT NOT NULL DEFAULT '',
    checkpoint_id   TEXT NOT NULL,
    parent_id       TEXT,
    checkpoint_json TEXT NOT NULL,
    metadata_json   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id)
)
"#;

const CREATE_WRITES: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoint_writes (
    thread_id     TEXT NOT NULL,
    checkpoint_ns TEXT NOT NULL DEFAULT '',
    checkpoint_id TEXT NOT NULL,
    task_id       TEXT NOT NULL,
    idx           INTEGER NOT NULL,
    channel       TEXT NOT NULL,
    value_json    TEXT NOT NULL,
    PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id, task_id, idx)
)
"#;

/// Durable [`Checkpointer`] backed by SQLite.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

fn backend(context: &str, e: impl std::fmt::Display) -> CheckpointerError {
    CheckpointerError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn corrupt(context: &str, e: impl std::fmt::Display) -> CheckpointerError {
    CheckpointerError::Other {
        message: format!("{context}: {e}"),
    }
}

impl SqliteCheckpointer {
    /// Connect to (or create) a SQLite database.
    /// Example URL: `"sqlite://stepweave.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| backend("parse database url", e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| backend("connect", e))?;
        for statement in [CREATE_CHECKPOINTS, CREATE_WRITES] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| backend("create schema", e))?;
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect using `STEPWEAVE_SQLITE_URL` (falling back to
    /// `sqlite://stepweave.db`), honoring a `.env` file.
    pub async fn connect_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var("STEPWEAVE_SQLITE_URL")
            .unwrap_or_else(|_| "sqlite://stepweave.db".to_string());
        Self::connect(&url).await
    }

    fn row_to_tuple(&self, config: &RunConfig, row: &SqliteRow) -> Result<CheckpointTuple> {
        let checkpoint_json: String = row.get("checkpoint_json");
        let metadata_json: String = row.get("metadata_json");
        let parent_id: Option<String> = row.get("parent_id");
        let checkpoint: Checkpoint = serde_json::from_str(&checkpoint_json)
            .map_err(|e| corrupt("decode checkpoint", e))?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&metadata_json).map_err(|e| corrupt("decode metadata", e))?;
        Ok(CheckpointTuple {
            config: config.for_checkpoint(checkpoint.id.clone()),
            parent_config: parent_id.map(|id| config.for_checkpoint(id)),
            checkpoint,
            metadata,
            pending_writes: Vec::new(),
        })
    }

    async fn load_writes(&self, config: &RunConfig, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, channel, value_json
            FROM checkpoint_writes
            WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3
            ORDER BY rowid
            "#,
        )
        .bind(&config.thread_id)
        .bind(&config.checkpoint_ns)
        .bind(checkpoint_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| backend("load pending writes", e))?;

        rows.iter()
            .map(|row| {
                let value_json: String = row.get("value_json");
                Ok(PendingWrite {
                    task_id: row.get("task_id"),
                    channel: row.get("channel"),
                    value: serde_json::from_str(&value_json)
                        .map_err(|e| corrupt("decode pending write", e))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, config), fields(thread = %config.thread_id))]
    async fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>> {
        let row = match &config.checkpoint_id {
            Some(id) => sqlx::query(
                r#"
                SELECT checkpoint_json, metadata_json, parent_id
                FROM checkpoints
                WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3
                "#,
            )
            .bind(&config.thread_id)
            .bind(&config.checkpoint_ns)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await,
            None => sqlx::query(
                r#"
                SELECT checkpoint_json, metadata_json, parent_id
                FROM checkpoints
                WHERE thread_id = ?1 AND checkpoint_ns = ?2
                ORDER BY rowid DESC
                LIMIT 1
                "#,
            )
            .bind(&config.thread_id)
            .bind(&config.checkpoint_ns)
            .fetch_optional(self.pool.as_ref())
            .await,
        }
        .map_err(|e| backend("fetch checkpoint", e))?;

        let Some(row) = row else { return Ok(None) };
        let mut tuple = self.row_to_tuple(config, &row)?;
        tuple.pending_writes = self
            .load_writes(config, &tuple.checkpoint.id.clone())
            .await?;
        Ok(Some(tuple))
    }

    async fn list(
        &self,
        config: &RunConfig,
        query: CheckpointQuery,
    ) -> Result<Vec<CheckpointTuple>> {
        // `before` is exclusive; rowid order is generation order for a
        // single-writer lane.
        let limit = query.limit.map_or(i64::MAX, |l| l as i64);
        let rows = match &query.before {
            Some(before_id) => sqlx::query(
                r#"
                SELECT checkpoint_json, metadata_json, parent_id
                FROM checkpoints
                WHERE thread_id = ?1 AND checkpoint_ns = ?2
                  AND rowid < (
                    SELECT rowid FROM checkpoints
                    WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3
                  )
                ORDER BY rowid DESC
                LIMIT ?4
                "#,
            )
            .bind(&config.thread_id)
            .bind(&config.checkpoint_ns)
            .bind(before_id)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await,
            None => sqlx::query(
                r#"
                SELECT checkpoint_json, metadata_json, parent_id
                FROM checkpoints
                WHERE thread_id = ?1 AND checkpoint_ns = ?2
                ORDER BY rowid DESC
                LIMIT ?3
                "#,
            )
            .bind(&config.thread_id)
            .bind(&config.checkpoint_ns)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await,
        }
        .map_err(|e| backend("list checkpoints", e))?;

        let mut tuples = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut tuple = self.row_to_tuple(config, row)?;
            tuple.pending_writes = self
                .load_writes(config, &tuple.checkpoint.id.clone())
                .await?;
            tuples.push(tuple);
        }
        Ok(tuples)
    }

    #[instrument(skip_all, fields(thread = %config.thread_id, step = metadata.step))]
    async fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<RunConfig> {
        let checkpoint_json =
            serde_json::to_string(&checkpoint).map_err(|e| corrupt("encode checkpoint", e))?;
        let metadata_json =
            serde_json::to_string(&metadata).map_err(|e| corrupt("encode metadata", e))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                thread_id, checkpoint_ns, checkpoint_id, parent_id,
                checkpoint_json, metadata_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&config.thread_id)
        .bind(&config.checkpoint_ns)
        .bind(&checkpoint.id)
        .bind(&config.checkpoint_id)
        .bind(&checkpoint_json)
        .bind(&metadata_json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| backend("insert checkpoint", e))?;

        Ok(config.for_checkpoint(checkpoint.id))
    }

    async fn put_writes(
        &self,
        config: &RunConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
    ) -> Result<()> {
        let checkpoint_id =
            config
                .checkpoint_id
                .as_ref()
                .ok_or_else(|| CheckpointerError::Other {
                    message: "put_writes requires a config naming a checkpoint".to_string(),
                })?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("begin transaction", e))?;
        for (idx, (channel, value)) in writes.into_iter().enumerate() {
            let value_json =
                serde_json::to_string(&value).map_err(|e| corrupt("encode pending write", e))?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO checkpoint_writes (
                    thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, value_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&config.thread_id)
            .bind(&config.checkpoint_ns)
            .bind(checkpoint_id)
            .bind(task_id)
            .bind(idx as i64)
            .bind(&channel)
            .bind(&value_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("insert pending write", e))?;
        }
        tx.commit().await.map_err(|e| backend("commit writes", e))?;
        Ok(())
    }
}
