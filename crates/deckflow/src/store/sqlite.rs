use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tracing::{debug, error, info};

use super::{ensure_writable, lock_lost, CheckpointStore, RunLock, RunSummary};
use crate::{
    workflow::{RunId, WorkflowState},
    Error, Result,
};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect to `database_url`, creating the file if needed. In-memory
    /// URLs get a single long-lived connection so the database survives.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to SQLite database: {}", database_url);

        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            error!("Failed to connect to SQLite: {}", e);
            Error::Sqlx(e)
        })?;

        Ok(Self { pool })
    }

    fn decode_state(run_id: &str, raw: &str) -> Result<WorkflowState> {
        serde_json::from_str(raw).map_err(|e| {
            Error::CorruptCheckpoint(format!("Run {}: checkpoint cannot be decoded: {}", run_id, e))
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                Error::Migrate(e)
            })?;

        Ok(())
    }

    async fn save(&self, lock: &RunLock, state: &WorkflowState) -> Result<()> {
        ensure_writable(lock, state)?;
        debug!(
            "Checkpoint run {} at step {}/{} ({})",
            state.run_id,
            state.current_step,
            state.total_steps(),
            state.status
        );

        let raw = serde_json::to_string(state)?;

        // The lock check and the write are one statement, so a lock broken
        // between them cannot let a stale execution overwrite the checkpoint.
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (
                run_id, status, topic, current_step, total_steps, attempt, state,
                created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
            WHERE EXISTS (SELECT 1 FROM run_locks WHERE run_id = ?1 AND token = ?10)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                current_step = excluded.current_step,
                total_steps = excluded.total_steps,
                attempt = excluded.attempt,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.run_id.to_string())
        .bind(state.status.to_string())
        .bind(&state.request.topic)
        .bind(state.current_step as i64)
        .bind(state.total_steps() as i64)
        .bind(state.attempt as i64)
        .bind(raw)
        .bind(state.created_at)
        .bind(state.updated_at)
        .bind(lock.token.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(lock_lost(&state.run_id));
        }
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<WorkflowState> {
        debug!("Loading checkpoint: {}", run_id);

        let row = sqlx::query("SELECT state FROM checkpoints WHERE run_id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::decode_state(&run_id.to_string(), r.get("state")),
            None => Err(Error::NotFound(format!("No checkpoint for run {}", run_id))),
        }
    }

    async fn lock(&self, run_id: &RunId) -> Result<RunLock> {
        let lock = RunLock::new(*run_id);

        let result = sqlx::query(
            r#"
            INSERT INTO run_locks (run_id, token, holder, acquired_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(run_id) DO NOTHING
            "#,
        )
        .bind(run_id.to_string())
        .bind(lock.token.to_string())
        .bind(&lock.holder)
        .bind(lock.acquired_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let held = sqlx::query("SELECT holder, acquired_at FROM run_locks WHERE run_id = ?1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            let detail = held
                .map(|r| {
                    let holder: String = r.get("holder");
                    let since: DateTime<Utc> = r.get("acquired_at");
                    format!(" by {} since {}", holder, since)
                })
                .unwrap_or_default();
            return Err(Error::AlreadyRunning(format!("Run {} is locked{}", run_id, detail)));
        }

        debug!("Locked run {} with token {}", run_id, lock.token);
        Ok(lock)
    }

    async fn unlock(&self, lock: RunLock) -> Result<()> {
        let result = sqlx::query("DELETE FROM run_locks WHERE run_id = ?1 AND token = ?2")
            .bind(lock.run_id.to_string())
            .bind(lock.token.to_string())
            .execute(&self.pool)
            .await?;
        debug!("Unlocked run {} ({} rows)", lock.run_id, result.rows_affected());
        Ok(())
    }

    async fn break_lock(&self, run_id: &RunId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_locks WHERE run_id = ?1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<RunSummary>> {
        debug!("Listing runs: limit={}, offset={}", limit, offset);

        let rows = sqlx::query(
            "SELECT run_id, state FROM checkpoints ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let run_id: String = r.get("run_id");
                Self::decode_state(&run_id, r.get("state")).map(|state| RunSummary::from(&state))
            })
            .collect()
    }
}
