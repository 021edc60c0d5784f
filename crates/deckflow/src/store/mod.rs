mod config;
mod factory;
mod memory;
mod models;
mod sqlite;

pub use config::{DatabaseConfig, DatabaseType};
pub use factory::create_store;
pub use memory::InMemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::workflow::{RunId, RunStatus, WorkflowState};
use crate::{Error, Result};

/// Durable checkpoints plus the per-run lock that guards them.
///
/// Writes for one run id are serialized; different run ids never contend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    // Initialize database schema
    async fn init(&self) -> Result<()>;

    /// Persist `state` as the run's checkpoint. Refused with
    /// [`Error::LockLost`] unless `lock` still holds the run.
    async fn save(&self, lock: &RunLock, state: &WorkflowState) -> Result<()>;

    /// Latest checkpoint, or [`Error::NotFound`].
    async fn load(&self, run_id: &RunId) -> Result<WorkflowState>;

    /// Take the run's lock, or fail with [`Error::AlreadyRunning`].
    async fn lock(&self, run_id: &RunId) -> Result<RunLock>;

    /// Release a lock. Releasing a lock that was broken is a no-op.
    async fn unlock(&self, lock: RunLock) -> Result<()>;

    /// Remove whatever lock the run holds. Returns whether one existed.
    async fn break_lock(&self, run_id: &RunId) -> Result<bool>;

    /// Most recently updated runs first.
    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<RunSummary>>;
}

/// Checks shared by every implementation before a checkpoint is written.
fn ensure_writable(lock: &RunLock, state: &WorkflowState) -> Result<()> {
    if lock.run_id != state.run_id {
        return Err(Error::Internal(format!(
            "Lock for run {} used to save run {}",
            lock.run_id, state.run_id
        )));
    }
    if state.status == RunStatus::Pending {
        return Err(Error::Internal(format!(
            "Refusing to checkpoint run {} before it starts",
            state.run_id
        )));
    }
    Ok(())
}

fn lock_lost(run_id: &RunId) -> Error {
    Error::LockLost(format!("Run {} is no longer held by this execution", run_id))
}
