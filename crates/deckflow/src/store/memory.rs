use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ensure_writable, lock_lost, CheckpointStore, RunLock, RunSummary};
use crate::workflow::{RunId, WorkflowState};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    checkpoints: HashMap<RunId, WorkflowState>,
    locks: HashMap<RunId, RunLock>,
}

/// Process-local store for tests and throwaway runs.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, lock: &RunLock, state: &WorkflowState) -> Result<()> {
        ensure_writable(lock, state)?;
        let mut inner = self.inner.lock().await;
        match inner.locks.get(&state.run_id) {
            Some(held) if held.token == lock.token => {}
            _ => return Err(lock_lost(&state.run_id)),
        }
        debug!(
            "Checkpoint run {} at step {}/{} ({})",
            state.run_id,
            state.current_step,
            state.total_steps(),
            state.status
        );
        inner.checkpoints.insert(state.run_id, state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<WorkflowState> {
        self.inner
            .lock()
            .await
            .checkpoints
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No checkpoint for run {}", run_id)))
    }

    async fn lock(&self, run_id: &RunId) -> Result<RunLock> {
        let mut inner = self.inner.lock().await;
        if let Some(held) = inner.locks.get(run_id) {
            return Err(Error::AlreadyRunning(format!(
                "Run {} is locked by {} since {}",
                run_id, held.holder, held.acquired_at
            )));
        }
        let lock = RunLock::new(*run_id);
        inner.locks.insert(*run_id, lock.clone());
        Ok(lock)
    }

    async fn unlock(&self, lock: RunLock) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.locks.get(&lock.run_id).map(|held| held.token) == Some(lock.token) {
            inner.locks.remove(&lock.run_id);
        }
        Ok(())
    }

    async fn break_lock(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.inner.lock().await.locks.remove(run_id).is_some())
    }

    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<RunSummary>> {
        let inner = self.inner.lock().await;
        let mut states: Vec<&WorkflowState> = inner.checkpoints.values().collect();
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(RunSummary::from)
            .collect())
    }
}
