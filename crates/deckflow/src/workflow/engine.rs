use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    metrics::RUNS_FINISHED,
    skills::SkillInput,
    store::{CheckpointStore, RunLock, RunSummary},
    workflow::{
        validate_plan, RunConfig, RunId, RunStatus, StepConfig, StepError, StepExecutor,
        StepFailure, StepResult, WorkflowState,
    },
    Error, Result,
};

/// A run executing on a background task.
pub struct RunHandle {
    run_id: RunId,
    task: JoinHandle<Result<WorkflowState>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Wait for the execution to stop and return the final state.
    pub async fn wait(self) -> Result<WorkflowState> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Run {} task failed: {}", self.run_id, e)))?
    }

    fn finished(state: WorkflowState) -> Self {
        Self {
            run_id: state.run_id,
            task: tokio::spawn(async move { Ok(state) }),
        }
    }
}

/// Starts, resumes and aborts runs against a checkpoint store.
///
/// Cloning is cheap and every clone shares the same set of active runs.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn CheckpointStore>,
    steps: Arc<StepExecutor>,
    active: Arc<RwLock<HashMap<RunId, Arc<AtomicBool>>>>,
}

impl WorkflowExecutor {
    pub fn new(store: Arc<dyn CheckpointStore>, steps: StepExecutor) -> Self {
        Self {
            store,
            steps: Arc::new(steps),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Validate the plan, checkpoint a fresh run and start executing it.
    pub async fn start(&self, config: RunConfig) -> Result<RunHandle> {
        validate_plan(&config.steps, self.steps.registry())?;
        config.request.validate()?;

        let run_id = RunId::new();
        let mut state = WorkflowState::new(run_id, config.request, config.steps);
        let lock = self.store.lock(&run_id).await?;

        let prepared = match state.mark_running() {
            Ok(()) => self.store.save(&lock, &state).await,
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            self.release(lock).await;
            return Err(e);
        }

        info!(
            "Started run {} on {:?} with {} steps",
            run_id,
            state.request.topic,
            state.total_steps()
        );
        Ok(self.launch(state, lock).await)
    }

    /// Continue a run from its latest checkpoint.
    pub async fn resume(&self, run_id: RunId) -> Result<RunHandle> {
        self.store.load(&run_id).await?;
        let lock = self.store.lock(&run_id).await?;

        let state = match self.reopen(&run_id, &lock).await {
            Ok(state) => state,
            Err(e) => {
                self.release(lock).await;
                return Err(e);
            }
        };

        if state.status == RunStatus::Completed {
            info!("Run {} is already completed", run_id);
            self.release(lock).await;
            return Ok(RunHandle::finished(state));
        }

        info!(
            "Resuming run {} at step {}/{} (attempt {})",
            run_id,
            state.current_step + 1,
            state.total_steps(),
            state.attempt
        );
        Ok(self.launch(state, lock).await)
    }

    /// Stop a run and record why. Terminal runs are returned untouched.
    pub async fn abort(&self, run_id: RunId, reason: &str) -> Result<WorkflowState> {
        if let Some(flag) = self.active.read().await.get(&run_id) {
            flag.store(true, Ordering::SeqCst);
        }

        let state = self.store.load(&run_id).await?;
        if state.status.is_terminal() {
            info!("Run {} is already {}; nothing to abort", run_id, state.status);
            return Ok(state);
        }

        // Whoever held the lock loses it; their next save is refused.
        if self.store.break_lock(&run_id).await? {
            info!("Broke lock on run {}", run_id);
        }
        let lock = self.store.lock(&run_id).await?;

        let result = self.cancel(&run_id, &lock, reason).await;
        self.release(lock).await;
        result
    }

    pub async fn status(&self, run_id: RunId) -> Result<WorkflowState> {
        self.store.load(&run_id).await
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<RunSummary>> {
        self.store.list_runs(limit, offset).await
    }

    /// Execute one step of a running state and checkpoint the result.
    ///
    /// `state` only changes once the new checkpoint is durable. A failed
    /// step leaves its previous outputs in place and marks the run failed.
    pub async fn run_step(
        &self,
        state: &mut WorkflowState,
        lock: &RunLock,
        step: &StepConfig,
    ) -> Result<()> {
        let result = match state.dependency_outputs(step) {
            Ok(outputs) => {
                let input = SkillInput::new(&state.run_id, &state.request, outputs);
                self.steps.execute_step(step, &input).await
            }
            Err(e) => Err(StepError {
                step: step.name.clone(),
                source: e,
                attempts: 0,
            }),
        };

        match result {
            Ok(StepResult { output, attempts }) => {
                let mut next = state.clone();
                next.record_step(&step.name, output)?;
                if let Err(e) = self.store.save(lock, &next).await {
                    return Err(self.store_failure(state, lock, &step.name, attempts, e).await);
                }
                *state = next;
                info!(
                    "Run {} checkpointed after step {} ({}/{})",
                    state.run_id,
                    step.name,
                    state.current_step,
                    state.total_steps()
                );
                Ok(())
            }
            Err(StepError { source, attempts, .. }) => {
                state.mark_failed(StepFailure::new(&step.name, &source, attempts))?;
                match self.store.save(lock, state).await {
                    Ok(()) => Err(source),
                    Err(Error::LockLost(message)) => Err(Error::Cancelled(message)),
                    Err(e) => {
                        error!(
                            "Failed to checkpoint failure of run {} at step {} ({}): {}",
                            state.run_id, step.name, source, e
                        );
                        Err(e)
                    }
                }
            }
        }
    }

    async fn launch(&self, state: WorkflowState, lock: RunLock) -> RunHandle {
        let run_id = state.run_id;
        let cancel = Arc::new(AtomicBool::new(false));
        self.active.write().await.insert(run_id, cancel.clone());

        let executor = self.clone();
        let task = tokio::spawn(async move { executor.drive(state, lock, cancel).await });
        RunHandle { run_id, task }
    }

    async fn drive(
        self,
        state: WorkflowState,
        lock: RunLock,
        cancel: Arc<AtomicBool>,
    ) -> Result<WorkflowState> {
        let run_id = state.run_id;
        let result = self.run_steps(state, &lock, &cancel).await;

        self.release(lock).await;
        {
            let mut active = self.active.write().await;
            if active.get(&run_id).map_or(false, |flag| Arc::ptr_eq(flag, &cancel)) {
                active.remove(&run_id);
            }
        }

        let outcome = match &result {
            Ok(state) => {
                info!("Run {} finished: {}", run_id, state.status);
                state.status.to_string()
            }
            Err(Error::Cancelled(reason)) => {
                warn!("Run {} stopped: {}", run_id, reason);
                "cancelled".to_string()
            }
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                RunStatus::Failed.to_string()
            }
        };
        RUNS_FINISHED.with_label_values(&[&outcome]).inc();
        result
    }

    async fn run_steps(
        &self,
        mut state: WorkflowState,
        lock: &RunLock,
        cancel: &AtomicBool,
    ) -> Result<WorkflowState> {
        loop {
            if state.status == RunStatus::Completed {
                return Ok(state);
            }
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Cancelled(format!(
                    "Run {} was aborted before step {}",
                    state.run_id,
                    state.current_step + 1
                )));
            }
            let step = state.next_step().cloned().ok_or_else(|| {
                Error::Internal(format!("Run {} has no step left but is not completed", state.run_id))
            })?;
            self.run_step(&mut state, lock, &step).await?;
        }
    }

    async fn reopen(&self, run_id: &RunId, lock: &RunLock) -> Result<WorkflowState> {
        // Reload under the lock; the first read only proved the run exists.
        let mut state = self.store.load(run_id).await?;
        validate_plan(&state.steps, self.steps.registry()).map_err(|e| {
            Error::CorruptCheckpoint(format!("Run {}: stored plan is not runnable: {}", run_id, e))
        })?;
        state.verify_integrity()?;

        if state.status == RunStatus::Completed {
            return Ok(state);
        }
        state.mark_running()?;
        self.store.save(lock, &state).await?;
        Ok(state)
    }

    async fn cancel(&self, run_id: &RunId, lock: &RunLock, reason: &str) -> Result<WorkflowState> {
        let mut state = self.store.load(run_id).await?;
        if state.status.is_terminal() {
            return Ok(state);
        }
        state.mark_cancelled(reason)?;
        self.store.save(lock, &state).await?;
        info!("Aborted run {}: {}", run_id, reason);
        Ok(state)
    }

    /// The checkpoint store refused a write: the run cannot continue.
    async fn store_failure(
        &self,
        state: &mut WorkflowState,
        lock: &RunLock,
        step: &str,
        attempts: u32,
        e: Error,
    ) -> Error {
        if let Error::LockLost(message) = e {
            return Error::Cancelled(message);
        }
        error!("Checkpoint store failed for run {}: {}", state.run_id, e);
        if state.mark_failed(StepFailure::new(step, &e, attempts)).is_ok() {
            if let Err(retry_err) = self.store.save(lock, state).await {
                warn!(
                    "Could not record store failure for run {}: {}",
                    state.run_id, retry_err
                );
            }
        }
        e
    }

    async fn release(&self, lock: RunLock) {
        let run_id = lock.run_id;
        if let Err(e) = self.store.unlock(lock).await {
            warn!("Failed to release lock on run {}: {}", run_id, e);
        }
    }
}
