mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{chain, executor_with, memory_executor, run_config, Gate, TestSkill};
use deckflow::{
    store::{CheckpointStore, InMemoryStore, RunLock, RunSummary},
    workflow::{RunId, RunStatus, StepConfig, WorkflowState},
    Error, Result,
};

fn skills() -> (Arc<TestSkill>, Arc<TestSkill>, Arc<TestSkill>) {
    (
        Arc::new(TestSkill::new("a")),
        Arc::new(TestSkill::new("b")),
        Arc::new(TestSkill::new("c")),
    )
}

#[tokio::test]
async fn test_run_completes_and_checkpoints_every_step() {
    let (a, b, c) = skills();
    let executor = memory_executor(&[a.clone(), b.clone(), c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.completed, vec!["a", "b", "c"]);
    assert_eq!(state.current_step, 3);
    assert_eq!(state.attempt, 1);
    assert_eq!(state.output("c").unwrap()["topic"], "Checkpointing");
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));

    let stored = executor.status(run_id).await.unwrap();
    assert_eq!(stored, state);

    // the lock is released once the run stops
    let lock = executor.store().lock(&run_id).await.unwrap();
    executor.store().unlock(lock).await.unwrap();
}

#[tokio::test]
async fn test_resume_continues_after_last_completed_step() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("too long".to_string())));
    let executor = memory_executor(&[a.clone(), b.clone(), c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let failed = executor.status(run_id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.current_step, 2);
    assert_eq!(failed.outputs.len(), 2);
    let failure = failed.last_error.clone().unwrap();
    assert_eq!(failure.step, "c");
    assert_eq!(failure.kind, "validation");
    assert_eq!(failure.attempts, 1);

    let state = executor.resume(run_id).await.unwrap().wait().await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.attempt, 2);
    assert!(state.last_error.is_none());
    assert_eq!(state.output("a"), failed.output("a"));
    assert_eq!(state.output("b"), failed.output("b"));
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 2));
}

#[tokio::test]
async fn test_resume_of_completed_run_runs_nothing() {
    let (a, b, c) = skills();
    let executor = memory_executor(&[a.clone(), b.clone(), c.clone()]);
    let completed = executor.start(run_config(chain())).await.unwrap().wait().await.unwrap();

    let again = executor.resume(completed.run_id).await.unwrap().wait().await.unwrap();
    assert_eq!(again, completed);
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run_and_keep_prior_outputs() {
    let (a, _, c) = skills();
    let b = Arc::new(TestSkill::new("b").failing(10, || Error::Provider("503".to_string())));
    let executor = memory_executor(&[a.clone(), b.clone(), c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    assert!(matches!(handle.wait().await, Err(Error::Provider(_))));

    let state = executor.status(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.completed, vec!["a"]);
    assert!(state.output("b").is_none());
    let failure = state.last_error.unwrap();
    assert_eq!(failure.step, "b");
    assert_eq!(failure.kind, "provider");
    assert_eq!(failure.attempts, 3);
    assert_eq!(b.calls(), 3);
    assert_eq!(c.calls(), 0);
}

#[tokio::test]
async fn test_transient_failures_recover_within_retry_budget() {
    let a = Arc::new(TestSkill::new("a").failing(2, || Error::RateLimit("429".to_string())));
    let (_, b, c) = skills();
    let executor = memory_executor(&[a.clone(), b, c]);

    let state = executor.start(run_config(chain())).await.unwrap().wait().await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.output("a").unwrap()["call"], 3);
    assert_eq!(a.calls(), 3);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let (a, b, c) = skills();
    let executor = memory_executor(&[a, b, c]);
    let missing = RunId::new();

    assert!(matches!(executor.resume(missing).await, Err(Error::NotFound(_))));
    assert!(matches!(executor.status(missing).await, Err(Error::NotFound(_))));
    assert!(matches!(executor.abort(missing, "nope").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_invalid_plans_are_rejected_before_any_skill_runs() {
    let a = Arc::new(TestSkill::new("a"));
    let b = Arc::new(TestSkill::new("b").requires(&["a"]));
    let executor = memory_executor(&[a.clone(), b.clone()]);

    // b needs a's output but does not declare it
    let undeclared = vec![StepConfig::new("a"), StepConfig::new("b")];
    assert!(matches!(executor.start(run_config(undeclared)).await, Err(Error::Config(_))));

    let forward = vec![
        StepConfig::new("b").with_dependencies(["a"]),
        StepConfig::new("a"),
    ];
    assert!(matches!(executor.start(run_config(forward)).await, Err(Error::Config(_))));

    let unknown = vec![StepConfig::new("a"), StepConfig::new("z").with_dependencies(["a"])];
    assert!(matches!(executor.start(run_config(unknown)).await, Err(Error::Config(_))));

    assert_eq!((a.calls(), b.calls()), (0, 0));
    assert!(executor.list(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dependency_on_undeclared_step_is_rejected() {
    let research = Arc::new(TestSkill::new("research"));
    let outline = Arc::new(TestSkill::new("outline"));
    let executor = memory_executor(&[research.clone(), outline.clone()]);

    let steps = vec![
        StepConfig::new("research"),
        StepConfig::new("outline").with_dependencies(["nonexistent"]),
    ];
    assert!(matches!(executor.start(run_config(steps)).await, Err(Error::Config(_))));
    assert_eq!((research.calls(), outline.calls()), (0, 0));
    assert!(executor.list(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_resume_admits_one_execution() {
    let gate = Arc::new(Gate::default());
    let (a, b, _) = skills();
    let c = Arc::new(
        TestSkill::new("c")
            .failing(1, || Error::Validation("bad slide".to_string()))
            .gated(gate.clone()),
    );
    let executor = memory_executor(&[a, b, c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    assert!(handle.wait().await.is_err());

    let (first, second) = tokio::join!(executor.resume(run_id), executor.resume(run_id));
    let (winner, loser) = match (first, second) {
        (Ok(handle), Err(e)) | (Err(e), Ok(handle)) => (handle, e),
        (first, second) => panic!(
            "expected exactly one resume to win, got {:?} and {:?}",
            first.map(|h| h.run_id()),
            second.map(|h| h.run_id())
        ),
    };
    assert!(matches!(loser, Error::AlreadyRunning(_)));

    gate.started.notified().await;
    assert!(matches!(executor.resume(run_id).await, Err(Error::AlreadyRunning(_))));
    gate.release.notify_one();

    let state = winner.wait().await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.attempt, 2);
    assert_eq!(c.calls(), 2);
}

#[tokio::test]
async fn test_abort_stops_active_run_and_discards_in_flight_step() {
    let gate = Arc::new(Gate::default());
    let a = Arc::new(TestSkill::new("a"));
    let b = Arc::new(TestSkill::new("b").gated(gate.clone()));
    let c = Arc::new(TestSkill::new("c"));
    let executor = memory_executor(&[a, b.clone(), c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    gate.started.notified().await;

    let aborted = executor.abort(run_id, "operator request").await.unwrap();
    assert_eq!(aborted.status, RunStatus::Failed);
    assert_eq!(aborted.cancellation.as_ref().unwrap().reason, "operator request");
    assert_eq!(aborted.completed, vec!["a"]);

    gate.release.notify_one();
    assert!(matches!(handle.wait().await, Err(Error::Cancelled(_))));

    let stored = executor.status(run_id).await.unwrap();
    assert_eq!(stored, aborted);
    assert!(stored.output("b").is_none());
    assert_eq!(c.calls(), 0);

    // an aborted run is a failed run: it resumes as a new attempt
    gate.release.notify_one();
    let resumed = executor.resume(run_id).await.unwrap().wait().await.unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.attempt, 2);
    assert!(resumed.cancellation.is_none());
    assert_eq!(b.calls(), 2);
}

#[tokio::test]
async fn test_abort_of_terminal_run_is_a_no_op() {
    let (a, b, c) = skills();
    let executor = memory_executor(&[a, b, c]);
    let completed = executor.start(run_config(chain())).await.unwrap().wait().await.unwrap();

    let state = executor.abort(completed.run_id, "too late").await.unwrap();
    assert_eq!(state, completed);
    assert!(state.cancellation.is_none());
}

#[tokio::test]
async fn test_tampered_checkpoint_is_refused_on_resume() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("bad".to_string())));
    let store = Arc::new(InMemoryStore::new());
    let executor = executor_with(store.clone(), &[a, b, c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    assert!(handle.wait().await.is_err());

    let mut state = store.load(&run_id).await.unwrap();
    state.outputs.remove("a");
    let lock = store.lock(&run_id).await.unwrap();
    store.save(&lock, &state).await.unwrap();
    store.unlock(lock).await.unwrap();

    assert!(matches!(executor.resume(run_id).await, Err(Error::CorruptCheckpoint(_))));
    assert_eq!(c.calls(), 1);

    // the refused resume does not leave the run locked
    let lock = store.lock(&run_id).await.unwrap();
    store.unlock(lock).await.unwrap();
}

async fn overwrite(store: &InMemoryStore, state: &WorkflowState) {
    let lock = store.lock(&state.run_id).await.unwrap();
    store.save(&lock, state).await.unwrap();
    store.unlock(lock).await.unwrap();
}

#[tokio::test]
async fn test_stored_plan_that_no_longer_validates_is_corrupt() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("bad".to_string())));
    let store = Arc::new(InMemoryStore::new());
    let executor = executor_with(store.clone(), &[a, b, c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    assert!(handle.wait().await.is_err());
    let failed = store.load(&run_id).await.unwrap();

    let mut missing_dependency = failed.clone();
    missing_dependency.steps[2] = StepConfig::new("c").with_dependencies(["missing"]);
    overwrite(&store, &missing_dependency).await;
    assert!(matches!(executor.resume(run_id).await, Err(Error::CorruptCheckpoint(_))));

    let mut unregistered = failed.clone();
    unregistered.steps[2] = StepConfig::new("d").with_dependencies(["b"]);
    overwrite(&store, &unregistered).await;
    assert!(matches!(executor.resume(run_id).await, Err(Error::CorruptCheckpoint(_))));

    assert_eq!(c.calls(), 1);
    assert_eq!(store.load(&run_id).await.unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_completed_status_short_of_the_last_step_is_corrupt() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("bad".to_string())));
    let store = Arc::new(InMemoryStore::new());
    let executor = executor_with(store.clone(), &[a, b, c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    assert!(handle.wait().await.is_err());

    let mut state = store.load(&run_id).await.unwrap();
    assert_eq!(state.current_step, 2);
    state.status = RunStatus::Completed;
    state.last_error = None;
    overwrite(&store, &state).await;

    assert!(matches!(executor.resume(run_id).await, Err(Error::CorruptCheckpoint(_))));
    assert_eq!(c.calls(), 1);
}

/// Delegates to an in-memory store but refuses the first checkpoint write
/// that matches `refuse`.
struct FailingStore {
    inner: InMemoryStore,
    refuse: fn(&WorkflowState) -> bool,
    tripped: AtomicBool,
}

impl FailingStore {
    fn new(refuse: fn(&WorkflowState) -> bool) -> Self {
        Self {
            inner: InMemoryStore::new(),
            refuse,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn save(&self, lock: &RunLock, state: &WorkflowState) -> Result<()> {
        if (self.refuse)(state) && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(Error::Store("disk full".to_string()));
        }
        self.inner.save(lock, state).await
    }

    async fn load(&self, run_id: &RunId) -> Result<WorkflowState> {
        self.inner.load(run_id).await
    }

    async fn lock(&self, run_id: &RunId) -> Result<RunLock> {
        self.inner.lock(run_id).await
    }

    async fn unlock(&self, lock: RunLock) -> Result<()> {
        self.inner.unlock(lock).await
    }

    async fn break_lock(&self, run_id: &RunId) -> Result<bool> {
        self.inner.break_lock(run_id).await
    }

    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<RunSummary>> {
        self.inner.list_runs(limit, offset).await
    }
}

#[tokio::test]
async fn test_store_failure_stops_the_run() {
    let (a, b, c) = skills();
    let store = Arc::new(FailingStore::new(|state| {
        state.status == RunStatus::Running && state.current_step == 2
    }));
    let executor = executor_with(store, &[a, b.clone(), c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_store_failure());

    let state = executor.status(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.completed, vec!["a"]);
    assert_eq!(state.last_error.unwrap().kind, "store");
    assert_eq!(c.calls(), 0);

    // b's lost output is recomputed on resume
    let resumed = executor.resume(run_id).await.unwrap().wait().await.unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(b.calls(), 2);
}

#[tokio::test]
async fn test_unrecorded_step_failure_surfaces_the_store_error() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("bad".to_string())));
    let store = Arc::new(FailingStore::new(|state| state.status == RunStatus::Failed));
    let executor = executor_with(store, &[a, b, c.clone()]);

    let handle = executor.start(run_config(chain())).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_store_failure());

    // the last durable checkpoint is the one written after b
    let state = executor.status(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.current_step, 2);
    assert!(state.last_error.is_none());

    let resumed = executor.resume(run_id).await.unwrap().wait().await.unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(c.calls(), 2);
}

#[tokio::test]
async fn test_list_reports_recent_runs() {
    let (a, b, _) = skills();
    let c = Arc::new(TestSkill::new("c").failing(1, || Error::Validation("bad".to_string())));
    let executor = memory_executor(&[a, b, c]);

    let failed = executor.start(run_config(chain())).await.unwrap();
    let failed_id = failed.run_id();
    assert!(failed.wait().await.is_err());
    let completed = executor.start(run_config(chain())).await.unwrap().wait().await.unwrap();

    let runs = executor.list(10, 0).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, completed.run_id);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[1].run_id, failed_id);
    assert_eq!(runs[1].failed_step.as_deref(), Some("c"));
    assert!(!runs[1].cancelled);

    assert_eq!(executor.list(1, 1).await.unwrap()[0].run_id, failed_id);
}
