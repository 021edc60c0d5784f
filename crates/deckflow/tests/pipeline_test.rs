use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deckflow::{
    config::PipelineConfig,
    pipeline::{build_registry, default_run_config},
    providers::{
        image::PLACEHOLDER_PNG, GenerationOptions, ImageConfig, ImageGenerator, ImageRequest,
        LLMConfig, MockImageProvider, MockTextProvider, TextGenerator,
    },
    skills::{names, run_dir, AssembledDeck, DeckRequest, GraphicsReport},
    store::{create_store, CheckpointStore, DatabaseConfig, DatabaseType, InMemoryStore, SqliteStore},
    workflow::{RunId, RunStatus, StepExecutor, WorkflowExecutor, WorkflowState},
    Error, Result,
};
use tempfile::TempDir;

struct CountingText {
    inner: MockTextProvider,
    calls: AtomicU32,
}

#[async_trait]
impl TextGenerator for CountingText {
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_text(prompt, options).await
    }
}

/// Refuses every request with a non-retryable error.
struct RejectingImages;

#[async_trait]
impl ImageGenerator for RejectingImages {
    async fn generate_image(&self, _request: &ImageRequest, _options: &GenerationOptions) -> Result<Vec<u8>> {
        Err(Error::Validation("content policy violation".to_string()))
    }
}

fn pipeline(output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: output_dir.to_path_buf(),
        max_parallel_requests: 2,
        max_attempts: 2,
        initial_backoff_ms: 0,
        ..PipelineConfig::default()
    }
}

fn executor(
    store: Arc<dyn CheckpointStore>,
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    pipeline: &PipelineConfig,
) -> WorkflowExecutor {
    let llm = LLMConfig {
        provider: "mock".to_string(),
        ..LLMConfig::default()
    };
    let registry = build_registry(text, image, &llm, &ImageConfig::default(), pipeline);
    WorkflowExecutor::new(store, StepExecutor::new(registry))
}

fn request(template: &str, include_images: bool) -> DeckRequest {
    DeckRequest {
        slide_count: 3,
        template: template.to_string(),
        include_images,
        audience: Some("platform engineers".to_string()),
        ..DeckRequest::new("Rust at work")
    }
}

fn assembled(state: &WorkflowState) -> AssembledDeck {
    serde_json::from_value(state.output(names::ASSEMBLE).unwrap().clone()).unwrap()
}

#[tokio::test]
async fn test_mock_pipeline_produces_marp_deck_with_images() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(dir.path());
    let executor = executor(
        Arc::new(InMemoryStore::new()),
        Arc::new(MockTextProvider),
        Arc::new(MockImageProvider),
        &pipeline,
    );

    let handle = executor
        .start(default_run_config(request("marp", true), &pipeline))
        .await
        .unwrap();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.completed.len(), 8);

    let report: GraphicsReport =
        serde_json::from_value(state.output(names::GRAPHICS_CHECK).unwrap().clone()).unwrap();
    assert!(report.rejected.is_empty());
    let indexes: Vec<usize> = report.valid.iter().map(|image| image.slide_index).collect();
    assert_eq!(indexes, vec![1, 3]);

    let deck = assembled(&state);
    assert_eq!(deck.path, "deck.md");
    assert_eq!(deck.slide_count, 3);

    let base = run_dir(dir.path(), &state.run_id);
    let markdown = std::fs::read_to_string(base.join(&deck.path)).unwrap();
    assert!(markdown.starts_with("---\nmarp: true"));
    assert!(markdown.contains("Rust at work part 2"));
    assert!(markdown.contains("images/slide-01.png"));
    assert!(markdown.contains("State of Rust at work report"));
    assert_eq!(markdown.len() as u64, deck.bytes);

    let image = std::fs::read(base.join("images/slide-03.png")).unwrap();
    assert_eq!(image, PLACEHOLDER_PNG.to_vec());
}

#[tokio::test]
async fn test_mock_pipeline_html_without_images() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(dir.path());
    let executor = executor(
        Arc::new(InMemoryStore::new()),
        Arc::new(MockTextProvider),
        Arc::new(RejectingImages),
        &pipeline,
    );

    let state = executor
        .start(default_run_config(request("html", false), &pipeline))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    let deck = assembled(&state);
    assert_eq!(deck.path, "deck.html");

    let base = run_dir(dir.path(), &state.run_id);
    let html = std::fs::read_to_string(base.join("deck.html")).unwrap();
    assert!(html.contains("<html"));
    assert!(!html.contains("<img"));
    assert!(!base.join("images").exists());
}

#[tokio::test]
async fn test_unknown_template_is_rejected_at_start() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(dir.path());
    let text = Arc::new(CountingText {
        inner: MockTextProvider,
        calls: AtomicU32::new(0),
    });
    let executor = executor(
        Arc::new(InMemoryStore::new()),
        text.clone(),
        Arc::new(MockImageProvider),
        &pipeline,
    );

    let result = executor
        .start(default_run_config(request("keynote", true), &pipeline))
        .await;
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(text.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_run_resumes_from_sqlite_after_restart() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir.path().join("output"));
    let database = DatabaseConfig {
        db_type: DatabaseType::Sqlite,
        sqlite_path: Some(dir.path().join("db").join("deckflow.db")),
        max_connections: 2,
    };
    let text = Arc::new(CountingText {
        inner: MockTextProvider,
        calls: AtomicU32::new(0),
    });

    let run_id = {
        let store = create_store(&database).await.unwrap();
        let first = executor(store, text.clone(), Arc::new(RejectingImages), &pipeline);
        let handle = first
            .start(default_run_config(request("marp", true), &pipeline))
            .await
            .unwrap();
        let run_id = handle.run_id();
        assert!(matches!(handle.wait().await, Err(Error::Validation(_))));

        let failed = first.status(run_id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.last_error.as_ref().unwrap().step, names::GRAPHICS);
        assert_eq!(failed.completed.len(), 5);
        run_id
    };
    // research, outline and one draft call per slide
    assert_eq!(text.calls.load(Ordering::SeqCst), 5);

    let store = create_store(&database).await.unwrap();
    let second = executor(store, text.clone(), Arc::new(MockImageProvider), &pipeline);
    let state = second.resume(run_id).await.unwrap().wait().await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.attempt, 2);
    assert_eq!(text.calls.load(Ordering::SeqCst), 5);
    let deck = assembled(&state);
    assert!(run_dir(&pipeline.output_dir, &run_id).join(deck.path).exists());

    let runs = second.list(10, 0).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].attempt, 2);
}

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
    let url = format!("sqlite://{}", dir.path().join("checkpoints.db").display());
    let store = SqliteStore::new(&url, 2).await.unwrap();
    store.init().await.unwrap();
    store
}

fn running_state() -> WorkflowState {
    let mut state = WorkflowState::new(
        RunId::new(),
        DeckRequest::new("Locks"),
        deckflow::pipeline::default_steps(&Default::default()),
    );
    state.mark_running().unwrap();
    state
}

#[tokio::test]
async fn test_sqlite_lock_guards_checkpoints() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    let mut state = running_state();
    let run_id = state.run_id;

    assert!(matches!(store.load(&run_id).await, Err(Error::NotFound(_))));

    let lock = store.lock(&run_id).await.unwrap();
    assert!(matches!(store.lock(&run_id).await, Err(Error::AlreadyRunning(_))));
    store.save(&lock, &state).await.unwrap();

    state
        .record_step(names::RESEARCH, serde_json::json!({ "summary": "s" }))
        .unwrap();
    store.save(&lock, &state).await.unwrap();
    assert_eq!(store.load(&run_id).await.unwrap(), state);

    assert!(store.break_lock(&run_id).await.unwrap());
    assert!(!store.break_lock(&run_id).await.unwrap());
    assert!(matches!(store.save(&lock, &state).await, Err(Error::LockLost(_))));

    // a stale unlock must not release somebody else's lock
    let current = store.lock(&run_id).await.unwrap();
    store.unlock(lock).await.unwrap();
    assert!(matches!(store.lock(&run_id).await, Err(Error::AlreadyRunning(_))));
    store.unlock(current).await.unwrap();

    let summaries = store.list_runs(10, 0).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].run_id, run_id);
    assert_eq!(summaries[0].current_step, 1);
    assert_eq!(summaries[0].total_steps, 8);
    assert_eq!(summaries[0].topic, "Locks");
}

#[tokio::test]
async fn test_sqlite_runs_do_not_contend() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(sqlite_store(&dir).await);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let state = running_state();
                let lock = store.lock(&state.run_id).await?;
                store.save(&lock, &state).await?;
                store.unlock(lock).await?;
                Ok::<_, Error>(state.run_id)
            })
        })
        .collect();

    for task in tasks {
        let run_id = task.await.unwrap().unwrap();
        assert_eq!(store.load(&run_id).await.unwrap().run_id, run_id);
    }
    assert_eq!(store.list_runs(10, 0).await.unwrap().len(), 4);
}
