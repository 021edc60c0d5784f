#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deckflow::{
    skills::{DeckRequest, Skill, SkillInput, SkillRegistry},
    store::{CheckpointStore, InMemoryStore},
    workflow::{RetryPolicy, RunConfig, StepConfig, StepExecutor, WorkflowExecutor},
    Error, Result,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// Lets a test hold a skill mid-execution.
#[derive(Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

/// A skill that counts its calls, can fail a set number of times and can
/// block on a [`Gate`] once its failures are used up.
pub struct TestSkill {
    name: &'static str,
    requires: &'static [&'static str],
    calls: AtomicU32,
    failures: AtomicU32,
    error: fn() -> Error,
    gate: Option<Arc<Gate>>,
}

impl TestSkill {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            requires: &[],
            calls: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            error: || Error::Provider("upstream unavailable".to_string()),
            gate: None,
        }
    }

    pub fn requires(mut self, deps: &'static [&'static str]) -> Self {
        self.requires = deps;
        self
    }

    pub fn failing(mut self, times: u32, error: fn() -> Error) -> Self {
        self.failures = AtomicU32::new(times);
        self.error = error;
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for TestSkill {
    fn name(&self) -> &str {
        self.name
    }

    fn required_dependencies(&self) -> &[&'static str] {
        self.requires
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err((self.error)());
        }
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        Ok(json!({ "step": self.name, "call": call, "topic": input.request.topic }))
    }
}

/// Three chained steps `a -> b -> c` with immediate retries.
pub fn chain() -> Vec<StepConfig> {
    let retry = RetryPolicy::immediate(3);
    vec![
        StepConfig::new("a").with_retry(retry.clone()),
        StepConfig::new("b").with_dependencies(["a"]).with_retry(retry.clone()),
        StepConfig::new("c").with_dependencies(["b"]).with_retry(retry),
    ]
}

pub fn run_config(steps: Vec<StepConfig>) -> RunConfig {
    RunConfig::new(DeckRequest::new("Checkpointing"), steps)
}

pub fn executor_with(
    store: Arc<dyn CheckpointStore>,
    skills: &[Arc<TestSkill>],
) -> WorkflowExecutor {
    let registry = skills
        .iter()
        .fold(SkillRegistry::new(), |registry, skill| registry.with(skill.clone()));
    WorkflowExecutor::new(store, StepExecutor::new(registry))
}

pub fn memory_executor(skills: &[Arc<TestSkill>]) -> WorkflowExecutor {
    executor_with(Arc::new(InMemoryStore::new()), skills)
}
