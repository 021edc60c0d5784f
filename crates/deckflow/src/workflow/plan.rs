use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    skills::{DeckRequest, SkillRegistry},
    Error, Result,
};

/// Bounded retries with exponential backoff, applied to transient errors only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Retry immediately; used where waiting buys nothing (tests, local skills).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before the attempt following `failed_attempt` (1-based).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }
}

/// One declared step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl StepConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Everything needed to start a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub request: DeckRequest,
    /// Empty means "use the default pipeline" to callers that have one.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl RunConfig {
    pub fn new(request: DeckRequest, steps: Vec<StepConfig>) -> Self {
        Self { request, steps }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

/// Reject step graphs the executor cannot honour.
///
/// Every step must have a registered skill, names must be unique, each
/// dependency must be declared earlier in the order, and each skill's
/// required inputs must be among the step's declared dependencies.
pub fn validate_plan(steps: &[StepConfig], registry: &SkillRegistry) -> Result<()> {
    if steps.is_empty() {
        return Err(Error::Config("Run declares no steps".to_string()));
    }

    let all_names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for step in steps {
        let skill = registry
            .get(&step.name)
            .ok_or_else(|| Error::Config(format!("Unknown step: {}", step.name)))?;

        if step.retry.max_attempts == 0 {
            return Err(Error::Config(format!(
                "Step {} must allow at least one attempt",
                step.name
            )));
        }

        for dep in &step.depends_on {
            if dep == &step.name {
                return Err(Error::Config(format!("Step {} depends on itself", step.name)));
            }
            if !seen.contains(dep.as_str()) {
                let reason = if all_names.contains(dep.as_str()) {
                    "which is declared after it"
                } else {
                    "which is not declared"
                };
                return Err(Error::Config(format!(
                    "Step {} depends on {} {}",
                    step.name, dep, reason
                )));
            }
        }

        for required in skill.required_dependencies() {
            if !step.depends_on.iter().any(|dep| dep == required) {
                return Err(Error::Config(format!(
                    "Step {} requires the output of {} but does not declare it",
                    step.name, required
                )));
            }
        }

        if !seen.insert(step.name.as_str()) {
            return Err(Error::Config(format!("Duplicate step: {}", step.name)));
        }
    }

    Ok(())
}
