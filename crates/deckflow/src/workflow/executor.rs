use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    metrics::{STEPS_COMPLETED, STEP_DURATION, STEP_RETRIES},
    skills::{SkillInput, SkillRegistry},
    workflow::StepConfig,
    Error,
};

#[derive(Debug, Clone)]
pub struct StepResult {
    pub output: Value,
    pub attempts: u32,
}

/// A step that could not produce an output, with the number of attempts made.
#[derive(Debug, thiserror::Error)]
#[error("Step {step} failed after {attempts} attempt(s): {source}")]
pub struct StepError {
    pub step: String,
    #[source]
    pub source: Error,
    pub attempts: u32,
}

/// Runs a single step's skill under the step's retry policy.
pub struct StepExecutor {
    registry: SkillRegistry,
}

impl StepExecutor {
    pub fn new(registry: SkillRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Invoke the skill bound to `step`. Transient errors are retried with
    /// backoff until the policy's attempts run out; anything else fails on
    /// the spot.
    pub async fn execute_step(
        &self,
        step: &StepConfig,
        input: &SkillInput<'_>,
    ) -> std::result::Result<StepResult, StepError> {
        let skill = self.registry.get(&step.name).ok_or_else(|| StepError {
            step: step.name.clone(),
            source: Error::Config(format!("No skill registered for step {}", step.name)),
            attempts: 0,
        })?;

        info!("Executing step {} for run {}", step.name, input.run_id);
        let _timer = STEP_DURATION.with_label_values(&[&step.name]).start_timer();
        let max_attempts = step.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match skill.run(input).await {
                Ok(output) => {
                    info!("Step {} succeeded on attempt {}", step.name, attempt);
                    STEPS_COMPLETED.with_label_values(&[&step.name, "success"]).inc();
                    return Ok(StepResult {
                        output,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = step.retry.backoff(attempt);
                    warn!(
                        "Step {} attempt {}/{} failed: {}; retrying in {:?}",
                        step.name, attempt, max_attempts, e, delay
                    );
                    STEP_RETRIES.with_label_values(&[&step.name, e.kind()]).inc();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Step {} failed on attempt {}: {}", step.name, attempt, e);
                    STEPS_COMPLETED.with_label_values(&[&step.name, "failure"]).inc();
                    return Err(StepError {
                        step: step.name.clone(),
                        source: e,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
