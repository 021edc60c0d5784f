use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{skills::DeckRequest, workflow::StepConfig, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Invalid run status: {}", s))),
        }
    }
}

/// Diagnostic context for the step that failed a run. The failing payload is
/// deliberately not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub kind: String,
    pub message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl StepFailure {
    pub fn new(step: &str, error: &Error, attempts: u32) -> Self {
        Self {
            step: step.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// The aggregate threaded through a run and persisted as its checkpoint.
///
/// `outputs` always holds exactly the steps listed in `completed`, which in
/// turn are exactly `steps[..current_step]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub request: DeckRequest,
    pub steps: Vec<StepConfig>,
    pub completed: Vec<String>,
    pub outputs: BTreeMap<String, Value>,
    pub current_step: usize,
    pub status: RunStatus,
    pub attempt: u32,
    pub last_error: Option<StepFailure>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(run_id: RunId, request: DeckRequest, steps: Vec<StepConfig>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            request,
            steps,
            completed: Vec::new(),
            outputs: BTreeMap::new(),
            current_step: 0,
            status: RunStatus::Pending,
            attempt: 1,
            last_error: None,
            cancellation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn next_step(&self) -> Option<&StepConfig> {
        self.steps.get(self.current_step)
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn output(&self, step: &str) -> Option<&Value> {
        self.outputs.get(step)
    }

    /// Begin (or continue) executing steps.
    ///
    /// A failed run is reopened as a new attempt; a `running` checkpoint left
    /// behind by a crashed process is taken over as-is.
    pub fn mark_running(&mut self) -> Result<()> {
        match self.status {
            RunStatus::Pending | RunStatus::Running => {}
            RunStatus::Failed => {
                self.attempt += 1;
                self.last_error = None;
                self.cancellation = None;
            }
            RunStatus::Completed => {
                return Err(Error::Internal(format!(
                    "Run {} is already completed",
                    self.run_id
                )));
            }
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Merge a step's output and advance. The final step flips the run to
    /// `completed`.
    pub fn record_step(&mut self, step: &str, output: Value) -> Result<()> {
        if self.status != RunStatus::Running {
            return Err(Error::Internal(format!(
                "Cannot record step {} on a {} run",
                step, self.status
            )));
        }
        match self.next_step() {
            Some(next) if next.name == step => {}
            Some(next) => {
                return Err(Error::Internal(format!(
                    "Step {} completed out of order, expected {}",
                    step, next.name
                )));
            }
            None => {
                return Err(Error::Internal(format!(
                    "Step {} completed but the plan is exhausted",
                    step
                )));
            }
        }

        self.outputs.insert(step.to_string(), output);
        self.completed.push(step.to_string());
        self.current_step += 1;
        if self.current_step == self.steps.len() {
            self.status = RunStatus::Completed;
        }
        self.touch();
        Ok(())
    }

    pub fn mark_failed(&mut self, failure: StepFailure) -> Result<()> {
        self.ensure_not_terminal()?;
        self.status = RunStatus::Failed;
        self.last_error = Some(failure);
        self.touch();
        Ok(())
    }

    pub fn mark_cancelled(&mut self, reason: &str) -> Result<()> {
        self.ensure_not_terminal()?;
        self.status = RunStatus::Failed;
        self.cancellation = Some(Cancellation {
            reason: reason.to_string(),
            requested_at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    /// Outputs of the steps `step` declares as dependencies.
    pub fn dependency_outputs<'a>(
        &'a self,
        step: &'a StepConfig,
    ) -> Result<BTreeMap<&'a str, &'a Value>> {
        step.depends_on
            .iter()
            .map(|dep| {
                self.outputs
                    .get(dep)
                    .map(|value| (dep.as_str(), value))
                    .ok_or_else(|| {
                        Error::CorruptCheckpoint(format!(
                            "Run {}: step {} depends on {} which has no recorded output",
                            self.run_id, step.name, dep
                        ))
                    })
            })
            .collect()
    }

    /// Check that progress markers and outputs agree with the declared plan.
    pub fn verify_integrity(&self) -> Result<()> {
        let corrupt = |detail: String| {
            Err(Error::CorruptCheckpoint(format!("Run {}: {}", self.run_id, detail)))
        };

        if self.current_step > self.steps.len() {
            return corrupt(format!(
                "step index {} beyond plan of {} steps",
                self.current_step,
                self.steps.len()
            ));
        }
        let finished = self.current_step == self.steps.len();
        if (self.status == RunStatus::Completed) != finished {
            return corrupt(format!(
                "status {} at step {} of {}",
                self.status,
                self.current_step,
                self.steps.len()
            ));
        }
        if self.completed.len() != self.current_step {
            return corrupt(format!(
                "{} completed steps recorded but index is {}",
                self.completed.len(),
                self.current_step
            ));
        }
        for (declared, done) in self.steps.iter().zip(&self.completed) {
            if declared.name != *done {
                return corrupt(format!(
                    "completed step {} does not match declared step {}",
                    done, declared.name
                ));
            }
        }
        if self.outputs.len() != self.completed.len()
            || !self.completed.iter().all(|name| self.outputs.contains_key(name))
        {
            return corrupt("outputs do not match the completed steps".to_string());
        }
        if let Some(next) = self.next_step() {
            self.dependency_outputs(next)?;
        }
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Internal(format!(
                "Run {} is already {}",
                self.run_id, self.status
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
