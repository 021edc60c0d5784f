use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{RunId, RunStatus, WorkflowState};

/// Proof of holding a run's lock. Saves made with a stale token are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    pub run_id: RunId,
    pub token: Uuid,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl RunLock {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            token: Uuid::new_v4(),
            holder: format!("pid-{}", std::process::id()),
            acquired_at: Utc::now(),
        }
    }
}

/// One line of `list_runs` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub topic: String,
    pub status: RunStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub attempt: u32,
    pub failed_step: Option<String>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowState> for RunSummary {
    fn from(state: &WorkflowState) -> Self {
        Self {
            run_id: state.run_id,
            topic: state.request.topic.clone(),
            status: state.status,
            current_step: state.current_step,
            total_steps: state.total_steps(),
            attempt: state.attempt,
            failed_step: state.last_error.as_ref().map(|f| f.step.clone()),
            cancelled: state.cancellation.is_some(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}
