use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramVec, IntCounterVec, Registry, TextEncoder,
};

use crate::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref STEPS_COMPLETED: IntCounterVec = register_int_counter_vec_with_registry!(
        "deckflow_steps_completed_total",
        "Steps that finished, by step and outcome.",
        &["step", "outcome"],
        REGISTRY
    )
    .expect("steps_completed metric registers");
    pub static ref STEP_RETRIES: IntCounterVec = register_int_counter_vec_with_registry!(
        "deckflow_step_retries_total",
        "Retries of transiently failed steps.",
        &["step", "kind"],
        REGISTRY
    )
    .expect("step_retries metric registers");
    pub static ref RUNS_FINISHED: IntCounterVec = register_int_counter_vec_with_registry!(
        "deckflow_runs_finished_total",
        "Run executions that stopped, by final status.",
        &["status"],
        REGISTRY
    )
    .expect("runs_finished metric registers");
    pub static ref STEP_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        "deckflow_step_duration_seconds",
        "Wall time of a step including retries.",
        &["step"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0],
        REGISTRY
    )
    .expect("step_duration metric registers");
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}
