//! Skills: the work bound to each pipeline step.
//!
//! A skill receives the run's request plus the outputs of the steps it was
//! declared to depend on, and returns its own output as JSON. Skills never
//! catch provider errors; retries are the executor's job.

pub mod assemble;
pub mod draft;
pub mod graphics;
pub mod graphics_check;
pub mod markdown;
pub mod outline;
pub mod quality;
pub mod research;
mod response;
pub mod types;

pub use assemble::AssembleSkill;
pub use draft::DraftSkill;
pub use graphics::GraphicsSkill;
pub use graphics_check::{GraphicsCheckSkill, ImageLimits};
pub use markdown::{parse_markdown, MarkdownSkill};
pub use outline::OutlineSkill;
pub use quality::{QualityReport, QualitySkill, QualityThresholds};
pub use research::ResearchSkill;
pub use response::extract_json;
pub use types::*;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{workflow::RunId, Error, Result};

/// Canonical step names of the builtin skills.
pub mod names {
    pub const RESEARCH: &str = "research";
    pub const OUTLINE: &str = "outline";
    pub const DRAFT: &str = "draft";
    pub const PARSE: &str = "parse";
    pub const QUALITY: &str = "quality";
    pub const GRAPHICS: &str = "graphics";
    pub const GRAPHICS_CHECK: &str = "graphics_check";
    pub const ASSEMBLE: &str = "assemble";
}

#[async_trait]
pub trait Skill: Send + Sync {
    /// Step name this skill is registered under.
    fn name(&self) -> &str;

    /// Steps whose outputs must be declared as dependencies.
    fn required_dependencies(&self) -> &[&'static str] {
        &[]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value>;
}

/// The slice of a run a skill is allowed to see.
#[derive(Debug, Clone)]
pub struct SkillInput<'a> {
    pub run_id: &'a RunId,
    pub request: &'a DeckRequest,
    outputs: BTreeMap<&'a str, &'a Value>,
}

impl<'a> SkillInput<'a> {
    pub fn new(
        run_id: &'a RunId,
        request: &'a DeckRequest,
        outputs: BTreeMap<&'a str, &'a Value>,
    ) -> Self {
        Self {
            run_id,
            request,
            outputs,
        }
    }

    /// Decode a dependency's output. Missing or mistyped outputs are
    /// validation failures: retrying cannot fix them.
    pub fn output<T: DeserializeOwned>(&self, step: &str) -> Result<T> {
        self.optional_output(step)?.ok_or_else(|| {
            Error::Validation(format!("Output of step {} is not available", step))
        })
    }

    pub fn optional_output<T: DeserializeOwned>(&self, step: &str) -> Result<Option<T>> {
        match self.outputs.get(step) {
            Some(value) => serde_json::from_value((*value).clone())
                .map(Some)
                .map_err(|e| {
                    Error::Validation(format!("Output of step {} has unexpected shape: {}", step, e))
                }),
            None => Ok(None),
        }
    }
}

/// Step name to skill lookup, passed explicitly to the executor.
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) -> &mut Self {
        self.skills.insert(skill.name().to_string(), skill);
        self
    }

    pub fn with(mut self, skill: Arc<dyn Skill>) -> Self {
        self.register(skill);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Directory holding a run's generated artifacts.
pub fn run_dir(output_dir: &Path, run_id: &RunId) -> PathBuf {
    output_dir.join(run_id.to_string())
}
