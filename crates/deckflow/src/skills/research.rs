use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{extract_json, names, Citation, ResearchBrief, Skill, SkillInput};
use crate::{
    prompts,
    providers::{GenerationOptions, TextGenerator},
    Error, Result,
};

/// Asks the LLM for a research brief on the requested topic.
pub struct ResearchSkill {
    text: Arc<dyn TextGenerator>,
    options: GenerationOptions,
}

impl ResearchSkill {
    pub fn new(text: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self { text, options }
    }
}

fn usable_citation(citation: &Citation) -> bool {
    !citation.title.trim().is_empty()
        && citation
            .url
            .as_deref()
            .map_or(true, |url| url.starts_with("https://") || url.starts_with("http://"))
}

#[async_trait]
impl Skill for ResearchSkill {
    fn name(&self) -> &str {
        names::RESEARCH
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let request = input.request;
        let prompt = prompts::render_prompt(
            prompts::RESEARCH,
            &json!({ "topic": request.topic, "audience": request.audience }),
        )?;

        let reply = self.text.generate_text(&prompt, &self.options).await?;
        let mut brief: ResearchBrief = extract_json(&reply)?;

        if brief.summary.trim().is_empty() {
            return Err(Error::MalformedResponse("Research brief has no summary".to_string()));
        }
        brief.key_points.retain(|point| !point.trim().is_empty());
        brief.citations.retain(usable_citation);

        info!(
            "Research for run {} produced {} key points and {} citations",
            input.run_id,
            brief.key_points.len(),
            brief.citations.len()
        );
        Ok(serde_json::to_value(brief)?)
    }
}
