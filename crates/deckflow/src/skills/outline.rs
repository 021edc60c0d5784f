use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{extract_json, names, Outline, ResearchBrief, Skill, SkillInput};
use crate::{
    prompts,
    providers::{GenerationOptions, TextGenerator},
    Error, Result,
};

/// Turns the research brief into a slide-by-slide outline.
pub struct OutlineSkill {
    text: Arc<dyn TextGenerator>,
    options: GenerationOptions,
}

impl OutlineSkill {
    pub fn new(text: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self { text, options }
    }
}

#[async_trait]
impl Skill for OutlineSkill {
    fn name(&self) -> &str {
        names::OUTLINE
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::RESEARCH]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let request = input.request;
        let research: ResearchBrief = input.output(names::RESEARCH)?;

        let prompt = prompts::render_prompt(
            prompts::OUTLINE,
            &json!({
                "topic": request.topic,
                "slide_count": request.slide_count,
                "audience": request.audience,
                "tone": request.tone,
                "summary": research.summary,
                "key_points": research.key_points,
            }),
        )?;

        let reply = self.text.generate_text(&prompt, &self.options).await?;
        let mut outline: Outline = extract_json(&reply)?;

        outline.slides.retain(|slide| !slide.title.trim().is_empty());
        if outline.slides.is_empty() {
            return Err(Error::MalformedResponse("Outline contains no slides".to_string()));
        }
        if outline.title.trim().is_empty() {
            outline.title = request.topic.clone();
        }
        for slide in &mut outline.slides {
            if slide.visual.as_deref().map_or(false, |v| v.trim().is_empty()) {
                slide.visual = None;
            }
        }
        if outline.slides.len() > request.slide_count {
            warn!(
                "Outline returned {} slides, truncating to {}",
                outline.slides.len(),
                request.slide_count
            );
            outline.slides.truncate(request.slide_count);
        } else if outline.slides.len() < request.slide_count {
            warn!(
                "Outline returned {} slides, {} were requested",
                outline.slides.len(),
                request.slide_count
            );
        }

        info!("Outline for run {}: {} slides", input.run_id, outline.slides.len());
        Ok(serde_json::to_value(outline)?)
    }
}
