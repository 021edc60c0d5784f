use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::response::strip_code_fence;
use super::{names, DraftDocument, Outline, OutlineSlide, Skill, SkillInput};
use crate::{
    prompts,
    providers::{GenerationOptions, TextGenerator},
    skills::DeckRequest,
    Result,
};

pub const SLIDE_SEPARATOR: &str = "\n\n---\n\n";

/// Drafts every outlined slide, several at a time, and joins them into one
/// Markdown document.
pub struct DraftSkill {
    text: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    max_parallel: usize,
}

impl DraftSkill {
    pub fn new(text: Arc<dyn TextGenerator>, options: GenerationOptions, max_parallel: usize) -> Self {
        Self {
            text,
            options,
            max_parallel: max_parallel.max(1),
        }
    }

    async fn draft_slide(
        &self,
        request: &DeckRequest,
        outline: &Outline,
        index: usize,
        slide: &OutlineSlide,
    ) -> Result<String> {
        let prompt = prompts::render_prompt(
            prompts::DRAFT_SLIDE,
            &json!({
                "deck_title": outline.title,
                "index": index,
                "total": outline.slides.len(),
                "title": slide.title,
                "objective": slide.objective,
                "key_points": slide.key_points,
                "audience": request.audience,
                "tone": request.tone,
            }),
        )?;

        debug!("Drafting slide {}: {}", index, slide.title);
        let reply = self.text.generate_text(&prompt, &self.options).await?;
        Ok(normalize_slide(&slide.title, &reply))
    }
}

/// Make a drafted slide safe to concatenate: it must open with its own title
/// and must not contain separator lines of its own.
fn normalize_slide(title: &str, reply: &str) -> String {
    let body: Vec<&str> = strip_code_fence(reply)
        .lines()
        .filter(|line| line.trim() != "---")
        .collect();
    let body = body.join("\n");
    let body = body.trim();

    if body.starts_with("# ") {
        body.to_string()
    } else if body.is_empty() {
        format!("# {}", title)
    } else {
        format!("# {}\n\n{}", title, body)
    }
}

#[async_trait]
impl Skill for DraftSkill {
    fn name(&self) -> &str {
        names::DRAFT
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::OUTLINE]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let outline: Outline = input.output(names::OUTLINE)?;

        let pending: Vec<_> = outline
            .slides
            .iter()
            .enumerate()
            .map(|(i, slide)| self.draft_slide(input.request, &outline, i + 1, slide))
            .collect();
        // buffered() keeps slide order while up to max_parallel calls are in flight
        let sections: Vec<String> = stream::iter(pending)
            .buffered(self.max_parallel)
            .try_collect()
            .await?;

        info!("Drafted {} slides for run {}", sections.len(), input.run_id);
        let draft = DraftDocument {
            title: outline.title.clone(),
            subtitle: outline.subtitle.clone(),
            markdown: sections.join(SLIDE_SEPARATOR),
        };
        Ok(serde_json::to_value(draft)?)
    }
}
