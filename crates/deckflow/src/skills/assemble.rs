use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{
    names, run_dir, AssembledDeck, GraphicsReport, ParsedDeck, ResearchBrief, Skill, SkillInput,
};
use crate::{
    deck::{DeckAssembler, DeckDocument, DeckTemplate},
    Error, Result,
};

/// Renders the parsed deck with the requested template and writes it to the
/// run directory. Research citations and validated images are used when
/// those steps are declared as dependencies.
pub struct AssembleSkill {
    assembler: Arc<dyn DeckAssembler>,
    output_dir: PathBuf,
}

impl AssembleSkill {
    pub fn new(assembler: Arc<dyn DeckAssembler>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            assembler,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Skill for AssembleSkill {
    fn name(&self) -> &str {
        names::ASSEMBLE
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::PARSE]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let request = input.request;
        let template = DeckTemplate::builtin(&request.template).ok_or_else(|| {
            Error::Validation(format!("Unknown deck template: {}", request.template))
        })?;

        let parsed: ParsedDeck = input.output(names::PARSE)?;
        let research: Option<ResearchBrief> = input.optional_output(names::RESEARCH)?;
        let graphics: Option<GraphicsReport> = input.optional_output(names::GRAPHICS_CHECK)?;

        let images: HashMap<usize, String> = graphics
            .map(|report| {
                report
                    .valid
                    .into_iter()
                    .map(|image| (image.slide_index, image.path))
                    .collect()
            })
            .unwrap_or_default();

        let mut slides = parsed.slides;
        for slide in &mut slides {
            if let Some(path) = images.get(&slide.index) {
                slide.image = Some(path.clone());
            }
        }

        let document = DeckDocument {
            title: parsed.title,
            subtitle: parsed.subtitle,
            slides,
            citations: research.map(|brief| brief.citations).unwrap_or_default(),
        };
        let bytes = self.assembler.assemble(&document, &template)?;

        let base = run_dir(&self.output_dir, input.run_id);
        tokio::fs::create_dir_all(&base).await?;
        let file_name = template.file_name();
        tokio::fs::write(base.join(&file_name), &bytes).await?;

        info!(
            "Assembled {} slide deck for run {} at {}",
            document.slides.len(),
            input.run_id,
            base.join(&file_name).display()
        );
        Ok(serde_json::to_value(AssembledDeck {
            path: file_name,
            template: template.name,
            slide_count: document.slides.len(),
            bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })?)
    }
}
