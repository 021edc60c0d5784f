use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{names, run_dir, GraphicsManifest, ImageFormat, ImageSpec, Outline, Skill, SkillInput};
use crate::{
    prompts,
    providers::{GenerationOptions, ImageGenerator, ImageRequest},
    Error, Result,
};

pub const IMAGES_DIR: &str = "images";

/// Generates one graphic per outlined slide that asks for a visual.
pub struct GraphicsSkill {
    image: Arc<dyn ImageGenerator>,
    options: GenerationOptions,
    size: String,
    output_dir: PathBuf,
    max_parallel: usize,
}

impl GraphicsSkill {
    pub fn new(
        image: Arc<dyn ImageGenerator>,
        options: GenerationOptions,
        size: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        max_parallel: usize,
    ) -> Self {
        Self {
            image,
            options,
            size: size.into(),
            output_dir: output_dir.into(),
            max_parallel: max_parallel.max(1),
        }
    }

    async fn render(&self, base: &Path, slide_index: usize, prompt: String) -> Result<ImageSpec> {
        let request = ImageRequest {
            prompt,
            size: self.size.clone(),
        };
        let bytes = self.image.generate_image(&request, &self.options).await?;
        let format = ImageFormat::detect(&bytes).ok_or_else(|| {
            Error::MalformedResponse(format!(
                "Image for slide {} is not a recognised image format",
                slide_index
            ))
        })?;

        let path = format!("{}/slide-{:02}.{}", IMAGES_DIR, slide_index, format.extension());
        tokio::fs::write(base.join(&path), &bytes).await?;
        debug!("Wrote {} ({} bytes)", path, bytes.len());

        Ok(ImageSpec {
            slide_index,
            prompt: request.prompt,
            path,
            format,
            bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })
    }
}

#[async_trait]
impl Skill for GraphicsSkill {
    fn name(&self) -> &str {
        names::GRAPHICS
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::OUTLINE]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let request = input.request;
        if !request.include_images {
            info!("Images disabled for run {}", input.run_id);
            return Ok(serde_json::to_value(GraphicsManifest::default())?);
        }

        let outline: Outline = input.output(names::OUTLINE)?;
        let mut prompts_by_slide = Vec::new();
        for (i, slide) in outline.slides.iter().enumerate() {
            let Some(visual) = slide.visual.as_deref() else {
                continue;
            };
            let prompt = prompts::render_prompt(
                prompts::IMAGE,
                &json!({ "title": slide.title, "topic": request.topic, "visual": visual }),
            )?;
            prompts_by_slide.push((i + 1, prompt));
        }

        let base = run_dir(&self.output_dir, input.run_id);
        tokio::fs::create_dir_all(base.join(IMAGES_DIR)).await?;

        let mut images: Vec<ImageSpec> = stream::iter(prompts_by_slide)
            .map(|(index, prompt)| self.render(&base, index, prompt))
            .buffer_unordered(self.max_parallel)
            .try_collect()
            .await?;
        images.sort_by_key(|image| image.slide_index);

        info!("Generated {} images for run {}", images.len(), input.run_id);
        Ok(serde_json::to_value(GraphicsManifest { images })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::image::{MockImageGenerator, PLACEHOLDER_PNG};
    use crate::providers::MockImageProvider;
    use crate::skills::DeckRequest;
    use crate::workflow::RunId;
    use std::collections::BTreeMap;

    fn outline() -> Value {
        json!({
            "title": "Rust",
            "slides": [
                {"title": "Intro"},
                {"title": "Ownership", "visual": "A crab holding a key"},
                {"title": "Borrowing"},
                {"title": "Ecosystem", "visual": "Crates as shipping containers"}
            ]
        })
    }

    #[tokio::test]
    async fn test_graphics_writes_images_for_visual_slides() {
        let dir = tempfile::tempdir().unwrap();
        let skill = GraphicsSkill::new(
            Arc::new(MockImageProvider),
            GenerationOptions::default(),
            "1024x1024",
            dir.path(),
            4,
        );

        let run_id = RunId::new();
        let request = DeckRequest::new("Rust");
        let outline = outline();
        let mut outputs = BTreeMap::new();
        outputs.insert(names::OUTLINE, &outline);
        let input = SkillInput::new(&run_id, &request, outputs);

        let manifest: GraphicsManifest = serde_json::from_value(skill.run(&input).await.unwrap()).unwrap();
        let indices: Vec<usize> = manifest.images.iter().map(|i| i.slide_index).collect();
        assert_eq!(indices, vec![2, 4]);

        let first = &manifest.images[0];
        assert_eq!(first.path, "images/slide-02.png");
        assert_eq!(first.format, ImageFormat::Png);
        assert_eq!(first.bytes, PLACEHOLDER_PNG.len() as u64);
        assert_eq!(first.sha256, format!("{:x}", Sha256::digest(PLACEHOLDER_PNG)));
        assert!(first.prompt.contains("A crab holding a key"));

        let written = std::fs::read(dir.path().join(run_id.to_string()).join(&first.path)).unwrap();
        assert_eq!(written, PLACEHOLDER_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_graphics_skipped_when_images_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = MockImageGenerator::new();
        image.expect_generate_image().never();
        let skill = GraphicsSkill::new(Arc::new(image), GenerationOptions::default(), "1024x1024", dir.path(), 2);

        let run_id = RunId::new();
        let mut request = DeckRequest::new("Rust");
        request.include_images = false;
        let input = SkillInput::new(&run_id, &request, BTreeMap::new());

        let manifest: GraphicsManifest = serde_json::from_value(skill.run(&input).await.unwrap()).unwrap();
        assert!(manifest.images.is_empty());
    }

    #[tokio::test]
    async fn test_graphics_rejects_unknown_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = MockImageGenerator::new();
        image
            .expect_generate_image()
            .returning(|_, _| Ok(b"<html>error page</html>".to_vec()));
        let skill = GraphicsSkill::new(Arc::new(image), GenerationOptions::default(), "1024x1024", dir.path(), 2);

        let run_id = RunId::new();
        let request = DeckRequest::new("Rust");
        let outline = outline();
        let mut outputs = BTreeMap::new();
        outputs.insert(names::OUTLINE, &outline);
        let input = SkillInput::new(&run_id, &request, outputs);

        assert!(matches!(skill.run(&input).await, Err(Error::MalformedResponse(_))));
    }
}
