//! Wiring of the default deck pipeline.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::{
    config::{Config, PipelineConfig},
    deck::TemplateAssembler,
    providers::{create_image_provider, create_text_provider, ImageConfig, ImageGenerator, LLMConfig, TextGenerator},
    skills::{
        names, AssembleSkill, DeckRequest, DraftSkill, GraphicsCheckSkill, GraphicsSkill,
        MarkdownSkill, OutlineSkill, QualitySkill, ResearchSkill, SkillRegistry,
    },
    store::create_store,
    workflow::{RetryPolicy, RunConfig, StepConfig, StepExecutor, WorkflowExecutor},
    Result,
};

/// The standard eight-step plan.
///
/// Graphics only need the outline, so they run after quality has passed but
/// do not depend on the drafted text. Assembly uses research citations and
/// validated images when present.
pub fn default_steps(retry: &RetryPolicy) -> Vec<StepConfig> {
    let step = |name: &str, deps: &[&str]| {
        StepConfig::new(name)
            .with_dependencies(deps.iter().copied())
            .with_retry(retry.clone())
    };
    vec![
        step(names::RESEARCH, &[]),
        step(names::OUTLINE, &[names::RESEARCH]),
        step(names::DRAFT, &[names::OUTLINE]),
        step(names::PARSE, &[names::DRAFT]),
        step(names::QUALITY, &[names::PARSE]),
        step(names::GRAPHICS, &[names::OUTLINE]),
        step(names::GRAPHICS_CHECK, &[names::GRAPHICS]),
        step(
            names::ASSEMBLE,
            &[names::PARSE, names::RESEARCH, names::GRAPHICS_CHECK],
        ),
    ]
}

pub fn default_run_config(request: DeckRequest, pipeline: &PipelineConfig) -> RunConfig {
    RunConfig::new(request, default_steps(&pipeline.retry_policy()))
}

/// Register every builtin skill against the given providers.
pub fn build_registry(
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    llm: &LLMConfig,
    image_config: &ImageConfig,
    pipeline: &PipelineConfig,
) -> SkillRegistry {
    let text_options = llm.options();
    let output_dir: &Path = &pipeline.output_dir;
    let parallel = pipeline.max_parallel_requests;

    SkillRegistry::new()
        .with(Arc::new(ResearchSkill::new(text.clone(), text_options.clone())))
        .with(Arc::new(OutlineSkill::new(text.clone(), text_options.clone())))
        .with(Arc::new(DraftSkill::new(text, text_options, parallel)))
        .with(Arc::new(MarkdownSkill))
        .with(Arc::new(QualitySkill::new(pipeline.quality.clone())))
        .with(Arc::new(GraphicsSkill::new(
            image,
            image_config.options(),
            image_config.size.clone(),
            output_dir,
            parallel,
        )))
        .with(Arc::new(GraphicsCheckSkill::new(
            output_dir,
            pipeline.image_limits.clone(),
        )))
        .with(Arc::new(AssembleSkill::new(
            Arc::new(TemplateAssembler::new()),
            output_dir,
        )))
}

/// Build the store, providers and executor described by `config`.
pub async fn build_executor(config: &Config) -> Result<WorkflowExecutor> {
    let store = create_store(&config.database).await?;
    let text = create_text_provider(&config.llm)?;
    let image = create_image_provider(&config.image)?;
    info!(
        "Using LLM provider {} ({}) and image provider {} ({})",
        config.llm.provider, config.llm.model, config.image.provider, config.image.model
    );

    let registry = build_registry(text, image, &config.llm, &config.image, &config.pipeline);
    Ok(WorkflowExecutor::new(store, StepExecutor::new(registry)))
}
