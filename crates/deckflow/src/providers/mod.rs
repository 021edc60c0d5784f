//! Hosted AI API clients.
//!
//! Skills only see the [`TextGenerator`] and [`ImageGenerator`] traits; one
//! implementation exists per provider plus a deterministic mock.

pub mod image;
pub mod text;

pub use image::{
    create_image_provider, ImageConfig, ImageGenerator, ImageRequest, MockImageProvider,
    OpenAIImageProvider,
};
pub use text::{
    create_text_provider, AnthropicProvider, LLMConfig, MockTextProvider, OpenAIProvider,
    TextGenerator,
};

use std::time::Duration;

/// Per-call knobs shared by both API families.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-latest".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}
