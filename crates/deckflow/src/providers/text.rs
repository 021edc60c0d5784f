//! Text generation through Rig.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use super::GenerationOptions;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            endpoint: None,
            model: "claude-3-5-sonnet-latest".to_string(),
            api_key: None,
            temperature: Some(0.7),
            max_tokens: Some(4096),
            timeout_seconds: Some(120),
        }
    }
}

impl LLMConfig {
    pub fn options(&self) -> GenerationOptions {
        let defaults = GenerationOptions::default();
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            timeout: self
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// Map a Rig failure onto the retry taxonomy.
fn classify(provider: &str, detail: String) -> Error {
    let lower = detail.to_lowercase();
    let message = format!("{} API error: {}", provider, detail);
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        Error::RateLimit(message)
    } else {
        Error::Provider(message)
    }
}

/// Anthropic Claude provider using Rig
pub struct AnthropicProvider {
    client: anthropic::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, endpoint: Option<&str>) -> Self {
        let client = anthropic::Client::new(
            api_key,
            endpoint.unwrap_or("https://api.anthropic.com"),
            None,
            anthropic::ANTHROPIC_VERSION_LATEST,
        );
        Self { client }
    }
}

#[async_trait]
impl TextGenerator for AnthropicProvider {
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        debug!("Anthropic completion with model {}", options.model);

        let agent = self
            .client
            .agent(&options.model)
            .temperature(options.temperature as f64)
            .max_tokens(options.max_tokens as u64)
            .build();

        timeout(options.timeout, agent.prompt(prompt))
            .await
            .map_err(|_| {
                Error::Provider(format!("Anthropic request timed out after {:?}", options.timeout))
            })?
            .map_err(|e| classify("Anthropic", format!("{:?}", e)))
    }
}

/// OpenAI provider using Rig
pub struct OpenAIProvider {
    client: openai::Client,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, endpoint: Option<&str>) -> Self {
        let client = match endpoint {
            Some(url) => openai::Client::from_url(api_key, url),
            None => openai::Client::new(api_key),
        };
        Self { client }
    }
}

#[async_trait]
impl TextGenerator for OpenAIProvider {
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        debug!("OpenAI completion with model {}", options.model);

        let agent = self
            .client
            .agent(&options.model)
            .temperature(options.temperature as f64)
            .max_tokens(options.max_tokens as u64)
            .build();

        timeout(options.timeout, agent.prompt(prompt))
            .await
            .map_err(|_| {
                Error::Provider(format!("OpenAI request timed out after {:?}", options.timeout))
            })?
            .map_err(|e| classify("OpenAI", format!("{:?}", e)))
    }
}

lazy_static! {
    static ref SLIDE_COUNT: Regex = Regex::new(r"Slide count: (\d+)").expect("valid regex");
    static ref SLIDE_TITLE: Regex = Regex::new(r"Slide title: (.+)").expect("valid regex");
    static ref TOPIC: Regex = Regex::new(r"Topic: (.+)").expect("valid regex");
}

/// Deterministic provider for offline runs and tests. Answers according to the
/// `Task:` marker every prompt template carries.
pub struct MockTextProvider;

impl MockTextProvider {
    fn capture<'a>(re: &Regex, prompt: &'a str, fallback: &'a str) -> &'a str {
        re.captures(prompt)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or(fallback)
    }

    fn research(prompt: &str) -> String {
        let topic = Self::capture(&TOPIC, prompt, "the topic");
        serde_json::json!({
            "summary": format!("{} matters because it changes how teams deliver reliable software.", topic),
            "key_points": [
                format!("Why {} is gaining adoption", topic),
                "Common pitfalls and how to avoid them",
                "Measurable outcomes from early adopters"
            ],
            "citations": [
                {
                    "title": format!("State of {} report", topic),
                    "url": "https://example.org/report",
                    "publisher": "Example Research",
                    "note": "Adoption figures"
                }
            ]
        })
        .to_string()
    }

    fn outline(prompt: &str) -> String {
        let topic = Self::capture(&TOPIC, prompt, "the topic");
        let count: usize = Self::capture(&SLIDE_COUNT, prompt, "3").parse().unwrap_or(3);
        let slides: Vec<serde_json::Value> = (1..=count)
            .map(|i| {
                let visual = (i % 2 == 1).then(|| format!("Diagram for aspect {}", i));
                serde_json::json!({
                    "title": format!("{} part {}", topic, i),
                    "objective": format!("Explain aspect {} of {}", i, topic),
                    "key_points": [format!("Point {}.1", i), format!("Point {}.2", i)],
                    "visual": visual
                })
            })
            .collect();
        serde_json::json!({
            "title": topic,
            "subtitle": "An overview",
            "slides": slides
        })
        .to_string()
    }

    fn draft_slide(prompt: &str) -> String {
        let title = Self::capture(&SLIDE_TITLE, prompt, "Untitled");
        format!(
            "# {}\n\n- Key idea one for {}\n- Key idea two with a concrete example\n- Takeaway for the audience\n\nNotes: Walk through each point and pause for questions.",
            title, title
        )
    }
}

#[async_trait]
impl TextGenerator for MockTextProvider {
    async fn generate_text(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        if prompt.contains("Task: research") {
            Ok(Self::research(prompt))
        } else if prompt.contains("Task: outline") {
            Ok(Self::outline(prompt))
        } else if prompt.contains("Task: draft-slide") {
            Ok(Self::draft_slide(prompt))
        } else {
            Ok(format!(
                "Mock response for: {}",
                prompt.chars().take(50).collect::<String>()
            ))
        }
    }
}

fn api_key(config: &LLMConfig, env_var: &str) -> Result<String> {
    config
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var(env_var).ok())
        .ok_or_else(|| {
            Error::Config(format!(
                "No API key for {} provider; set LLM_API_KEY or {}",
                config.provider, env_var
            ))
        })
}

/// Create a provider from configuration
pub fn create_text_provider(config: &LLMConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => {
            let key = api_key(config, "ANTHROPIC_API_KEY")?;
            Ok(Arc::new(AnthropicProvider::new(&key, config.endpoint.as_deref())))
        }
        "openai" => {
            let key = api_key(config, "OPENAI_API_KEY")?;
            Ok(Arc::new(OpenAIProvider::new(&key, config.endpoint.as_deref())))
        }
        "mock" => Ok(Arc::new(MockTextProvider)),
        other => Err(Error::Config(format!("Unsupported LLM provider: {}", other))),
    }
}
