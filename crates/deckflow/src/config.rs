use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    providers::{ImageConfig, LLMConfig},
    skills::{ImageLimits, QualityThresholds},
    store::{DatabaseConfig, DatabaseType},
    workflow::RetryPolicy,
    Error, Result,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub image: ImageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Knobs of the default deck pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    /// Upper bound on concurrent API calls within one step.
    pub max_parallel_requests: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    #[serde(default)]
    pub quality: QualityThresholds,
    #[serde(default)]
    pub image_limits: ImageLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            max_parallel_requests: 4,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            quality: QualityThresholds::default(),
            image_limits: ImageLimits::default(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.initial_backoff_ms))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {:?} ({})", key, raw, e))),
        None => Ok(None),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source, falling back to
    /// defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let db_type = match lookup("DECKFLOW_DATABASE_TYPE")
            .unwrap_or_else(|| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => DatabaseType::Sqlite,
            "memory" => DatabaseType::Memory,
            other => {
                return Err(Error::Config(format!("Unsupported database type: {}", other)));
            }
        };

        let config = Config {
            database: DatabaseConfig {
                db_type,
                sqlite_path: lookup("DECKFLOW_SQLITE_PATH")
                    .map(PathBuf::from)
                    .or(defaults.database.sqlite_path),
                max_connections: parse_var(&lookup, "DECKFLOW_DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(defaults.database.max_connections),
            },
            llm: LLMConfig {
                provider: lookup("LLM_PROVIDER")
                    .map(|p| p.to_lowercase())
                    .unwrap_or(defaults.llm.provider),
                endpoint: lookup("LLM_ENDPOINT"),
                model: lookup("LLM_MODEL").unwrap_or(defaults.llm.model),
                api_key: lookup("LLM_API_KEY"),
                temperature: parse_var(&lookup, "LLM_TEMPERATURE")?.or(defaults.llm.temperature),
                max_tokens: parse_var(&lookup, "LLM_MAX_TOKENS")?.or(defaults.llm.max_tokens),
                timeout_seconds: parse_var(&lookup, "LLM_TIMEOUT_SECONDS")?
                    .or(defaults.llm.timeout_seconds),
            },
            image: ImageConfig {
                provider: lookup("IMAGE_PROVIDER")
                    .map(|p| p.to_lowercase())
                    .unwrap_or(defaults.image.provider),
                endpoint: lookup("IMAGE_ENDPOINT"),
                model: lookup("IMAGE_MODEL").unwrap_or(defaults.image.model),
                api_key: lookup("IMAGE_API_KEY"),
                size: lookup("IMAGE_SIZE").unwrap_or(defaults.image.size),
                timeout_seconds: parse_var(&lookup, "IMAGE_TIMEOUT_SECONDS")?
                    .or(defaults.image.timeout_seconds),
            },
            pipeline: PipelineConfig {
                output_dir: lookup("DECKFLOW_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.pipeline.output_dir),
                max_parallel_requests: parse_var(&lookup, "DECKFLOW_MAX_PARALLEL_REQUESTS")?
                    .unwrap_or(defaults.pipeline.max_parallel_requests),
                max_attempts: parse_var(&lookup, "DECKFLOW_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.pipeline.max_attempts),
                initial_backoff_ms: parse_var(&lookup, "DECKFLOW_INITIAL_BACKOFF_MS")?
                    .unwrap_or(defaults.pipeline.initial_backoff_ms),
                quality: QualityThresholds {
                    min_score: parse_var(&lookup, "DECKFLOW_QUALITY_MIN_SCORE")?
                        .unwrap_or(defaults.pipeline.quality.min_score),
                    ..defaults.pipeline.quality
                },
                image_limits: defaults.pipeline.image_limits,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().map_err(Error::Config)?;

        if self.llm.api_key.as_deref().map_or(true, str::is_empty) && self.llm.provider != "mock" {
            tracing::warn!("LLM_API_KEY is not set; falling back to the provider's own environment variable");
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Config(format!("LLM_TEMPERATURE must be within 0..=2, got {}", t)));
            }
        }
        if self.pipeline.max_parallel_requests == 0 {
            return Err(Error::Config("DECKFLOW_MAX_PARALLEL_REQUESTS must be at least 1".to_string()));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(Error::Config("DECKFLOW_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        let min_score = self.pipeline.quality.min_score;
        if !(0.0..=100.0).contains(&min_score) {
            return Err(Error::Config(format!(
                "DECKFLOW_QUALITY_MIN_SCORE must be within 0..=100, got {}",
                min_score
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LLMConfig::default(),
            image: ImageConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}
