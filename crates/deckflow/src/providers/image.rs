//! Image generation over the OpenAI Images HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GenerationOptions;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub size: String,
    pub timeout_seconds: Option<u64>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            endpoint: None,
            model: "dall-e-3".to_string(),
            api_key: None,
            size: "1792x1024".to_string(),
            timeout_seconds: Some(180),
        }
    }
}

impl ImageConfig {
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_seconds.unwrap_or(180)),
            ..GenerationOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image and return its encoded bytes.
    async fn generate_image(&self, request: &ImageRequest, options: &GenerationOptions) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u8,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

pub struct OpenAIImageProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAIImageProvider {
    pub fn new(api_key: &str, endpoint: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: endpoint
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn download(&self, url: &str, options: &GenerationOptions) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Provider(format!("Image request timed out: {}", e))
    } else if e.is_decode() {
        Error::MalformedResponse(format!("Image API response could not be decoded: {}", e))
    } else {
        Error::Provider(format!("Image request failed: {}", e))
    }
}

/// Rate limits and server faults are retryable; other rejections are not.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("Image API returned {}: {}", status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(Error::RateLimit(message))
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Err(Error::Provider(message))
    } else {
        Err(Error::Validation(message))
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageProvider {
    async fn generate_image(&self, request: &ImageRequest, options: &GenerationOptions) -> Result<Vec<u8>> {
        debug!("Generating image with model {} ({})", options.model, request.size);

        let body = GenerationBody {
            model: &options.model,
            prompt: &request.prompt,
            size: &request.size,
            n: 1,
            response_format: "url",
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let parsed: GenerationResponse = response.json().await.map_err(transport_error)?;

        let url = parsed
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| Error::MalformedResponse("Image API returned no image URL".to_string()))?;

        self.download(&url, options).await
    }
}

/// 1x1 transparent PNG.
pub const PLACEHOLDER_PNG: [u8; 67] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Mock provider for testing
pub struct MockImageProvider;

#[async_trait]
impl ImageGenerator for MockImageProvider {
    async fn generate_image(&self, _request: &ImageRequest, _options: &GenerationOptions) -> Result<Vec<u8>> {
        Ok(PLACEHOLDER_PNG.to_vec())
    }
}

pub fn create_image_provider(config: &ImageConfig) -> Result<Arc<dyn ImageGenerator>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .filter(|key| !key.is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| {
                    Error::Config("No API key for image provider; set IMAGE_API_KEY or OPENAI_API_KEY".to_string())
                })?;
            Ok(Arc::new(OpenAIImageProvider::new(&key, config.endpoint.as_deref())))
        }
        "mock" => Ok(Arc::new(MockImageProvider)),
        other => Err(Error::Config(format!("Unsupported image provider: {}", other))),
    }
}
