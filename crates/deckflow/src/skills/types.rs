//! Value types exchanged between pipeline steps.
//!
//! Each type is produced by exactly one step and stored, serialized, under that
//! step's name in the run's output mapping.

use serde::{Deserialize, Serialize};

use crate::{deck::DeckTemplate, Error, Result};

pub const MAX_SLIDES: usize = 40;

/// What the user asked for; fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckRequest {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_slide_count")]
    pub slide_count: usize,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_include_images")]
    pub include_images: bool,
}

fn default_slide_count() -> usize {
    8
}

fn default_template() -> String {
    "marp".to_string()
}

fn default_include_images() -> bool {
    true
}

impl DeckRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            audience: None,
            slide_count: default_slide_count(),
            tone: None,
            template: default_template(),
            include_images: default_include_images(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Config("Deck topic must not be empty".to_string()));
        }
        if self.slide_count == 0 || self.slide_count > MAX_SLIDES {
            return Err(Error::Config(format!(
                "Slide count must be between 1 and {}, got {}",
                MAX_SLIDES, self.slide_count
            )));
        }
        if DeckTemplate::builtin(&self.template).is_none() {
            return Err(Error::Config(format!("Unknown deck template: {}", self.template)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Output of the `research` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSlide {
    pub title: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Description of the graphic wanted for this slide, if any.
    #[serde(default)]
    pub visual: Option<String>,
}

/// Output of the `outline` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub slides: Vec<OutlineSlide>,
}

/// Output of the `draft` step: the whole deck as Markdown, one `---` separated
/// section per slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftDocument {
    pub title: String,
    pub subtitle: Option<String>,
    pub markdown: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    /// 1-based position in the deck, excluding the title slide.
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Image path relative to the run directory.
    #[serde(default)]
    pub image: Option<String>,
}

/// Output of the `parse` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDeck {
    pub title: String,
    pub subtitle: Option<String>,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Sniff the format from the leading magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }
}

/// A generated graphic written to the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub slide_index: usize,
    pub prompt: String,
    pub path: String,
    pub format: ImageFormat,
    pub bytes: u64,
    pub sha256: String,
}

/// Output of the `graphics` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphicsManifest {
    pub images: Vec<ImageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedImage {
    pub slide_index: usize,
    pub path: String,
    pub reason: String,
}

/// Output of the `graphics_check` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphicsReport {
    pub valid: Vec<ImageSpec>,
    pub rejected: Vec<RejectedImage>,
}

/// Output of the `assemble` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledDeck {
    pub path: String,
    pub template: String,
    pub slide_count: usize,
    pub bytes: u64,
    pub sha256: String,
}
