use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{
    names, run_dir, GraphicsManifest, GraphicsReport, ImageFormat, ImageSpec, RejectedImage, Skill,
    SkillInput,
};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLimits {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Fail the step instead of dropping invalid images from the deck.
    #[serde(default)]
    pub fail_on_invalid: bool,
}

fn default_max_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            fail_on_invalid: false,
        }
    }
}

/// Re-reads every generated image and checks it against its manifest entry.
pub struct GraphicsCheckSkill {
    output_dir: PathBuf,
    limits: ImageLimits,
}

impl GraphicsCheckSkill {
    pub fn new(output_dir: impl Into<PathBuf>, limits: ImageLimits) -> Self {
        Self {
            output_dir: output_dir.into(),
            limits,
        }
    }

    async fn check(&self, base: &Path, image: &ImageSpec) -> std::result::Result<(), String> {
        let bytes = match tokio::fs::read(base.join(&image.path)).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(format!("cannot read file: {}", e)),
        };
        if bytes.is_empty() {
            return Err("file is empty".to_string());
        }
        if bytes.len() as u64 > self.limits.max_bytes {
            return Err(format!(
                "file is {} bytes, limit is {}",
                bytes.len(),
                self.limits.max_bytes
            ));
        }
        if bytes.len() as u64 != image.bytes {
            return Err(format!("expected {} bytes, found {}", image.bytes, bytes.len()));
        }
        match ImageFormat::detect(&bytes) {
            Some(format) if format == image.format => {}
            Some(format) => {
                return Err(format!("expected {:?} data, found {:?}", image.format, format));
            }
            None => return Err("unrecognised image data".to_string()),
        }
        let digest = format!("{:x}", Sha256::digest(&bytes));
        if digest != image.sha256 {
            return Err("checksum mismatch".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Skill for GraphicsCheckSkill {
    fn name(&self) -> &str {
        names::GRAPHICS_CHECK
    }

    fn required_dependencies(&self) -> &[&'static str] {
        &[names::GRAPHICS]
    }

    async fn run(&self, input: &SkillInput<'_>) -> Result<Value> {
        let manifest: GraphicsManifest = input.output(names::GRAPHICS)?;
        let base = run_dir(&self.output_dir, input.run_id);

        let mut report = GraphicsReport::default();
        for image in manifest.images {
            match self.check(&base, &image).await {
                Ok(()) => report.valid.push(image),
                Err(reason) => {
                    warn!("Image {} rejected: {}", image.path, reason);
                    report.rejected.push(RejectedImage {
                        slide_index: image.slide_index,
                        path: image.path,
                        reason,
                    });
                }
            }
        }

        if self.limits.fail_on_invalid && !report.rejected.is_empty() {
            let reasons: Vec<String> = report
                .rejected
                .iter()
                .map(|r| format!("{}: {}", r.path, r.reason))
                .collect();
            return Err(Error::Validation(format!("Invalid images: {}", reasons.join("; "))));
        }

        info!(
            "Image check for run {}: {} valid, {} rejected",
            input.run_id,
            report.valid.len(),
            report.rejected.len()
        );
        Ok(serde_json::to_value(report)?)
    }
}
