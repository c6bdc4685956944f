use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};
use sdgen_contracts::models::{ControlMode, ModelFamily};

/// An in-memory image artifact flowing between pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl ImageArtifact {
    pub fn from_rgb(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode image as png")?;
        Ok(Self {
            bytes,
            format: "png".to_string(),
            width,
            height,
        })
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes).context("failed to decode image artifact")
    }
}

/// Resolved state of a loaded pipeline, carried between stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineHandle {
    pub model_id: String,
    pub family: ModelFamily,
    pub control: Option<ControlMode>,
    pub lora: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub model_id: String,
    pub family: ModelFamily,
    pub control: Option<ControlMode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub seed: i64,
    pub count: u32,
    pub control_image: Option<ImageArtifact>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineRequest {
    pub model_id: String,
    pub prompt: String,
    pub strength: f64,
    pub steps: u32,
}

impl RefineRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            strength: 0.3,
            steps: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleRequest {
    pub prompt: String,
    pub factor: u32,
    pub steps: u32,
}

impl UpscaleRequest {
    pub fn new(prompt: impl Into<String>, factor: u32) -> Self {
        Self {
            prompt: prompt.into(),
            factor,
            steps: 20,
        }
    }
}

/// Boundary to the external diffusion library. Everything behind this trait
/// is delegated work; the engine only orchestrates calls into it.
pub trait DiffusionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn load_pipeline(&self, request: &LoadRequest) -> Result<PipelineHandle>;

    fn attach_lora(&self, pipeline: &mut PipelineHandle, weights_path: &Path) -> Result<()>;

    fn generate(
        &self,
        pipeline: &PipelineHandle,
        request: &GenerateRequest,
    ) -> Result<Vec<ImageArtifact>>;

    fn refine(&self, image: &ImageArtifact, request: &RefineRequest) -> Result<ImageArtifact>;

    fn upscale(&self, image: &ImageArtifact, request: &UpscaleRequest) -> Result<ImageArtifact>;

    /// Staged cleanup hook invoked between large pipeline swaps.
    fn release_pipeline(&self, pipeline: PipelineHandle) -> Result<()> {
        let _ = pipeline;
        Ok(())
    }
}
