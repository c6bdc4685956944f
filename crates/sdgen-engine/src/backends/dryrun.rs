use std::path::Path;

use anyhow::Result;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::backend::{
    DiffusionBackend, GenerateRequest, ImageArtifact, LoadRequest, PipelineHandle, RefineRequest,
    UpscaleRequest,
};

pub const DRYRUN_IMAGE_SIZE: u32 = 512;

/// Offline backend painting deterministic solid-color images.
///
/// Keeps the full stage surface exercisable without network access or model
/// weights; every operation succeeds.
pub struct DryrunBackend;

impl DiffusionBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn load_pipeline(&self, request: &LoadRequest) -> Result<PipelineHandle> {
        Ok(PipelineHandle {
            model_id: request.model_id.clone(),
            family: request.family,
            control: request.control,
            lora: None,
        })
    }

    fn attach_lora(&self, pipeline: &mut PipelineHandle, weights_path: &Path) -> Result<()> {
        pipeline.lora = Some(weights_path.to_path_buf());
        Ok(())
    }

    fn generate(
        &self,
        _pipeline: &PipelineHandle,
        request: &GenerateRequest,
    ) -> Result<Vec<ImageArtifact>> {
        let mut artifacts = Vec::new();
        for index in 0..request.count {
            let seed = request.seed.wrapping_add(i64::from(index));
            let (r, g, b) = color_from_prompt(&request.prompt, seed);
            let mut canvas = RgbImage::new(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE);
            for pixel in canvas.pixels_mut() {
                *pixel = Rgb([r, g, b]);
            }
            artifacts.push(ImageArtifact::from_rgb(canvas)?);
        }
        Ok(artifacts)
    }

    fn refine(&self, image: &ImageArtifact, _request: &RefineRequest) -> Result<ImageArtifact> {
        let refined = image.decode()?.brighten(8);
        ImageArtifact::from_rgb(refined.to_rgb8())
    }

    fn upscale(&self, image: &ImageArtifact, request: &UpscaleRequest) -> Result<ImageArtifact> {
        let factor = request.factor.max(1);
        let decoded = image.decode()?;
        let upscaled = decoded.resize_exact(
            decoded.width() * factor,
            decoded.height() * factor,
            FilterType::Nearest,
        );
        ImageArtifact::from_rgb(upscaled.to_rgb8())
    }
}

fn color_from_prompt(prompt: &str, seed: i64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use sdgen_contracts::models::ModelFamily;

    use crate::backend::{
        DiffusionBackend, GenerateRequest, LoadRequest, RefineRequest, UpscaleRequest,
    };

    use super::{color_from_prompt, DryrunBackend, DRYRUN_IMAGE_SIZE};

    fn generate_request(prompt: &str, count: u32) -> GenerateRequest {
        GenerateRequest {
            prompt: prompt.to_string(),
            negative_prompt: String::new(),
            steps: 8,
            seed: 42,
            count,
            control_image: None,
        }
    }

    #[test]
    fn generation_is_deterministic_per_prompt_and_seed() -> anyhow::Result<()> {
        let backend = DryrunBackend;
        let pipeline = backend.load_pipeline(&LoadRequest {
            model_id: "dryrun".to_string(),
            family: ModelFamily::Sd15,
            control: None,
        })?;

        let first = backend.generate(&pipeline, &generate_request("apple", 1))?;
        let second = backend.generate(&pipeline, &generate_request("apple", 1))?;
        assert_eq!(first[0].bytes, second[0].bytes);
        assert_eq!(first[0].width, DRYRUN_IMAGE_SIZE);

        let other = backend.generate(&pipeline, &generate_request("pear", 1))?;
        assert_ne!(first[0].bytes, other[0].bytes);
        Ok(())
    }

    #[test]
    fn batch_images_vary_by_seed_offset() -> anyhow::Result<()> {
        let backend = DryrunBackend;
        let pipeline = backend.load_pipeline(&LoadRequest {
            model_id: "dryrun".to_string(),
            family: ModelFamily::Sd15,
            control: None,
        })?;
        let batch = backend.generate(&pipeline, &generate_request("apple", 3))?;
        assert_eq!(batch.len(), 3);
        assert_ne!(batch[0].bytes, batch[1].bytes);
        assert_ne!(color_from_prompt("apple", 42), color_from_prompt("apple", 43));
        Ok(())
    }

    #[test]
    fn upscale_multiplies_dimensions() -> anyhow::Result<()> {
        let backend = DryrunBackend;
        let pipeline = backend.load_pipeline(&LoadRequest {
            model_id: "dryrun".to_string(),
            family: ModelFamily::Sd15,
            control: None,
        })?;
        let base = backend.generate(&pipeline, &generate_request("apple", 1))?;
        let upscaled = backend.upscale(&base[0], &UpscaleRequest::new("apple", 2))?;
        assert_eq!(upscaled.width, DRYRUN_IMAGE_SIZE * 2);
        assert_eq!(upscaled.height, DRYRUN_IMAGE_SIZE * 2);

        let refined = backend.refine(&base[0], &RefineRequest::new("refiner", "apple"))?;
        assert_eq!(refined.width, DRYRUN_IMAGE_SIZE);
        Ok(())
    }
}
