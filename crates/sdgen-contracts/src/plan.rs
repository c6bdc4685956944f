use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::models::{ControlMode, ModelFamily, ModelRegistry, DEFAULT_MODEL};
use crate::presets::{quality_preset, style_preset};

pub const DEFAULT_SEED: i64 = 42;
pub const DEFAULT_OUTPUT_DIR: &str = "./outputs";

/// Raw user input before preset expansion. `None` means the flag was not
/// given; explicit values always win over preset defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub output_dir: PathBuf,
    pub count: i64,
    pub steps: Option<u32>,
    pub seed: i64,
    pub negative_prompt: Option<String>,
    pub style: Option<String>,
    pub quality: Option<String>,
    pub lora: Option<PathBuf>,
    pub pose: Option<PathBuf>,
    pub depth: Option<PathBuf>,
    pub canny: Option<PathBuf>,
    pub upscale: Option<u32>,
    pub refiner: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            count: 1,
            seed: DEFAULT_SEED,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInput {
    pub mode: ControlMode,
    pub image_path: PathBuf,
}

/// Fully-resolved run parameters consumed by the engine. Immutable once
/// built; everything ambiguous (presets, defaults, family detection) has
/// already been decided here.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPlan {
    pub prompt: String,
    pub negative_prompt: String,
    pub model_id: String,
    pub family: ModelFamily,
    pub steps: u32,
    pub seed: i64,
    pub count: u32,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub lora: Option<PathBuf>,
    pub control: Option<ControlInput>,
    pub refiner: Option<String>,
    pub upscale: Option<u32>,
    pub output_dir: PathBuf,
}

/// Single resolution point from user input to run parameters.
///
/// Validation order: domain rules on explicit input first, then quality
/// preset expansion into unset fields, then style decoration, then global
/// defaults. Family detection happens once, at the end.
pub fn resolve(request: &GenerationRequest) -> Result<GenerationPlan> {
    if request.prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    if request.count < 1 {
        bail!("image count must be at least 1");
    }
    let count = u32::try_from(request.count).context("image count out of range")?;
    if let Some(factor) = request.upscale {
        if factor != 2 && factor != 4 {
            bail!("upscale factor must be 2 or 4, got {factor}");
        }
    }

    let control = resolve_control(request)?;

    let quality = match request.quality.as_deref() {
        Some(name) => Some(
            quality_preset(name)
                .with_context(|| format!("unknown quality preset '{name}'"))?,
        ),
        None => None,
    };
    let style = match request.style.as_deref() {
        Some(name) => {
            Some(style_preset(name).with_context(|| format!("unknown style preset '{name}'"))?)
        }
        None => None,
    };

    let mut model = request.model.clone();
    let mut steps = request.steps;
    let mut refiner = request.refiner.clone();
    let mut upscale = request.upscale;
    let mut lora = request.lora.clone();
    if let Some(preset) = quality {
        if model.is_none() {
            model = preset.model.map(str::to_string);
        }
        if steps.is_none() {
            steps = preset.steps;
        }
        if refiner.is_none() {
            refiner = preset.refiner.map(str::to_string);
        }
        if upscale.is_none() {
            upscale = preset.upscale;
        }
        if lora.is_none() {
            lora = preset.lora.map(PathBuf::from);
        }
    }

    let mut prompt = request.prompt.clone();
    let mut negative_prompt = request
        .negative_prompt
        .clone()
        .filter(|value| !value.trim().is_empty());
    if let Some(preset) = style {
        prompt.push_str(preset.prompt_suffix);
        if negative_prompt.is_none() {
            negative_prompt = Some(preset.negative_prompt.to_string());
        }
    }

    let model_id = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let spec = ModelRegistry::new(None).resolve(&model_id);
    let steps = steps.unwrap_or(spec.default_steps);

    Ok(GenerationPlan {
        prompt,
        negative_prompt: negative_prompt.unwrap_or_default(),
        model_id,
        family: spec.family,
        steps,
        seed: request.seed,
        count,
        quality: quality.map(|preset| preset.name.to_string()),
        style: style.map(|preset| preset.name.to_string()),
        lora,
        control,
        refiner,
        upscale,
        output_dir: request.output_dir.clone(),
    })
}

fn resolve_control(request: &GenerationRequest) -> Result<Option<ControlInput>> {
    let mut inputs = Vec::new();
    if let Some(path) = &request.pose {
        inputs.push(ControlInput {
            mode: ControlMode::Pose,
            image_path: path.clone(),
        });
    }
    if let Some(path) = &request.depth {
        inputs.push(ControlInput {
            mode: ControlMode::Depth,
            image_path: path.clone(),
        });
    }
    if let Some(path) = &request.canny {
        inputs.push(ControlInput {
            mode: ControlMode::Canny,
            image_path: path.clone(),
        });
    }
    if inputs.len() > 1 {
        bail!("control image flags --pose, --depth and --canny are mutually exclusive");
    }
    Ok(inputs.pop())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::models::{ControlMode, ModelFamily, DEFAULT_MODEL};

    use super::{resolve, GenerationRequest};

    #[test]
    fn defaults_fill_in_without_presets() -> anyhow::Result<()> {
        let plan = resolve(&GenerationRequest::new("a red apple"))?;
        assert_eq!(plan.prompt, "a red apple");
        assert_eq!(plan.negative_prompt, "");
        assert_eq!(plan.model_id, DEFAULT_MODEL);
        assert_eq!(plan.family, ModelFamily::Sd15);
        assert_eq!(plan.steps, 30);
        assert_eq!(plan.seed, 42);
        assert_eq!(plan.count, 1);
        assert!(plan.refiner.is_none());
        assert!(plan.upscale.is_none());
        Ok(())
    }

    #[test]
    fn quality_preset_fills_only_unset_fields() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("castle");
        request.quality = Some("ultra".to_string());
        request.steps = Some(12);
        let plan = resolve(&request)?;

        assert_eq!(plan.steps, 12);
        assert_eq!(plan.model_id, "stabilityai/stable-diffusion-3.5-large");
        assert_eq!(plan.family, ModelFamily::Sd3);
        assert_eq!(
            plan.refiner.as_deref(),
            Some("stabilityai/stable-diffusion-xl-refiner-1.0")
        );
        assert_eq!(plan.upscale, Some(2));
        assert_eq!(plan.quality.as_deref(), Some("ultra"));
        Ok(())
    }

    #[test]
    fn explicit_model_wins_over_quality_preset() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("castle");
        request.quality = Some("draft".to_string());
        request.model = Some("runwayml/stable-diffusion-v1-5".to_string());
        let plan = resolve(&request)?;

        assert_eq!(plan.model_id, "runwayml/stable-diffusion-v1-5");
        assert_eq!(plan.family, ModelFamily::Sd15);
        assert_eq!(plan.steps, 8);
        Ok(())
    }

    #[test]
    fn style_appends_suffix_and_defaults_negative_prompt() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("a dragon");
        request.style = Some("fantasy".to_string());
        let plan = resolve(&request)?;

        assert!(plan.prompt.starts_with("a dragon, fantasy art"));
        assert_eq!(
            plan.negative_prompt,
            "modern, mundane, photograph, low quality, blurry"
        );
        assert_eq!(plan.style.as_deref(), Some("fantasy"));
        Ok(())
    }

    #[test]
    fn explicit_negative_prompt_survives_style() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("a dragon");
        request.style = Some("fantasy".to_string());
        request.negative_prompt = Some("text, watermark".to_string());
        let plan = resolve(&request)?;

        assert_eq!(plan.negative_prompt, "text, watermark");
        Ok(())
    }

    #[test]
    fn rejects_invalid_counts_and_factors() {
        let mut request = GenerationRequest::new("apple");
        request.count = 0;
        assert!(resolve(&request).is_err());

        let mut request = GenerationRequest::new("apple");
        request.upscale = Some(3);
        assert!(resolve(&request).is_err());

        let request = GenerationRequest::new("  ");
        assert!(resolve(&request).is_err());
    }

    #[test]
    fn rejects_unknown_preset_names() {
        let mut request = GenerationRequest::new("apple");
        request.quality = Some("supreme".to_string());
        assert!(resolve(&request).is_err());

        let mut request = GenerationRequest::new("apple");
        request.style = Some("baroque".to_string());
        assert!(resolve(&request).is_err());
    }

    #[test]
    fn control_flags_are_mutually_exclusive() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("figure");
        request.pose = Some(PathBuf::from("pose.png"));
        request.depth = Some(PathBuf::from("depth.png"));
        assert!(resolve(&request).is_err());

        let mut request = GenerationRequest::new("figure");
        request.canny = Some(PathBuf::from("edges.png"));
        let plan = resolve(&request)?;
        let control = plan.control.as_ref().map(|input| input.mode);
        assert_eq!(control, Some(ControlMode::Canny));
        Ok(())
    }
}
