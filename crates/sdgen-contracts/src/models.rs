use indexmap::IndexMap;

pub const DEFAULT_MODEL: &str = "Lykon/DreamShaper-8";
pub const UPSCALER_MODEL: &str = "stabilityai/stable-diffusion-x4-upscaler";

/// Pipeline family behind a model identifier.
///
/// Resolved once at plan resolution; downstream code dispatches on the tag
/// and never re-inspects the identifier text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Sd15,
    Sdxl,
    Sd3,
    Sd3Turbo,
}

impl ModelFamily {
    pub fn detect(model_id: &str) -> Self {
        let lowered = model_id.to_ascii_lowercase();
        let sd3 = lowered.contains("stable-diffusion-3") || lowered.contains("sd3");
        if sd3 && lowered.contains("turbo") {
            return Self::Sd3Turbo;
        }
        if sd3 {
            return Self::Sd3;
        }
        if lowered.contains("xl") {
            return Self::Sdxl;
        }
        Self::Sd15
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sd15 => "sd15",
            Self::Sdxl => "sdxl",
            Self::Sd3 => "sd3",
            Self::Sd3Turbo => "sd3-turbo",
        }
    }

    pub fn default_steps(&self) -> u32 {
        match self {
            Self::Sd15 | Self::Sdxl => 30,
            Self::Sd3 => 40,
            Self::Sd3Turbo => 8,
        }
    }
}

/// Conditioning mode for control-image generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Pose,
    Depth,
    Canny,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pose => "pose",
            Self::Depth => "depth",
            Self::Canny => "canny",
        }
    }

    pub fn conditioning_model(&self) -> &'static str {
        match self {
            Self::Pose => "lllyasviel/control_v11p_sd15_openpose",
            Self::Depth => "lllyasviel/control_v11f1p_sd15_depth",
            Self::Canny => "lllyasviel/control_v11p_sd15_canny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub family: ModelFamily,
    pub default_steps: u32,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.get(model_id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Known entry, or a spec synthesized from family detection.
    pub fn resolve(&self, model_id: &str) -> ModelSpec {
        if let Some(spec) = self.models.get(model_id) {
            return spec.clone();
        }
        let family = ModelFamily::detect(model_id);
        ModelSpec {
            id: model_id.to_string(),
            family,
            default_steps: family.default_steps(),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, family: ModelFamily, default_steps: u32| {
        map.insert(
            id.to_string(),
            ModelSpec {
                id: id.to_string(),
                family,
                default_steps,
            },
        );
    };

    insert("Lykon/DreamShaper-8", ModelFamily::Sd15, 30);
    insert("runwayml/stable-diffusion-v1-5", ModelFamily::Sd15, 30);
    insert(
        "stabilityai/stable-diffusion-xl-base-1.0",
        ModelFamily::Sdxl,
        30,
    );
    insert(
        "stabilityai/stable-diffusion-3.5-large",
        ModelFamily::Sd3,
        40,
    );
    insert(
        "stabilityai/stable-diffusion-3.5-large-turbo",
        ModelFamily::Sd3Turbo,
        8,
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{ControlMode, ModelFamily, ModelRegistry, DEFAULT_MODEL};

    #[test]
    fn family_detection_maps_identifier_shapes() {
        assert_eq!(ModelFamily::detect("Lykon/DreamShaper-8"), ModelFamily::Sd15);
        assert_eq!(
            ModelFamily::detect("stabilityai/stable-diffusion-xl-base-1.0"),
            ModelFamily::Sdxl
        );
        assert_eq!(
            ModelFamily::detect("stabilityai/stable-diffusion-3.5-large"),
            ModelFamily::Sd3
        );
        assert_eq!(
            ModelFamily::detect("stabilityai/stable-diffusion-3.5-large-turbo"),
            ModelFamily::Sd3Turbo
        );
        assert_eq!(ModelFamily::detect("some/sd3-medium"), ModelFamily::Sd3);
    }

    #[test]
    fn registry_resolves_unknown_models_by_detection() {
        let registry = ModelRegistry::new(None);
        let known = registry.resolve(DEFAULT_MODEL);
        assert_eq!(known.family, ModelFamily::Sd15);
        assert_eq!(known.default_steps, 30);

        let synthesized = registry.resolve("someone/custom-sdxl-finetune");
        assert_eq!(synthesized.family, ModelFamily::Sdxl);
        assert_eq!(synthesized.default_steps, 30);
        assert!(registry.get("someone/custom-sdxl-finetune").is_none());
    }

    #[test]
    fn control_modes_map_to_conditioning_models() {
        assert_eq!(
            ControlMode::Pose.conditioning_model(),
            "lllyasviel/control_v11p_sd15_openpose"
        );
        assert_eq!(
            ControlMode::Depth.conditioning_model(),
            "lllyasviel/control_v11f1p_sd15_depth"
        );
        assert_eq!(
            ControlMode::Canny.conditioning_model(),
            "lllyasviel/control_v11p_sd15_canny"
        );
    }
}
