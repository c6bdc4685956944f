/// Named prompt decoration applied on top of the user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub name: &'static str,
    pub prompt_suffix: &'static str,
    pub negative_prompt: &'static str,
}

pub const STYLES: [StylePreset; 4] = [
    StylePreset {
        name: "anime",
        prompt_suffix: ", anime style, highly detailed, vibrant colors, cel shaded, studio quality",
        negative_prompt: "photo, photorealistic, 3d render, ugly, blurry, low quality",
    },
    StylePreset {
        name: "fantasy",
        prompt_suffix: ", fantasy art, magical, ethereal, detailed, epic, concept art style",
        negative_prompt: "modern, mundane, photograph, low quality, blurry",
    },
    StylePreset {
        name: "scifi",
        prompt_suffix: ", sci-fi, futuristic, high-tech, detailed, concept art, cyberpunk aesthetic",
        negative_prompt: "fantasy, medieval, low quality, blurry, watermark",
    },
    StylePreset {
        name: "realism",
        prompt_suffix: ", photorealistic, 8k uhd, high detail, professional photography, sharp focus",
        negative_prompt: "cartoon, anime, painting, drawing, low quality, blurry",
    },
];

pub fn style_preset(name: &str) -> Option<&'static StylePreset> {
    let lowered = name.trim().to_ascii_lowercase();
    STYLES.iter().find(|preset| preset.name == lowered)
}

/// Named bundle of generation parameters applied as defaults.
///
/// A preset fills only fields the user left unset; explicit values always
/// win, whatever they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub name: &'static str,
    pub model: Option<&'static str>,
    pub steps: Option<u32>,
    pub refiner: Option<&'static str>,
    pub upscale: Option<u32>,
    pub lora: Option<&'static str>,
}

pub const QUALITY_PRESETS: [QualityPreset; 4] = [
    QualityPreset {
        name: "draft",
        model: Some("stabilityai/stable-diffusion-3.5-large-turbo"),
        steps: Some(8),
        refiner: None,
        upscale: None,
        lora: None,
    },
    QualityPreset {
        name: "standard",
        model: Some("Lykon/DreamShaper-8"),
        steps: Some(30),
        refiner: None,
        upscale: None,
        lora: None,
    },
    QualityPreset {
        name: "high",
        model: Some("stabilityai/stable-diffusion-3.5-large"),
        steps: Some(40),
        refiner: Some("stabilityai/stable-diffusion-xl-refiner-1.0"),
        upscale: None,
        lora: None,
    },
    QualityPreset {
        name: "ultra",
        model: Some("stabilityai/stable-diffusion-3.5-large"),
        steps: Some(50),
        refiner: Some("stabilityai/stable-diffusion-xl-refiner-1.0"),
        upscale: Some(2),
        lora: None,
    },
];

pub fn quality_preset(name: &str) -> Option<&'static QualityPreset> {
    let lowered = name.trim().to_ascii_lowercase();
    QUALITY_PRESETS.iter().find(|preset| preset.name == lowered)
}

#[cfg(test)]
mod tests {
    use super::{quality_preset, style_preset};

    #[test]
    fn style_lookup_is_case_insensitive() {
        let anime = style_preset("Anime").map(|preset| preset.name);
        assert_eq!(anime, Some("anime"));
        assert!(style_preset("baroque").is_none());
    }

    #[test]
    fn style_suffixes_start_with_separator() {
        for preset in super::STYLES {
            assert!(preset.prompt_suffix.starts_with(", "), "{}", preset.name);
            assert!(!preset.negative_prompt.is_empty(), "{}", preset.name);
        }
    }

    #[test]
    fn quality_tiers_escalate() {
        let draft = quality_preset("draft").and_then(|p| p.steps);
        let ultra = quality_preset("ultra").and_then(|p| p.steps);
        assert!(draft < ultra);
        assert!(quality_preset("draft").and_then(|p| p.refiner).is_none());
        assert!(quality_preset("ultra").and_then(|p| p.refiner).is_some());
        assert_eq!(quality_preset("ultra").and_then(|p| p.upscale), Some(2));
        assert!(quality_preset("turbo").is_none());
    }
}
