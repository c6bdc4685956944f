use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Map, Value};

use sdgen_contracts::models::UPSCALER_MODEL;

use crate::backend::{
    DiffusionBackend, GenerateRequest, ImageArtifact, LoadRequest, PipelineHandle, RefineRequest,
    UpscaleRequest,
};

const REQUEST_TIMEOUT_S: f64 = 300.0;

/// Hugging Face Inference API backend over blocking HTTP.
///
/// Pipeline loading probes the model status endpoint so that gated or
/// missing models fail at load time rather than mid-generation.
pub struct HfInferenceBackend {
    api_base: String,
    http: HttpClient,
}

impl HfInferenceBackend {
    pub fn new() -> Self {
        Self {
            api_base: env::var("SDGEN_HF_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://api-inference.huggingface.co".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Result<String> {
        non_empty_env("HF_TOKEN").ok_or_else(|| {
            anyhow::anyhow!(
                "HF_TOKEN is not set; create a token at https://huggingface.co/settings/tokens"
            )
        })
    }

    fn model_endpoint(&self, model_id: &str) -> String {
        format!("{}/models/{}", self.api_base, model_id)
    }

    fn status_endpoint(&self, model_id: &str) -> String {
        format!("{}/status/{}", self.api_base, model_id)
    }

    fn post_image(&self, model_id: &str, payload: &Value) -> Result<ImageArtifact> {
        let api_key = Self::api_key()?;
        let response = self
            .http
            .post(self.model_endpoint(model_id))
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
            .json(payload)
            .send()
            .with_context(|| format!("request to {model_id} failed"))?;
        image_from_response(model_id, response)
    }
}

impl Default for HfInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffusionBackend for HfInferenceBackend {
    fn name(&self) -> &str {
        "hf"
    }

    fn load_pipeline(&self, request: &LoadRequest) -> Result<PipelineHandle> {
        let api_key = Self::api_key()?;
        let probe_id = match request.control {
            Some(mode) => mode.conditioning_model(),
            None => request.model_id.as_str(),
        };
        let response = self
            .http
            .get(self.status_endpoint(probe_id))
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .timeout(Duration::from_secs(30))
            .send()
            .with_context(|| format!("status probe for {probe_id} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().map(|bytes| bytes.to_vec()).unwrap_or_default();
            bail!(
                "model {probe_id} unavailable ({}): {}",
                status.as_u16(),
                error_body_text(&body)
            );
        }
        Ok(PipelineHandle {
            model_id: request.model_id.clone(),
            family: request.family,
            control: request.control,
            lora: None,
        })
    }

    fn attach_lora(&self, pipeline: &mut PipelineHandle, weights_path: &Path) -> Result<()> {
        let raw = weights_path.to_string_lossy().to_string();
        if !weights_path.exists() && !raw.contains('/') {
            bail!("LoRA weights '{raw}' are neither a local file nor a hub identifier");
        }
        pipeline.lora = Some(weights_path.to_path_buf());
        Ok(())
    }

    fn generate(
        &self,
        pipeline: &PipelineHandle,
        request: &GenerateRequest,
    ) -> Result<Vec<ImageArtifact>> {
        let target = target_model(pipeline);
        let mut artifacts = Vec::new();
        for index in 0..request.count {
            let seed = request.seed.wrapping_add(i64::from(index));
            let payload = generate_payload(pipeline, request, seed);
            artifacts.push(self.post_image(&target, &payload)?);
        }
        Ok(artifacts)
    }

    fn refine(&self, image: &ImageArtifact, request: &RefineRequest) -> Result<ImageArtifact> {
        let payload = image_to_image_payload(
            image,
            &request.prompt,
            map_object(json!({
                "strength": request.strength,
                "num_inference_steps": request.steps,
            })),
        );
        self.post_image(&request.model_id, &payload)
    }

    fn upscale(&self, image: &ImageArtifact, request: &UpscaleRequest) -> Result<ImageArtifact> {
        let payload = image_to_image_payload(
            image,
            &request.prompt,
            map_object(json!({
                "num_inference_steps": request.steps,
                "upscale_factor": request.factor,
            })),
        );
        self.post_image(UPSCALER_MODEL, &payload)
    }
}

fn target_model(pipeline: &PipelineHandle) -> String {
    match pipeline.control {
        Some(mode) => mode.conditioning_model().to_string(),
        None => pipeline.model_id.clone(),
    }
}

fn generate_payload(pipeline: &PipelineHandle, request: &GenerateRequest, seed: i64) -> Value {
    let mut parameters = Map::new();
    parameters.insert(
        "num_inference_steps".to_string(),
        Value::Number(request.steps.into()),
    );
    parameters.insert("seed".to_string(), Value::Number(seed.into()));
    if !request.negative_prompt.is_empty() {
        parameters.insert(
            "negative_prompt".to_string(),
            Value::String(request.negative_prompt.clone()),
        );
    }
    if let Some(lora) = &pipeline.lora {
        parameters.insert(
            "adapter_id".to_string(),
            Value::String(lora.to_string_lossy().to_string()),
        );
    }

    let mut payload = Map::new();
    payload.insert("inputs".to_string(), Value::String(request.prompt.clone()));
    if let Some(control) = &request.control_image {
        payload.insert(
            "image".to_string(),
            Value::String(BASE64.encode(&control.bytes)),
        );
        parameters.insert(
            "controlnet_conditioning_scale".to_string(),
            json!(1.0),
        );
    }
    payload.insert("parameters".to_string(), Value::Object(parameters));
    Value::Object(payload)
}

fn image_to_image_payload(image: &ImageArtifact, prompt: &str, parameters: Map<String, Value>) -> Value {
    json!({
        "inputs": {
            "image": BASE64.encode(&image.bytes),
            "prompt": prompt,
        },
        "parameters": parameters,
    })
}

fn image_from_response(model_id: &str, response: HttpResponse) -> Result<ImageArtifact> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = response
        .bytes()
        .context("failed to read response body")?
        .to_vec();

    if !status.is_success() {
        bail!(
            "{model_id} returned {}: {}",
            status.as_u16(),
            error_body_text(&bytes)
        );
    }
    if !content_type.starts_with("image/") {
        bail!(
            "{model_id} returned unexpected content type '{content_type}': {}",
            error_body_text(&bytes)
        );
    }

    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("{model_id} returned undecodable image bytes"))?;
    Ok(ImageArtifact {
        width: decoded.width(),
        height: decoded.height(),
        format: format_from_mime(&content_type).to_string(),
        bytes,
    })
}

fn format_from_mime(content_type: &str) -> &'static str {
    match content_type
        .strip_prefix("image/")
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
    {
        "jpeg" | "jpg" => "jpg",
        "webp" => "webp",
        _ => "png",
    }
}

fn error_body_text(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty body>".to_string();
    }
    if let Ok(payload) = serde_json::from_slice::<Value>(bytes) {
        if let Some(error) = payload.get("error") {
            return match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
        }
        return payload.to_string();
    }
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(300).collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
