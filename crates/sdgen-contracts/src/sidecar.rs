use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ledger::RunLedger;
use crate::plan::GenerationPlan;

pub const SIDECAR_SCHEMA_VERSION: u64 = 1;

/// What actually happened to each optional stage by the time an image was
/// saved. `Skipped` means the stage was never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Applied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageOutcomes {
    pub lora: StageOutcome,
    pub controlnet: StageOutcome,
    pub refiner: StageOutcome,
    pub upscale: StageOutcome,
}

impl Default for StageOutcomes {
    fn default() -> Self {
        Self {
            lora: StageOutcome::Skipped,
            controlnet: StageOutcome::Skipped,
            refiner: StageOutcome::Skipped,
            upscale: StageOutcome::Skipped,
        }
    }
}

/// One JSON sidecar per saved image, carrying the resolved parameters and
/// the full run ledger at save time.
pub fn build_sidecar(
    run_id: &str,
    backend: &str,
    plan: &GenerationPlan,
    ledger: &RunLedger,
    outcomes: &StageOutcomes,
    image_index: u32,
    filename: &str,
    generation_time_s: f64,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(SIDECAR_SCHEMA_VERSION.into()),
    );
    root.insert("run_id".to_string(), Value::String(run_id.to_string()));
    root.insert("backend".to_string(), Value::String(backend.to_string()));
    root.insert("prompt".to_string(), Value::String(plan.prompt.clone()));
    root.insert(
        "negative_prompt".to_string(),
        Value::String(plan.negative_prompt.clone()),
    );
    root.insert("seed".to_string(), Value::Number(plan.seed.into()));
    root.insert("steps".to_string(), Value::Number(plan.steps.into()));
    root.insert("model".to_string(), Value::String(plan.model_id.clone()));
    root.insert(
        "model_family".to_string(),
        Value::String(plan.family.as_str().to_string()),
    );
    root.insert(
        "quality_preset".to_string(),
        optional_string(plan.quality.as_deref()),
    );
    root.insert("style".to_string(), optional_string(plan.style.as_deref()));
    root.insert(
        "lora".to_string(),
        optional_string(
            plan.lora
                .as_deref()
                .map(|path| path.to_string_lossy())
                .as_deref(),
        ),
    );
    root.insert(
        "controlnet".to_string(),
        optional_string(plan.control.as_ref().map(|input| input.mode.as_str())),
    );
    root.insert(
        "controlnet_image".to_string(),
        optional_string(
            plan.control
                .as_ref()
                .map(|input| input.image_path.to_string_lossy())
                .as_deref(),
        ),
    );
    root.insert(
        "refiner".to_string(),
        optional_string(plan.refiner.as_deref()),
    );
    root.insert(
        "upscale".to_string(),
        plan.upscale
            .map(|factor| Value::Number(factor.into()))
            .unwrap_or(Value::Null),
    );
    root.insert(
        "stages".to_string(),
        serde_json::to_value(outcomes).unwrap_or(Value::Null),
    );
    root.insert(
        "failures".to_string(),
        serde_json::to_value(ledger.failures()).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    root.insert(
        "warnings".to_string(),
        serde_json::to_value(ledger.warnings()).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    root.insert(
        "image_index".to_string(),
        Value::Number(image_index.into()),
    );
    root.insert("filename".to_string(), Value::String(filename.to_string()));
    root.insert(
        "generation_time_s".to_string(),
        serde_json::Number::from_f64(generation_time_s)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    );
    root.insert("ts".to_string(), Value::String(now_utc_iso()));
    Value::Object(root)
}

pub fn write_sidecar(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn optional_string(value: Option<&str>) -> Value {
    value
        .map(|value| Value::String(value.to_string()))
        .unwrap_or(Value::Null)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use crate::ledger::RunLedger;
    use crate::plan::{resolve, GenerationRequest};

    use super::{
        build_sidecar, write_sidecar, StageOutcome, StageOutcomes, SIDECAR_SCHEMA_VERSION,
    };

    #[test]
    fn sidecar_carries_plan_and_ledger() -> anyhow::Result<()> {
        let mut request = GenerationRequest::new("hello");
        request.style = Some("anime".to_string());
        request.upscale = Some(2);
        let plan = resolve(&request)?;

        let mut ledger = RunLedger::new();
        ledger.record_failure("upscaling", "timeout", 1);
        ledger.record_warning("upscaling failed; keeping base resolution image");
        let mut outcomes = StageOutcomes::default();
        outcomes.upscale = StageOutcome::Failed;

        let payload = build_sidecar(
            "run-abc",
            "dryrun",
            &plan,
            &ledger,
            &outcomes,
            1,
            "output_2026-01-01_00-00-00_001.png",
            12.5,
        );

        assert_eq!(payload["schema_version"], json!(SIDECAR_SCHEMA_VERSION));
        assert_eq!(payload["run_id"], json!("run-abc"));
        assert_eq!(payload["backend"], json!("dryrun"));
        assert!(payload["prompt"]
            .as_str()
            .unwrap_or("")
            .starts_with("hello, anime style"));
        assert_eq!(payload["seed"], json!(42));
        assert_eq!(payload["style"], json!("anime"));
        assert_eq!(payload["quality_preset"], Value::Null);
        assert_eq!(payload["upscale"], json!(2));
        assert_eq!(payload["stages"]["upscale"], json!("failed"));
        assert_eq!(payload["stages"]["lora"], json!("skipped"));
        assert_eq!(payload["failures"][0]["stage"], json!("upscaling"));
        assert_eq!(payload["warnings"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["generation_time_s"], json!(12.5));
        Ok(())
    }

    #[test]
    fn sidecar_writes_pretty_json() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("output_001.json");

        let mut request = GenerationRequest::new("hello");
        request.output_dir = PathBuf::from(temp.path());
        let plan = resolve(&request)?;
        let ledger = RunLedger::new();
        let payload = build_sidecar(
            "run-1",
            "dryrun",
            &plan,
            &ledger,
            &StageOutcomes::default(),
            1,
            "output_001.png",
            0.5,
        );
        write_sidecar(&path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["filename"], json!("output_001.png"));
        assert_eq!(parsed["failures"], json!([]));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
