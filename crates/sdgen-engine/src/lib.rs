use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use sdgen_contracts::events::{EventLog, EventPayload};
use sdgen_contracts::ledger::RunLedger;
use sdgen_contracts::plan::{ControlInput, GenerationPlan};
use sdgen_contracts::sidecar::{build_sidecar, write_sidecar, StageOutcome, StageOutcomes};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub mod backend;
pub mod backends;
pub mod control;
pub mod retry;

use crate::backend::{
    DiffusionBackend, GenerateRequest, ImageArtifact, LoadRequest, PipelineHandle, RefineRequest,
    UpscaleRequest,
};
use crate::control::prepare_control_image;
use crate::retry::{run_with_retries, RetryPolicy};

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub saved: Vec<PathBuf>,
    pub warning_count: usize,
    pub recovered_failure_count: usize,
    pub elapsed_s: f64,
}

/// Drives one generation run through its stages.
///
/// Base pipeline load and image generation are fatal when retries are
/// exhausted; LoRA, ControlNet, refinement and upscaling degrade to the
/// prior-stage state with a ledger warning.
pub struct GenerationEngine {
    plan: GenerationPlan,
    backend: Box<dyn DiffusionBackend>,
    retry: RetryPolicy,
    ledger: RunLedger,
    events: EventLog,
    run_id: String,
}

impl GenerationEngine {
    pub fn new(
        plan: GenerationPlan,
        backend: Box<dyn DiffusionBackend>,
        events_path: Option<PathBuf>,
    ) -> Result<Self> {
        fs::create_dir_all(&plan.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                plan.output_dir.display()
            )
        })?;
        let run_id = run_id();
        let events = EventLog::new(
            events_path.unwrap_or_else(|| plan.output_dir.join("events.jsonl")),
            run_id.clone(),
        );
        events.append(
            "run_started",
            map_object(json!({
                "model": plan.model_id.as_str(),
                "backend": backend.name(),
                "out_dir": plan.output_dir.to_string_lossy().to_string(),
            })),
        )?;

        Ok(Self {
            plan,
            backend,
            retry: RetryPolicy::from_env(),
            ledger: RunLedger::new(),
            events,
            run_id,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn run(&mut self) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut outcomes = StageOutcomes::default();

        let mut pipeline = self.load_base_pipeline()?;
        if let Some(weights) = self.plan.lora.clone() {
            outcomes.lora = self.lora_stage(&mut pipeline, &weights)?;
        }
        let mut control_image = None;
        if let Some(control) = self.plan.control.clone() {
            let (next, image, outcome) = self.controlnet_stage(pipeline, &control)?;
            pipeline = next;
            control_image = image;
            outcomes.controlnet = outcome;
        }
        let images = self.generate_stage(&pipeline, control_image)?;

        let refiner = self.plan.refiner.clone();
        let upscale = self.plan.upscale;
        let mut finals = Vec::new();
        for image in images {
            let mut image = image;
            let mut image_outcomes = outcomes;
            if let Some(refiner) = refiner.as_deref() {
                let (next, outcome) = self.refine_stage(image, refiner)?;
                image = next;
                image_outcomes.refiner = outcome;
            }
            if let Some(factor) = upscale {
                let (next, outcome) = self.upscale_stage(image, factor)?;
                image = next;
                image_outcomes.upscale = outcome;
            }
            finals.push((image, image_outcomes, started.elapsed().as_secs_f64()));
        }

        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut saved = Vec::new();
        for (index, (image, image_outcomes, generation_time_s)) in
            finals.into_iter().enumerate()
        {
            let path = self.save_artifact(
                &stamp,
                index as u32 + 1,
                &image,
                &image_outcomes,
                generation_time_s,
            )?;
            saved.push(path);
        }

        let outcome = RunOutcome {
            saved,
            warning_count: self.ledger.warnings().len(),
            recovered_failure_count: self.ledger.failures().len(),
            elapsed_s: started.elapsed().as_secs_f64(),
        };
        self.events.append(
            "run_finished",
            map_object(json!({
                "images": outcome.saved.len(),
                "warnings": outcome.warning_count,
                "recovered_failures": outcome.recovered_failure_count,
                "elapsed_s": outcome.elapsed_s,
            })),
        )?;
        Ok(outcome)
    }

    fn load_base_pipeline(&mut self) -> Result<PipelineHandle> {
        let request = LoadRequest {
            model_id: self.plan.model_id.clone(),
            family: self.plan.family,
            control: None,
        };
        let backend = self.backend.as_ref();
        run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "base_pipeline_load",
            || backend.load_pipeline(&request),
        )
        .with_context(|| {
            format!(
                "failed to load base pipeline {} after {} attempts",
                self.plan.model_id, self.retry.max_attempts
            )
        })
    }

    fn lora_stage(
        &mut self,
        pipeline: &mut PipelineHandle,
        weights: &std::path::Path,
    ) -> Result<StageOutcome> {
        let backend = self.backend.as_ref();
        let result = run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "lora_load",
            || backend.attach_lora(pipeline, weights),
        );
        match result {
            Ok(()) => Ok(StageOutcome::Applied),
            Err(_) => {
                self.ledger
                    .record_warning("LoRA load failed; continuing without LoRA");
                self.events
                    .append("stage_skipped", stage_payload("lora_load"))?;
                Ok(StageOutcome::Failed)
            }
        }
    }

    fn controlnet_stage(
        &mut self,
        pipeline: PipelineHandle,
        control: &ControlInput,
    ) -> Result<(PipelineHandle, Option<ImageArtifact>, StageOutcome)> {
        let request = LoadRequest {
            model_id: self.plan.model_id.clone(),
            family: self.plan.family,
            control: Some(control.mode),
        };
        let backend = self.backend.as_ref();
        let result = run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "controlnet_load",
            || {
                let control_image = prepare_control_image(control.mode, &control.image_path)?;
                let conditioned = backend.load_pipeline(&request)?;
                Ok((conditioned, control_image))
            },
        );
        match result {
            Ok((mut conditioned, control_image)) => {
                conditioned.lora = pipeline.lora.clone();
                self.events.append(
                    "pipeline_released",
                    map_object(json!({ "model": pipeline.model_id.as_str() })),
                )?;
                if let Err(err) = self.backend.release_pipeline(pipeline) {
                    self.ledger
                        .record_warning(format!("pipeline release failed: {err:#}"));
                }
                Ok((conditioned, Some(control_image), StageOutcome::Applied))
            }
            Err(_) => {
                self.ledger
                    .record_warning("ControlNet setup failed; falling back to base generation");
                self.events
                    .append("stage_skipped", stage_payload("controlnet_load"))?;
                Ok((pipeline, None, StageOutcome::Failed))
            }
        }
    }

    fn generate_stage(
        &mut self,
        pipeline: &PipelineHandle,
        control_image: Option<ImageArtifact>,
    ) -> Result<Vec<ImageArtifact>> {
        let request = GenerateRequest {
            prompt: self.plan.prompt.clone(),
            negative_prompt: self.plan.negative_prompt.clone(),
            steps: self.plan.steps,
            seed: self.plan.seed,
            count: self.plan.count,
            control_image,
        };
        let backend = self.backend.as_ref();
        run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "image_generation",
            || backend.generate(pipeline, &request),
        )
        .context("image generation failed after retries")
    }

    fn refine_stage(
        &mut self,
        image: ImageArtifact,
        refiner: &str,
    ) -> Result<(ImageArtifact, StageOutcome)> {
        let request = RefineRequest::new(refiner, self.plan.prompt.clone());
        let backend = self.backend.as_ref();
        let result = run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "refinement",
            || backend.refine(&image, &request),
        );
        match result {
            Ok(refined) => Ok((refined, StageOutcome::Applied)),
            Err(_) => {
                self.ledger
                    .record_warning("refinement failed; keeping unrefined image");
                self.events
                    .append("stage_skipped", stage_payload("refinement"))?;
                Ok((image, StageOutcome::Failed))
            }
        }
    }

    fn upscale_stage(
        &mut self,
        image: ImageArtifact,
        factor: u32,
    ) -> Result<(ImageArtifact, StageOutcome)> {
        let request = UpscaleRequest::new(self.plan.prompt.clone(), factor);
        let backend = self.backend.as_ref();
        let result = run_stage(
            &self.events,
            &self.retry,
            &mut self.ledger,
            "upscaling",
            || backend.upscale(&image, &request),
        );
        match result {
            Ok(upscaled) => Ok((upscaled, StageOutcome::Applied)),
            Err(_) => {
                self.ledger
                    .record_warning("upscaling failed; keeping base resolution image");
                self.events
                    .append("stage_skipped", stage_payload("upscaling"))?;
                Ok((image, StageOutcome::Failed))
            }
        }
    }

    fn save_artifact(
        &mut self,
        stamp: &str,
        index: u32,
        image: &ImageArtifact,
        outcomes: &StageOutcomes,
        generation_time_s: f64,
    ) -> Result<PathBuf> {
        let filename = format!("output_{stamp}_{index:03}.{}", image.format);
        let image_path = self.plan.output_dir.join(&filename);
        fs::write(&image_path, &image.bytes)
            .with_context(|| format!("failed to write {}", image_path.display()))?;

        let sidecar_path = image_path.with_extension("json");
        let payload = build_sidecar(
            &self.run_id,
            self.backend.name(),
            &self.plan,
            &self.ledger,
            outcomes,
            index,
            &filename,
            generation_time_s,
        );
        write_sidecar(&sidecar_path, &payload)?;

        self.events.append(
            "artifact_saved",
            map_object(json!({ "filename": filename.as_str(), "index": index })),
        )?;
        Ok(image_path)
    }
}

fn run_stage<T>(
    events: &EventLog,
    retry: &RetryPolicy,
    ledger: &mut RunLedger,
    stage: &str,
    op: impl FnMut() -> Result<T>,
) -> Result<T> {
    events.append("stage_started", stage_payload(stage))?;
    let failures_before = ledger.failures().len();
    match run_with_retries(stage, retry, ledger, op) {
        Ok(value) => {
            if ledger.failures().len() > failures_before {
                events.append("stage_recovered", stage_payload(stage))?;
            }
            Ok(value)
        }
        Err(err) => {
            events.append("stage_failed", stage_payload(stage))?;
            Err(err)
        }
    }
}

fn stage_payload(stage: &str) -> EventPayload {
    map_object(json!({ "stage": stage }))
}

fn run_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("run-{}", &raw[..8])
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
