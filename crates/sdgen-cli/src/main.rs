use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use sdgen_contracts::plan::{resolve, GenerationRequest, DEFAULT_OUTPUT_DIR, DEFAULT_SEED};
use sdgen_engine::backend::DiffusionBackend;
use sdgen_engine::backends::dryrun::DryrunBackend;
use sdgen_engine::backends::hf::HfInferenceBackend;
use sdgen_engine::{GenerationEngine, RunOutcome};

#[derive(Debug, Parser)]
#[command(name = "sdgen", version, about = "Robust text-to-image generation front end")]
struct Cli {
    /// Text prompt for generation
    prompt: String,
    /// Base model identifier
    #[arg(long)]
    model: Option<String>,
    /// Output directory for images and metadata sidecars
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,
    /// Number of images to generate
    #[arg(long, default_value_t = 1)]
    n: i64,
    /// Number of inference steps
    #[arg(long)]
    steps: Option<u32>,
    /// Random seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: i64,
    /// Negative prompt
    #[arg(long)]
    negative_prompt: Option<String>,
    /// Style preset (anime, fantasy, scifi, realism)
    #[arg(long)]
    style: Option<String>,
    /// Quality preset (draft, standard, high, ultra)
    #[arg(long)]
    quality: Option<String>,
    /// LoRA weights path or hub identifier
    #[arg(long)]
    lora: Option<PathBuf>,
    /// Pose control image
    #[arg(long)]
    pose: Option<PathBuf>,
    /// Depth control image
    #[arg(long)]
    depth: Option<PathBuf>,
    /// Canny edge control image
    #[arg(long)]
    canny: Option<PathBuf>,
    /// Upscale factor (2 or 4)
    #[arg(long)]
    upscale: Option<u32>,
    /// Refiner model identifier
    #[arg(long)]
    refiner: Option<String>,
    /// Generation backend (hf or dryrun)
    #[arg(long, default_value = "hf")]
    backend: String,
    /// Event log path (defaults to <output>/events.jsonl)
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sdgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let plan = resolve(&request_from_cli(&cli))?;
    let backend = select_backend(&cli.backend)?;
    let mut engine = GenerationEngine::new(plan, backend, cli.events.clone())?;
    let outcome = engine.run()?;
    print_summary(&outcome);
    Ok(0)
}

fn request_from_cli(cli: &Cli) -> GenerationRequest {
    GenerationRequest {
        prompt: cli.prompt.clone(),
        model: cli.model.clone(),
        output_dir: cli.output.clone(),
        count: cli.n,
        steps: cli.steps,
        seed: cli.seed,
        negative_prompt: cli.negative_prompt.clone(),
        style: cli.style.clone(),
        quality: cli.quality.clone(),
        lora: cli.lora.clone(),
        pose: cli.pose.clone(),
        depth: cli.depth.clone(),
        canny: cli.canny.clone(),
        upscale: cli.upscale,
        refiner: cli.refiner.clone(),
    }
}

fn select_backend(name: &str) -> Result<Box<dyn DiffusionBackend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "hf" => Ok(Box::new(HfInferenceBackend::new())),
        "dryrun" => Ok(Box::new(DryrunBackend)),
        other => bail!("unknown backend '{other}' (expected hf or dryrun)"),
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!("generation complete");
    println!("  time: {:.2}s", outcome.elapsed_s);
    println!("  images: {}", outcome.saved.len());
    if outcome.warning_count > 0 {
        println!("  warnings: {}", outcome.warning_count);
    }
    if outcome.recovered_failure_count > 0 {
        println!("  failures (recovered): {}", outcome.recovered_failure_count);
    }
    for path in &outcome.saved {
        println!("  saved: {}", path.display());
    }
}
