use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tryon_contracts::models::ModelRegistry;
use tryon_contracts::{
    build_request, AppStatus, GenerationSettings, ImageCount, ImageRole, QualityTier, Resolution,
};
use tryon_engine::{EngineConfig, TryOnEngine};

#[derive(Debug, Parser)]
#[command(name = "tryon-rs", version, about = "Virtual try-on generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch the request and write the results into --out.
    Generate(GenerateArgs),
    /// Print the request that would be sent, with image bytes omitted.
    Plan(TryOnArgs),
}

#[derive(Debug, Args)]
struct TryOnArgs {
    #[arg(long)]
    garment: Option<PathBuf>,
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long)]
    scene: Option<PathBuf>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    count: u8,
    #[arg(long, default_value = "fast")]
    quality: QualityTier,
    #[arg(long, default_value = "1K")]
    resolution: Resolution,
    #[arg(long)]
    fast_model: Option<String>,
    #[arg(long)]
    pro_model: Option<String>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    tryon: TryOnArgs,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    timeout_secs: Option<f64>,
    #[arg(long, default_value = "gemini")]
    backend: String,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Plan(args) => run_plan(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut settings = settings_from_args(&args.tryon)?;
    settings.credential = args.api_key.clone();

    let config = EngineConfig::from_env()
        .with_api_base(args.api_base.as_deref())
        .with_timeout_secs(args.timeout_secs);
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = TryOnEngine::new(&args.out, &events_path, config, &args.backend)?;
    engine.set_model_registry(model_registry(&args.tryon));

    let refused = engine.generate(&settings).err();
    if let Some(err) = refused {
        engine.finish()?;
        return Err(err.into());
    }
    let saved = engine.save_results()?;
    let summary_path = engine.finish()?;

    for path in &saved {
        println!("{}", path.display());
    }
    let session = engine.session();
    tracing::info!(
        run_id = engine.run_id(),
        summary = %summary_path.display(),
        "run finished"
    );
    if session.status == AppStatus::Error {
        eprintln!(
            "tryon-rs: {}",
            session.message.as_deref().unwrap_or("generation failed")
        );
        return Ok(1);
    }
    Ok(0)
}

fn run_plan(args: TryOnArgs) -> Result<i32> {
    let settings = settings_from_args(&args)?;
    let request = build_request(&settings, &model_registry(&args))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&request.sanitized_payload())?
    );
    Ok(0)
}

fn settings_from_args(args: &TryOnArgs) -> Result<GenerationSettings> {
    let mut settings = GenerationSettings::new();
    for (role, path) in [
        (ImageRole::Garment, &args.garment),
        (ImageRole::Model, &args.model),
        (ImageRole::Scene, &args.scene),
    ] {
        if let Some(path) = path {
            load_image(&mut settings, role, path)?;
        }
    }
    settings.instruction = args.prompt.clone();
    settings.count = ImageCount::new(args.count)?;
    settings.quality = args.quality;
    settings.resolution = args.resolution;
    Ok(settings)
}

fn load_image(settings: &mut GenerationSettings, role: ImageRole, path: &Path) -> Result<()> {
    settings
        .load(role, path)
        .with_context(|| format!("failed to load {role} image {}", path.display()))
}

fn model_registry(args: &TryOnArgs) -> ModelRegistry {
    let mut models = ModelRegistry::default();
    if let Some(name) = &args.fast_model {
        models = models.with_model(QualityTier::Fast, name.as_str());
    }
    if let Some(name) = &args.pro_model {
        models = models.with_model(QualityTier::Pro, name.as_str());
    }
    models
}
