/// Footprint simulation tool: reads a site table, draws one buffer per site
/// per draw, and writes `draw_NNNNN.json` artifacts for the overlap tool.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use footprint_core::{ensemble, site, AnalysisConfig, BufferSimulator};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "simulate",
    about = "Simulate stochastic mining-footprint buffers for every site and draw"
)]
struct Args {
    /// Site table (JSON array of {id, lon, lat, tonnage, deposit_type})
    #[arg(long)]
    sites: PathBuf,

    /// Optional analysis config (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for per-draw artifacts (created if absent)
    #[arg(short, long, default_value = "draws")]
    output: PathBuf,

    /// Number of draws
    #[arg(long)]
    n_draws: Option<usize>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum positional shift per axis, metres
    #[arg(long)]
    max_shift_m: Option<f64>,

    /// Vertices per buffer circle
    #[arg(long)]
    segments: Option<usize>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FOOTPRINT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(args: &Args) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Cannot load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(n) = args.n_draws {
        config.n_draws = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(shift) = args.max_shift_m {
        config.max_shift_m = shift;
    }
    if let Some(segments) = args.segments {
        config.circle_segments = segments;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    let sites = site::load_sites(&args.sites)
        .with_context(|| format!("Cannot load sites from {}", args.sites.display()))?;
    info!(sites = sites.len(), draws = config.n_draws, seed = config.seed, "starting simulation");

    let sim = BufferSimulator::from_config(&config)?;
    let paths = ensemble::simulate_draws(&sim, &sites, config.n_draws, &args.output)
        .with_context(|| format!("Failed writing draws to {}", args.output.display()))?;

    info!(written = paths.len(), output = %args.output.display(), "done");
    Ok(())
}
