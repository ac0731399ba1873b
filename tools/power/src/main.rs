/// Power-analysis tool: runs a pilot ensemble of the buffer model and
/// reports the minimum number of draws needed to detect a relative change
/// in mean union area.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use footprint_core::{site, AnalysisConfig, PowerAnalyzer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "power", about = "Estimate the ensemble size from a pilot run")]
struct Args {
    /// Site table (JSON)
    #[arg(long)]
    sites: PathBuf,

    /// Optional analysis config (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output path for the pilot table and suggested ensemble size
    #[arg(short, long, default_value = "power.json")]
    output: PathBuf,

    /// Pilot draws
    #[arg(long)]
    pilot_draws: Option<usize>,

    /// Target power (1 − β)
    #[arg(long)]
    power: Option<f64>,

    /// Two-sided significance level α
    #[arg(long)]
    significance: Option<f64>,

    /// Detectable effect as a fraction of the pilot mean
    #[arg(long)]
    effect_fraction: Option<f64>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,
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
    if let Some(n) = args.pilot_draws {
        config.power.pilot_draws = n;
    }
    if let Some(p) = args.power {
        config.power.target_power = p;
    }
    if let Some(a) = args.significance {
        config.power.significance = a;
    }
    if let Some(f) = args.effect_fraction {
        config.power.effect_fraction = f;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
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
    let p = config.power;
    info!(sites = sites.len(), pilot_draws = p.pilot_draws, "running pilot");

    let analysis = PowerAnalyzer::from_config(&config)?
        .estimate_required_draws(&sites, p.pilot_draws, p.target_power, p.significance)
        .context("Power analysis failed")?;

    info!(
        mean_km2 = analysis.mean_km2,
        sd_km2 = analysis.sd_km2,
        required_draws = analysis.required_draws,
        "pilot summary"
    );
    if analysis.required_draws > config.n_draws {
        info!(
            configured = config.n_draws,
            required = analysis.required_draws,
            "configured ensemble is smaller than the suggested minimum"
        );
    }

    let json = serde_json::to_string_pretty(&analysis).context("Failed to serialize power analysis")?;
    fs::write(&args.output, json).with_context(|| format!("Cannot write {}", args.output.display()))?;
    Ok(())
}
