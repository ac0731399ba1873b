/// Overlap tool: intersects every persisted draw with a classified area layer
/// and writes the aggregated ensemble report as JSON.
///
/// The layer is either a `ClassRaster` JSON file or a single-band u8/u16
/// GeoTIFF; for GeoTIFF input the placement comes from the command line.
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use footprint_core::buffer::list_draw_files;
use footprint_core::{ensemble, site, ClassRaster, Crs, GeoTransform};
use tiff::decoder::{Decoder, DecodingResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "overlap",
    about = "Compute per-draw buffer/class overlaps and aggregate them across the ensemble"
)]
struct Args {
    /// Site table used for the simulation (tonnage is attached to the results)
    #[arg(long)]
    sites: PathBuf,

    /// Directory holding draw_NNNNN.json artifacts
    #[arg(long, default_value = "draws")]
    draws: PathBuf,

    /// Classification layer: ClassRaster JSON, or .tif/.tiff
    #[arg(long)]
    layer: PathBuf,

    /// Report output path
    #[arg(short, long, default_value = "report.json")]
    output: PathBuf,

    /// Classes to list in the class table even when never hit (comma-separated)
    #[arg(long, value_delimiter = ',')]
    classes: Vec<u16>,

    /// GeoTIFF only: x of the top-left corner
    #[arg(long, default_value = "0.0")]
    origin_x: f64,

    /// GeoTIFF only: y of the top-left corner
    #[arg(long, default_value = "0.0")]
    origin_y: f64,

    /// GeoTIFF only: cell width (and height unless --pixel-height is given)
    #[arg(long, default_value = "1.0")]
    pixel_size: f64,

    /// GeoTIFF only: cell height, positive
    #[arg(long)]
    pixel_height: Option<f64>,

    /// GeoTIFF only: CRS of the grid (EPSG:4326, EPSG:6933, EPSG:3857)
    #[arg(long, default_value = "EPSG:4326")]
    crs: Crs,

    /// GeoTIFF only: unclassified cell value
    #[arg(long, default_value = "0")]
    nodata: u16,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FOOTPRINT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

// ── Layer input ──────────────────────────────────────────────────────────────

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

fn read_tiff_layer(args: &Args) -> Result<ClassRaster> {
    let file = File::open(&args.layer).with_context(|| format!("Cannot open {}", args.layer.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("{} is not a valid TIFF", args.layer.display()))?;
    let (width, height) = decoder.dimensions().context("Cannot read TIFF dimensions")?;
    let data: Vec<u16> = match decoder.read_image().context("Cannot decode TIFF band")? {
        DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
        DecodingResult::U16(v) => v,
        _ => bail!("Unexpected pixel type in {} (expected u8 or u16 classes)", args.layer.display()),
    };
    let transform = GeoTransform {
        origin_x: args.origin_x,
        origin_y: args.origin_y,
        pixel_width: args.pixel_size,
        pixel_height: args.pixel_height.unwrap_or(args.pixel_size),
    };
    ClassRaster::new(data, width as usize, height as usize, transform, args.crs, args.nodata)
        .with_context(|| format!("Invalid layer {}", args.layer.display()))
}

fn read_layer(args: &Args) -> Result<ClassRaster> {
    if is_tiff(&args.layer) {
        read_tiff_layer(args)
    } else {
        ClassRaster::load(&args.layer).with_context(|| format!("Cannot load layer {}", args.layer.display()))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let sites = site::load_sites(&args.sites)
        .with_context(|| format!("Cannot load sites from {}", args.sites.display()))?;
    let files = list_draw_files(&args.draws)
        .with_context(|| format!("No draws to process in {}", args.draws.display()))?;
    let layer = read_layer(&args)?;
    info!(
        draws = files.len(),
        width = layer.width,
        height = layer.height,
        crs = %layer.crs,
        "computing overlaps"
    );

    let run = ensemble::run_overlaps(&files, &layer);
    let report = run
        .report(&sites, args.classes.iter().copied())
        .context("Ensemble produced no usable draw; see the warnings above")?;

    for row in &report.class {
        info!(
            class = row.class,
            mean_km2 = row.area_km2.mean,
            ci_low = row.area_km2.ci_low,
            ci_high = row.area_km2.ci_high,
            "class overlap"
        );
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    fs::write(&args.output, json).with_context(|| format!("Cannot write {}", args.output.display()))?;
    info!(
        draws = report.n_draws,
        failed = report.failed_draws.len(),
        output = %args.output.display(),
        "report written"
    );
    Ok(())
}
