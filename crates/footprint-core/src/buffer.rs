//! Stochastic footprint buffers.
//!
//! One draw = one circular buffer per site. For every site independently:
//!   1. shift the site by (dx, dy) ground metres east/north, each axis
//!      uniform on [-max_shift, max_shift],
//!   2. sample a footprint area from the deposit-type policy,
//!   3. emit a circle of radius sqrt(area / π) around the shifted centre.
//!
//! Shift and circle are laid out in ground metres around the site
//! (`crs::offset_lonlat`), then stored on the equal-area grid so that polygon
//! areas are in m² and circles stay circles on the ground at any latitude.
//! Each (draw, site) pair has its own RNG stream, which keeps draws
//! reproducible under any thread schedule.

use std::fs;
use std::path::{Path, PathBuf};

use geo::{Coord, LineString, MapCoords, Polygon};
use rand::Rng;
#[cfg(feature = "threading")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::crs::{offset_lonlat, Crs};
use crate::error::{FootprintError, Result};
use crate::policy::{AreaSample, MultiplierClip, SamplingPolicy};
use crate::rng::{stream_rng, StreamDomain};
use crate::site::Site;

/// Default number of vertices used to approximate a circle.
pub const DEFAULT_CIRCLE_SEGMENTS: usize = 64;

/// One site's footprint in one draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDraw {
    pub draw: usize,
    pub site_id: String,
    /// Shifted centre on the equal-area grid (m).
    pub center: Coord<f64>,
    /// Applied offset (dx, dy), ground metres east/north.
    pub shift: (f64, f64),
    pub radius_m: f64,
    pub area_km2: f64,
    pub multiplier: f64,
    pub clip: MultiplierClip,
    /// Canonical policy entry that produced the area.
    pub policy: String,
    pub polygon: Polygon<f64>,
}

/// All buffers of one draw: the persisted per-draw artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDrawSet {
    pub draw: usize,
    pub crs: Crs,
    pub buffers: Vec<BufferDraw>,
}

/// Per-site sampling result before the polygon is built.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSample {
    pub dx: f64,
    pub dy: f64,
    /// Shifted centre, degrees.
    pub lon: f64,
    pub lat: f64,
    pub area: AreaSample,
}

/// Vertex radius factor that gives a regular `n`-gon the area of the circle
/// it approximates.
pub fn area_preserving_factor(n: usize) -> f64 {
    let n = n.max(3) as f64;
    let step = std::f64::consts::TAU / n;
    (std::f64::consts::TAU / (n * step.sin())).sqrt()
}

/// Regular polygon with the same area as the circle of `radius` around
/// `center`. The ring is closed and counter-clockwise.
pub fn circle_polygon(center: Coord<f64>, radius: f64, segments: usize) -> Polygon<f64> {
    let n = segments.max(3);
    let step = std::f64::consts::TAU / n as f64;
    let r = radius * area_preserving_factor(n);
    let mut ring: Vec<Coord<f64>> = (0..n)
        .map(|k| {
            let a = k as f64 * step;
            Coord {
                x: center.x + r * a.cos(),
                y: center.y + r * a.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), vec![])
}

/// Circle of `radius_m` ground metres around (lon, lat), built in the local
/// east/north frame and projected into `crs`.
pub fn ground_circle(lon: f64, lat: f64, radius_m: f64, segments: usize, crs: Crs) -> Polygon<f64> {
    circle_polygon(Coord { x: 0.0, y: 0.0 }, radius_m, segments).map_coords(|c| {
        let (vlon, vlat) = offset_lonlat(lon, lat, c.x, c.y);
        crs.project(vlon, vlat)
    })
}

// ── Simulator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BufferSimulator {
    policy: SamplingPolicy,
    max_shift_m: f64,
    segments: usize,
    seed: u64,
}

impl BufferSimulator {
    pub fn new(policy: SamplingPolicy, max_shift_m: f64, seed: u64) -> Result<Self> {
        if !(max_shift_m.is_finite() && max_shift_m >= 0.0) {
            return Err(FootprintError::InvalidParameter {
                name: "max_shift_m",
                reason: format!("must be finite and >= 0, got {max_shift_m}"),
            });
        }
        policy.validate()?;
        Ok(Self {
            policy,
            max_shift_m,
            segments: DEFAULT_CIRCLE_SEGMENTS,
            seed,
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self::new(config.policy.clone(), config.max_shift_m, config.seed)?
            .with_segments(config.circle_segments))
    }

    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments.max(3);
        self
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    pub fn max_shift_m(&self) -> f64 {
        self.max_shift_m
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Shift and area for site `index` in `draw`, from its own random stream.
    pub fn sample_site(&self, domain: StreamDomain, draw: usize, index: usize, site: &Site) -> Result<SiteSample> {
        let mut rng = stream_rng(self.seed, domain, draw, index);
        let (dx, dy) = if self.max_shift_m > 0.0 {
            (
                rng.gen_range(-self.max_shift_m..=self.max_shift_m),
                rng.gen_range(-self.max_shift_m..=self.max_shift_m),
            )
        } else {
            (0.0, 0.0)
        };
        let area = self.policy.sample(&site.deposit_type, site.tonnage, &mut rng)?;
        let (lon, lat) = offset_lonlat(site.lon, site.lat, dx, dy);
        Ok(SiteSample { dx, dy, lon, lat, area })
    }

    fn buffer_for(&self, domain: StreamDomain, draw: usize, index: usize, site: &Site) -> Result<BufferDraw> {
        let s = self.sample_site(domain, draw, index, site)?;
        Ok(BufferDraw {
            draw,
            site_id: site.id.clone(),
            center: Crs::EqualArea.project(s.lon, s.lat),
            shift: (s.dx, s.dy),
            radius_m: s.area.radius_m,
            area_km2: s.area.area_km2,
            multiplier: s.area.multiplier,
            clip: s.area.clip,
            polygon: ground_circle(s.lon, s.lat, s.area.radius_m, self.segments, Crs::EqualArea),
            policy: s.area.policy,
        })
    }

    /// Buffers for every site in `draw`, in site order.
    pub fn generate_draw(&self, draw: usize, sites: &[Site]) -> Result<BufferDrawSet> {
        self.generate_in(StreamDomain::Draws, draw, sites)
    }

    pub(crate) fn generate_in(&self, domain: StreamDomain, draw: usize, sites: &[Site]) -> Result<BufferDrawSet> {
        #[cfg(feature = "threading")]
        let buffers: Result<Vec<BufferDraw>> = sites
            .par_iter()
            .enumerate()
            .map(|(i, site)| self.buffer_for(domain, draw, i, site))
            .collect();
        #[cfg(not(feature = "threading"))]
        let buffers: Result<Vec<BufferDraw>> = sites
            .iter()
            .enumerate()
            .map(|(i, site)| self.buffer_for(domain, draw, i, site))
            .collect();

        Ok(BufferDrawSet {
            draw,
            crs: Crs::EqualArea,
            buffers: buffers?,
        })
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

pub fn draw_file_name(draw: usize) -> String {
    format!("draw_{draw:05}.json")
}

fn parse_draw_file_name(name: &str) -> Option<usize> {
    name.strip_prefix("draw_")?.strip_suffix(".json")?.parse().ok()
}

impl BufferDrawSet {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).map_err(|e| FootprintError::json(path, e))?;
        fs::write(path, json).map_err(|e| FootprintError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FootprintError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| FootprintError::json(path, e))
    }
}

/// Draw artifacts in `dir`, sorted by draw index. An empty directory is fatal.
pub fn list_draw_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| FootprintError::io(dir, e))? {
        let entry = entry.map_err(|e| FootprintError::io(dir, e))?;
        let path = entry.path();
        let Some(draw) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_draw_file_name)
        else {
            continue;
        };
        out.push((draw, path));
    }
    if out.is_empty() {
        return Err(FootprintError::NoDraws(dir.to_path_buf()));
    }
    out.sort_by_key(|(d, _)| *d);
    Ok(out)
}
