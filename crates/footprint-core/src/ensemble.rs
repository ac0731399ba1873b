//! Draw-level driver: simulate and persist draws, then compute overlaps for
//! every draw in parallel and reduce them into one ensemble value.
//!
//! A draw that fails to load or to compute, or panics while computing, is
//! logged and recorded as a `DrawFailure`; the rest of the ensemble is
//! unaffected. An ensemble with no successful draw cannot be reported.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

#[cfg(feature = "threading")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregate::{DrawFailure, DrawOverlaps, EnsembleOverlaps, Report, ResultAggregator};
use crate::buffer::{draw_file_name, BufferDrawSet, BufferSimulator};
use crate::error::{FootprintError, Result};
use crate::overlap::compute_overlaps;
use crate::raster::ClassRaster;
use crate::site::Site;

/// Merged overlaps of the successful draws plus the failed ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsembleRun {
    pub overlaps: EnsembleOverlaps,
    pub failures: Vec<DrawFailure>,
}

impl EnsembleRun {
    fn from_outcome(draw: usize, outcome: Result<DrawOverlaps>) -> Self {
        match outcome {
            Ok(overlaps) => Self { overlaps, failures: Vec::new() },
            Err(e) => {
                warn!(draw, error = %e, "draw excluded from ensemble");
                Self {
                    overlaps: DrawOverlaps::empty(),
                    failures: vec![DrawFailure { draw, reason: e.to_string() }],
                }
            }
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.overlaps = self.overlaps.merge(other.overlaps);
        self.failures.extend(other.failures);
        self
    }

    /// Aggregate into the report tables; failed draws are listed, not counted.
    /// An ensemble in which no draw succeeded is an error, not a zero report.
    pub fn report(&self, sites: &[Site], classes: impl IntoIterator<Item = u16>) -> Result<Report> {
        if self.overlaps.n_draws() == 0 {
            return Err(FootprintError::NoUsableDraws { failed: self.failures.len() });
        }
        let mut report = ResultAggregator::new(sites, classes).aggregate(&self.overlaps);
        report.failed_draws = self.failures.clone();
        Ok(report)
    }
}

// ── Simulation ───────────────────────────────────────────────────────────────

/// Generate draws `0..n_draws` and write one artifact per draw into `dir`.
pub fn simulate_draws(sim: &BufferSimulator, sites: &[Site], n_draws: usize, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| FootprintError::io(dir, e))?;

    let write = |draw: usize| -> Result<PathBuf> {
        let set = sim.generate_draw(draw, sites)?;
        let path = dir.join(draw_file_name(draw));
        set.save(&path)?;
        debug!(draw, buffers = set.buffers.len(), "draw written");
        Ok(path)
    };

    #[cfg(feature = "threading")]
    let paths: Result<Vec<PathBuf>> = (0..n_draws).into_par_iter().map(write).collect();
    #[cfg(not(feature = "threading"))]
    let paths: Result<Vec<PathBuf>> = (0..n_draws).map(write).collect();

    let paths = paths?;
    info!(draws = paths.len(), sites = sites.len(), dir = %dir.display(), "simulation complete");
    Ok(paths)
}

// ── Overlaps ─────────────────────────────────────────────────────────────────

fn draw_overlaps(set: &BufferDrawSet, layer: &ClassRaster) -> Result<DrawOverlaps> {
    let records = compute_overlaps(set, layer)?;
    debug!(draw = set.draw, records = records.len(), "draw overlaps computed");
    Ok(DrawOverlaps::from_records(set.draw, &records))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run<T, F>(items: &[T], layer: &ClassRaster, draw_of: fn(&T) -> usize, load: F) -> EnsembleRun
where
    T: Sync,
    F: Fn(&T) -> Result<BufferDrawSet> + Sync,
{
    let one = |item: &T| {
        let draw = draw_of(item);
        // A panic in the geometry backend fails this draw only.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            load(item).and_then(|set| draw_overlaps(&set, layer))
        }))
        .unwrap_or_else(|payload| {
            Err(FootprintError::DrawPanicked { draw, message: panic_message(payload.as_ref()) })
        });
        EnsembleRun::from_outcome(draw, outcome)
    };

    #[cfg(feature = "threading")]
    let mut out = items.par_iter().map(one).reduce(EnsembleRun::default, EnsembleRun::merge);
    #[cfg(not(feature = "threading"))]
    let mut out = items.iter().map(one).fold(EnsembleRun::default(), EnsembleRun::merge);

    out.failures.sort_by_key(|f| f.draw);
    info!(
        draws = out.overlaps.n_draws(),
        failed = out.failures.len(),
        "ensemble overlaps complete"
    );
    out
}

/// Overlaps for persisted draws, as returned by `buffer::list_draw_files`.
pub fn run_overlaps(files: &[(usize, PathBuf)], layer: &ClassRaster) -> EnsembleRun {
    run(files, layer, |(draw, _)| *draw, |(_, path)| BufferDrawSet::load(path))
}

/// Overlaps for draws already in memory.
pub fn run_overlaps_in_memory(sets: &[BufferDrawSet], layer: &ClassRaster) -> EnsembleRun {
    run(sets, layer, |set| set.draw, |set| Ok(set.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::list_draw_files;
    use crate::crs::Crs;
    use crate::policy::SamplingPolicy;
    use crate::raster::GeoTransform;

    fn sites() -> Vec<Site> {
        vec![
            Site::new("west", 10.2, 0.3, 5.0e5, "laterite"),
            Site::new("east", 10.7, 0.6, 2.0e6, "magmatic_sulphide"),
            Site::new("far", 60.0, 40.0, 1.0e5, "laterite"),
        ]
    }

    /// 1°×1° WGS84 layer at (10..11, 0..1): class 1 west half, class 2 east half.
    fn layer() -> ClassRaster {
        let t = GeoTransform { origin_x: 10.0, origin_y: 1.0, pixel_width: 0.01, pixel_height: 0.01 };
        let mut r = ClassRaster::empty(100, 100, t, Crs::Wgs84, 0).unwrap();
        for row in 0..100 {
            for col in 0..100 {
                r.set(row, col, if col < 50 { 1 } else { 2 });
            }
        }
        r
    }

    fn sim() -> BufferSimulator {
        BufferSimulator::new(SamplingPolicy::default(), 800.0, 11).unwrap()
    }

    #[test]
    fn persisted_and_in_memory_runs_agree() {
        let dir = tempfile::tempdir().unwrap();
        simulate_draws(&sim(), &sites(), 4, dir.path()).unwrap();
        let files = list_draw_files(dir.path()).unwrap();
        assert_eq!(files.len(), 4);

        let sets: Vec<BufferDrawSet> = (0..4).map(|d| sim().generate_draw(d, &sites()).unwrap()).collect();
        let from_disk = run_overlaps(&files, &layer());
        let in_memory = run_overlaps_in_memory(&sets, &layer());
        assert_eq!(from_disk, in_memory);
        assert_eq!(from_disk.overlaps.n_draws(), 4);
    }

    #[test]
    fn failing_draw_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        simulate_draws(&sim(), &sites(), 3, dir.path()).unwrap();
        fs::write(dir.path().join(draw_file_name(1)), "{ not json").unwrap();

        let run = run_overlaps(&list_draw_files(dir.path()).unwrap(), &layer());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].draw, 1);
        assert_eq!(run.overlaps.draws().iter().copied().collect::<Vec<_>>(), [0, 2]);

        let report = run.report(&sites(), []).unwrap();
        assert_eq!(report.n_draws, 2);
        assert_eq!(report.failed_draws.len(), 1);
        assert_eq!(report.per_draw_site.len(), 2 * 3);
    }

    #[test]
    fn ensemble_without_a_usable_draw_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        for draw in 0..2 {
            fs::write(dir.path().join(draw_file_name(draw)), "{ not json").unwrap();
        }
        let run = run_overlaps(&list_draw_files(dir.path()).unwrap(), &layer());
        assert_eq!(run.overlaps.n_draws(), 0);
        assert_eq!(run.failures.len(), 2);
        assert!(matches!(
            run.report(&sites(), []),
            Err(FootprintError::NoUsableDraws { failed: 2 })
        ));
    }

    #[test]
    fn panicking_draw_is_isolated() {
        let draws = [0usize, 1, 2];
        let out = run(&draws, &layer(), |d| *d, |&d| {
            if d == 1 {
                panic!("geometry backend blew up");
            }
            sim().generate_draw(d, &sites())
        });
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].draw, 1);
        assert!(out.failures[0].reason.contains("geometry backend blew up"));
        assert_eq!(out.overlaps.draws().iter().copied().collect::<Vec<_>>(), [0, 2]);
    }

    #[test]
    fn site_outside_layer_reports_zero() {
        let sets: Vec<BufferDrawSet> = (0..3).map(|d| sim().generate_draw(d, &sites()).unwrap()).collect();
        let report = run_overlaps_in_memory(&sets, &layer()).report(&sites(), [1, 2]).unwrap();
        let far = report.site.iter().find(|r| r.site_id == "far").unwrap();
        assert_eq!(far.area_km2.n, 3);
        assert_eq!(far.area_km2.max, 0.0);
        let west = report.site.iter().find(|r| r.site_id == "west").unwrap();
        assert!(west.area_km2.min > 0.0);
    }
}
