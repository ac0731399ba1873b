//! Ensemble sizing from a pilot run.
//!
//! The pilot reuses the buffer model on its own random streams, measures the
//! union area of every pilot draw, and sizes the production ensemble with a
//! one-sample two-sided t-test able to detect a shift of `effect_fraction`
//! times the pilot mean.

use geo::Area;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::{debug, info};

use crate::aggregate::stats::{mean, sample_sd};
use crate::buffer::BufferSimulator;
use crate::config::AnalysisConfig;
use crate::error::{FootprintError, Result};
use crate::overlap::union_all;
use crate::policy::MultiplierClip;
use crate::rng::StreamDomain;
use crate::site::Site;

/// Smallest ensemble ever suggested.
pub const MIN_DRAWS: usize = 2;

const MAX_ITERATIONS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotDraw {
    pub draw: usize,
    pub union_area_km2: f64,
    /// Sites whose multiplier hit the lower / upper bound.
    pub clipped_low: usize,
    pub clipped_high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerAnalysis {
    pub pilot: Vec<PilotDraw>,
    pub mean_km2: f64,
    pub sd_km2: f64,
    pub effect_km2: f64,
    pub significance: f64,
    pub power: f64,
    pub required_draws: usize,
}

fn invalid(name: &'static str, reason: impl Into<String>) -> FootprintError {
    FootprintError::InvalidParameter { name, reason: reason.into() }
}

fn check_probability(name: &'static str, p: f64) -> Result<()> {
    if p > 0.0 && p < 1.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must lie in (0, 1), got {p}")))
    }
}

/// Draws needed by a one-sample two-sided t-test with standard deviation
/// `sd` to detect `effect` at level `significance` with the given power.
///
/// Starts from the normal approximation and iterates on Student-t quantiles
/// with n − 1 degrees of freedom until n stops changing.
pub fn required_sample_size(sd: f64, effect: f64, significance: f64, power: f64) -> Result<usize> {
    check_probability("significance", significance)?;
    check_probability("power", power)?;
    if !(effect.is_finite() && effect > 0.0) {
        return Err(invalid("effect", format!("must be positive, got {effect}")));
    }
    if !(sd.is_finite() && sd >= 0.0) {
        return Err(invalid("sd", format!("must be finite and >= 0, got {sd}")));
    }
    if sd == 0.0 {
        return Ok(MIN_DRAWS);
    }

    let size = |quantiles: f64| -> usize {
        let n = ((quantiles * sd / effect).powi(2)).ceil();
        (n as usize).max(MIN_DRAWS)
    };

    let z = Normal::new(0.0, 1.0).map_err(|e| invalid("normal", e.to_string()))?;
    let mut n = size(z.inverse_cdf(1.0 - significance / 2.0) + z.inverse_cdf(power));

    for _ in 0..MAX_ITERATIONS {
        let t = StudentsT::new(0.0, 1.0, (n - 1) as f64).map_err(|e| invalid("students_t", e.to_string()))?;
        let next = size(t.inverse_cdf(1.0 - significance / 2.0) + t.inverse_cdf(power));
        if next == n {
            break;
        }
        n = next;
    }
    Ok(n)
}

// ── Analyzer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PowerAnalyzer {
    sim: BufferSimulator,
    effect_fraction: f64,
}

impl PowerAnalyzer {
    pub fn new(sim: BufferSimulator, effect_fraction: f64) -> Result<Self> {
        if !(effect_fraction.is_finite() && effect_fraction > 0.0) {
            return Err(invalid("effect_fraction", format!("must be positive, got {effect_fraction}")));
        }
        Ok(Self { sim, effect_fraction })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Self::new(BufferSimulator::from_config(config)?, config.power.effect_fraction)
    }

    /// One pilot draw: union area of all buffers and multiplier clip counts.
    pub fn pilot_draw(&self, draw: usize, sites: &[Site]) -> Result<PilotDraw> {
        let set = self.sim.generate_in(StreamDomain::Pilot, draw, sites)?;
        let count = |clip: MultiplierClip| set.buffers.iter().filter(|b| b.clip == clip).count();
        let union = union_all(set.buffers.iter().map(|b| b.polygon.clone()));
        Ok(PilotDraw {
            draw,
            union_area_km2: union.unsigned_area() / 1e6,
            clipped_low: count(MultiplierClip::Lower),
            clipped_high: count(MultiplierClip::Upper),
        })
    }

    pub fn estimate_required_draws(
        &self,
        sites: &[Site],
        pilot_n: usize,
        target_power: f64,
        significance: f64,
    ) -> Result<PowerAnalysis> {
        if pilot_n < 2 {
            return Err(invalid("pilot_n", format!("need at least 2 pilot draws, got {pilot_n}")));
        }
        check_probability("target_power", target_power)?;
        check_probability("significance", significance)?;

        let pilot = (0..pilot_n)
            .map(|draw| self.pilot_draw(draw, sites))
            .collect::<Result<Vec<_>>>()?;
        let areas: Vec<f64> = pilot.iter().map(|p| p.union_area_km2).collect();
        let mean_km2 = mean(&areas);
        let sd_km2 = sample_sd(&areas, mean_km2);
        debug!(pilot_n, mean_km2, sd_km2, "pilot complete");

        if mean_km2 <= 0.0 {
            return Err(invalid("pilot_mean", "pilot union area is zero"));
        }
        let effect_km2 = self.effect_fraction * mean_km2;
        let required_draws = required_sample_size(sd_km2, effect_km2, significance, target_power)?;
        info!(required_draws, target_power, significance, "suggested minimum ensemble size");

        Ok(PowerAnalysis {
            pilot,
            mean_km2,
            sd_km2,
            effect_km2,
            significance,
            power: target_power,
            required_draws,
        })
    }
}
