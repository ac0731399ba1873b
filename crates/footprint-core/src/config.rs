//! Run configuration.
//!
//! Loaded from an optional JSON file; every field has a default, so a
//! partial file only overrides what it names. Tools apply their CLI flags on
//! top of the loaded value and call `validate` before any work starts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_CIRCLE_SEGMENTS;
use crate::error::{FootprintError, Result};
use crate::policy::SamplingPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub seed: u64,
    /// Ensemble size.
    pub n_draws: usize,
    /// Maximum positional jitter per axis, metres.
    pub max_shift_m: f64,
    /// Vertices per buffer circle.
    pub circle_segments: usize,
    pub policy: SamplingPolicy,
    pub power: PowerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub pilot_draws: usize,
    /// 1 − β.
    pub target_power: f64,
    /// α, two-sided.
    pub significance: f64,
    /// Detectable effect as a fraction of the pilot mean union area.
    pub effect_fraction: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_draws: 1000,
            max_shift_m: 1000.0,
            circle_segments: DEFAULT_CIRCLE_SEGMENTS,
            policy: SamplingPolicy::default(),
            power: PowerConfig::default(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            pilot_draws: 100,
            target_power: 0.95,
            significance: 0.05,
            effect_fraction: 0.05,
        }
    }
}

fn open_unit(name: &'static str, v: f64) -> Result<()> {
    if v > 0.0 && v < 1.0 {
        Ok(())
    } else {
        Err(FootprintError::InvalidParameter {
            name,
            reason: format!("must lie in (0, 1), got {v}"),
        })
    }
}

impl PowerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pilot_draws < 2 {
            return Err(FootprintError::InvalidParameter {
                name: "pilot_draws",
                reason: format!("need at least 2 pilot draws, got {}", self.pilot_draws),
            });
        }
        open_unit("target_power", self.target_power)?;
        open_unit("significance", self.significance)?;
        if !(self.effect_fraction.is_finite() && self.effect_fraction > 0.0) {
            return Err(FootprintError::InvalidParameter {
                name: "effect_fraction",
                reason: format!("must be positive, got {}", self.effect_fraction),
            });
        }
        Ok(())
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FootprintError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| FootprintError::json(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_draws == 0 {
            return Err(FootprintError::InvalidParameter {
                name: "n_draws",
                reason: "ensemble must contain at least one draw".into(),
            });
        }
        if !(self.max_shift_m.is_finite() && self.max_shift_m >= 0.0) {
            return Err(FootprintError::InvalidParameter {
                name: "max_shift_m",
                reason: format!("must be finite and >= 0, got {}", self.max_shift_m),
            });
        }
        if self.circle_segments < 8 {
            return Err(FootprintError::InvalidParameter {
                name: "circle_segments",
                reason: format!("need at least 8 vertices, got {}", self.circle_segments),
            });
        }
        self.policy.validate()?;
        self.power.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"n_draws": 250, "power": {"target_power": 0.8}}"#).unwrap();
        assert_eq!(cfg.n_draws, 250);
        assert_eq!(cfg.power.target_power, 0.8);
        assert_eq!(cfg.power.significance, 0.05);
        assert_eq!(cfg.policy, SamplingPolicy::default());
    }

    #[test]
    fn out_of_range_power_rejected() {
        let mut cfg = AnalysisConfig::default();
        cfg.power.target_power = 1.0;
        assert!(matches!(
            cfg.validate(),
            Err(FootprintError::InvalidParameter { name: "target_power", .. })
        ));
    }

    #[test]
    fn zero_draws_rejected() {
        let cfg = AnalysisConfig { n_draws: 0, ..AnalysisConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
