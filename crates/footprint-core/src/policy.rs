//! Deposit-type-conditioned footprint area sampling.
//!
//! Each deposit type owns a lognormal distribution of the area multiplier
//! (m² of disturbed land per tonne of ore) with hard clip bounds, and an
//! independent bound on the final footprint area. Labels that resolve to no
//! entry fall back to a uniform choice among the fallback entries, drawn
//! afresh on every call.
//!
//! The table is plain data (serde), so adding a deposit type is a
//! configuration change.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};

use crate::error::{FootprintError, Result};

pub const MAGMATIC_SULPHIDE: &str = "magmatic_sulphide";
pub const LATERITE: &str = "laterite";

/// One deposit type's sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Mean of ln(multiplier).
    pub log_mean: f64,
    /// Standard deviation of ln(multiplier).
    pub log_sd: f64,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
    /// Final footprint area bound in km², inclusive.
    pub area_min_km2: f64,
    pub area_max_km2: f64,
}

/// Which multiplier bound, if any, was hit while sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplierClip {
    None,
    Lower,
    Upper,
}

/// Outcome of one `SamplingPolicy::sample` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaSample {
    /// Canonical name of the entry actually used.
    pub policy: String,
    /// Multiplier after clipping (m² per tonne).
    pub multiplier: f64,
    pub clip: MultiplierClip,
    pub area_km2: f64,
    pub radius_m: f64,
}

impl PolicyEntry {
    /// Draw a multiplier and clip it to `[multiplier_min, multiplier_max]`.
    pub fn sample_multiplier<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(f64, MultiplierClip)> {
        let dist = LogNormal::new(self.log_mean, self.log_sd)
            .map_err(|e| FootprintError::InvalidPolicy(e.to_string()))?;
        let raw: f64 = dist.sample(rng);
        Ok(if raw < self.multiplier_min {
            (self.multiplier_min, MultiplierClip::Lower)
        } else if raw > self.multiplier_max {
            (self.multiplier_max, MultiplierClip::Upper)
        } else {
            (raw, MultiplierClip::None)
        })
    }

    /// Footprint area in km² for a given (already clipped) multiplier.
    /// The area bound is applied independently of the multiplier bound.
    pub fn area_km2(&self, tonnage: f64, multiplier: f64) -> f64 {
        let raw_km2 = tonnage * multiplier / 1e6;
        raw_km2.clamp(self.area_min_km2, self.area_max_km2)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let bad = |why: &str| Err(FootprintError::InvalidPolicy(format!("`{name}`: {why}")));
        if !(self.log_sd.is_finite() && self.log_sd > 0.0) || !self.log_mean.is_finite() {
            return bad("log_mean must be finite and log_sd positive");
        }
        if !(self.multiplier_min > 0.0 && self.multiplier_min <= self.multiplier_max) {
            return bad("multiplier bounds must satisfy 0 < min <= max");
        }
        if !(self.area_min_km2 > 0.0 && self.area_min_km2 <= self.area_max_km2) {
            return bad("area bounds must satisfy 0 < min <= max");
        }
        Ok(())
    }
}

/// Area radius of a disc, metres.
#[inline]
pub fn radius_for_area_m(area_km2: f64) -> f64 {
    (area_km2 * 1e6 / std::f64::consts::PI).sqrt()
}

/// Normalise a free-form label: lower case, non-alphanumeric runs → `_`.
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingPolicy {
    pub entries: BTreeMap<String, PolicyEntry>,
    /// Normalised label → canonical entry name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Entries chosen uniformly for unresolved labels.
    pub fallback: Vec<String>,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            MAGMATIC_SULPHIDE.to_string(),
            PolicyEntry {
                log_mean: 30f64.ln(),
                log_sd: 1.57,
                multiplier_min: 4.0,
                multiplier_max: 398.0,
                area_min_km2: 0.397084,
                area_max_km2: 79.449586,
            },
        );
        entries.insert(
            LATERITE.to_string(),
            PolicyEntry {
                log_mean: 50f64.ln(),
                log_sd: 0.93,
                multiplier_min: 7.0,
                multiplier_max: 229.0,
                area_min_km2: 2.731346,
                area_max_km2: 70.959627,
            },
        );

        let aliases = [
            ("magmatic_sulfide", MAGMATIC_SULPHIDE),
            ("sulphide", MAGMATIC_SULPHIDE),
            ("sulfide", MAGMATIC_SULPHIDE),
            ("ni_sulphide", MAGMATIC_SULPHIDE),
            ("lateritic", LATERITE),
            ("ni_laterite", LATERITE),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();

        Self {
            entries,
            aliases,
            fallback: vec![MAGMATIC_SULPHIDE.to_string(), LATERITE.to_string()],
        }
    }
}

impl SamplingPolicy {
    /// Canonical entry name for `deposit_type`, or `None` when it falls back.
    pub fn resolve(&self, deposit_type: &str) -> Option<&str> {
        let norm = normalize_label(deposit_type);
        if let Some((name, _)) = self.entries.get_key_value(norm.as_str()) {
            return Some(name.as_str());
        }
        self.aliases
            .get(norm.as_str())
            .filter(|canon| self.entries.contains_key(canon.as_str()))
            .map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<&PolicyEntry> {
        self.entries.get(name)
    }

    /// Sample a footprint for one site.
    pub fn sample<R: Rng + ?Sized>(&self, deposit_type: &str, tonnage: f64, rng: &mut R) -> Result<AreaSample> {
        let name = match self.resolve(deposit_type) {
            Some(name) => name,
            None => {
                if self.fallback.is_empty() {
                    return Err(FootprintError::InvalidPolicy("fallback set is empty".into()));
                }
                self.fallback[rng.gen_range(0..self.fallback.len())].as_str()
            }
        };
        let entry = self
            .entry(name)
            .ok_or_else(|| FootprintError::InvalidPolicy(format!("no entry named `{name}`")))?;

        let (multiplier, clip) = entry.sample_multiplier(rng)?;
        let area_km2 = entry.area_km2(tonnage, multiplier);
        Ok(AreaSample {
            policy: name.to_string(),
            multiplier,
            clip,
            area_km2,
            radius_m: radius_for_area_m(area_km2),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(FootprintError::InvalidPolicy("no entries".into()));
        }
        for (name, entry) in &self.entries {
            entry.validate(name)?;
        }
        if self.fallback.is_empty() {
            return Err(FootprintError::InvalidPolicy("fallback set is empty".into()));
        }
        for name in self.fallback.iter().chain(self.aliases.values()) {
            if !self.entries.contains_key(name) {
                return Err(FootprintError::InvalidPolicy(format!("unknown entry `{name}`")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn laterite_example_is_unclipped() {
        let policy = SamplingPolicy::default();
        let entry = policy.entry(LATERITE).unwrap();
        let area = entry.area_km2(1_000_000.0, 50.0);
        assert_abs_diff_eq!(area, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(radius_for_area_m(area), 3989.42, epsilon = 0.01);
    }

    #[test]
    fn small_sulphide_example_raised_to_min_area() {
        let policy = SamplingPolicy::default();
        let entry = policy.entry(MAGMATIC_SULPHIDE).unwrap();
        let area = entry.area_km2(100.0, 398.0);
        assert_eq!(area, 0.397084);
        assert_abs_diff_eq!(radius_for_area_m(area), 355.52, epsilon = 0.01);
    }

    #[test]
    fn non_positive_tonnage_yields_min_area() {
        let policy = SamplingPolicy::default();
        let mut rng = StdRng::seed_from_u64(3);
        for tonnage in [0.0, -10.0] {
            let s = policy.sample("laterite", tonnage, &mut rng).unwrap();
            assert_eq!(s.area_km2, 2.731346);
        }
    }

    #[test]
    fn labels_resolve_through_normalisation_and_aliases() {
        let policy = SamplingPolicy::default();
        assert_eq!(policy.resolve("Magmatic Sulphide"), Some(MAGMATIC_SULPHIDE));
        assert_eq!(policy.resolve("  magmatic-sulfide "), Some(MAGMATIC_SULPHIDE));
        assert_eq!(policy.resolve("LATERITE"), Some(LATERITE));
        assert_eq!(policy.resolve("Mixed"), None);
        assert_eq!(policy.resolve("porphyry"), None);
    }

    #[test]
    fn fallback_picks_both_canonical_policies() {
        let policy = SamplingPolicy::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = BTreeMap::new();
        for _ in 0..2000 {
            let s = policy.sample("unknown", 1e5, &mut rng).unwrap();
            *counts.entry(s.policy).or_insert(0usize) += 1;
        }
        let a = counts[MAGMATIC_SULPHIDE] as f64 / 2000.0;
        assert!((a - 0.5).abs() < 0.05, "fallback share {a:.3} should be near 0.5");
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn multiplier_clips_are_flagged() {
        let entry = PolicyEntry {
            log_mean: 0.0,
            log_sd: 5.0,
            multiplier_min: 0.5,
            multiplier_max: 2.0,
            area_min_km2: 1e-9,
            area_max_km2: 1e9,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let (mut low, mut high) = (0, 0);
        for _ in 0..500 {
            let (m, clip) = entry.sample_multiplier(&mut rng).unwrap();
            match clip {
                MultiplierClip::Lower => {
                    low += 1;
                    assert_eq!(m, 0.5);
                }
                MultiplierClip::Upper => {
                    high += 1;
                    assert_eq!(m, 2.0);
                }
                MultiplierClip::None => assert!((0.5..=2.0).contains(&m)),
            }
        }
        assert!(low > 0 && high > 0);
    }

    #[test]
    fn validate_rejects_dangling_fallback() {
        let mut policy = SamplingPolicy::default();
        assert!(policy.validate().is_ok());
        policy.fallback.push("porphyry".into());
        assert!(policy.validate().is_err());
    }

    #[test]
    fn policy_table_roundtrips_through_json() {
        let policy = SamplingPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: SamplingPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    proptest! {
        #[test]
        fn sampled_area_within_resolved_bounds(
            seed in any::<u64>(),
            tonnage in -1e4f64..1e9,
            label in prop::sample::select(vec!["laterite", "magmatic sulphide", "mixed", "other"]),
        ) {
            let policy = SamplingPolicy::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let s = policy.sample(label, tonnage, &mut rng).unwrap();
            let e = policy.entry(&s.policy).unwrap();
            prop_assert!(s.area_km2 >= e.area_min_km2 && s.area_km2 <= e.area_max_km2);
            prop_assert!(s.multiplier >= e.multiplier_min && s.multiplier <= e.multiplier_max);
        }
    }
}
