//! Ensemble aggregation of overlap records.
//!
//! Records are first reduced per draw into `DrawOverlaps` (area summed per
//! (draw, site, class) over sub-parts). `DrawOverlaps::merge` is associative
//! and commutative, so per-draw values can be combined in any order, in
//! parallel. `ResultAggregator` then derives the four report tables:
//!
//!   raw         (draw, site, class) totals with tonnage attached
//!   site_class  per (site, class) across draws
//!   site        per site across draws, zero-filled over draws × sites
//!   class       per class across draws, zero-filled over draws × classes
//!
//! Every draw in the merged set counts, including draws with no records.

pub mod grid;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::overlap::OverlapRecord;
use crate::site::Site;
use grid::zero_fill;
use stats::{MeanSd, Summary};

// ── Per-draw reduction ───────────────────────────────────────────────────────

type Key = (usize, String, u16);

/// Overlap areas summed per (draw, site, class), with the set of draws that
/// contributed (possibly without any record).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawOverlaps {
    draws: BTreeSet<usize>,
    areas: BTreeMap<Key, f64>,
}

impl DrawOverlaps {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reduce one draw's records. `draw` is registered even when `records`
    /// is empty.
    pub fn from_records(draw: usize, records: &[OverlapRecord]) -> Self {
        let mut out = Self::default();
        out.draws.insert(draw);
        for r in records {
            out.draws.insert(r.draw);
            *out.areas.entry((r.draw, r.site_id.clone(), r.class)).or_insert(0.0) += r.area_km2;
        }
        out
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.draws.extend(other.draws);
        for (k, v) in other.areas {
            *self.areas.entry(k).or_insert(0.0) += v;
        }
        self
    }

    pub fn draws(&self) -> &BTreeSet<usize> {
        &self.draws
    }

    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    /// Area for one (draw, site, class); zero when absent.
    pub fn area(&self, draw: usize, site_id: &str, class: u16) -> f64 {
        self.areas.get(&(draw, site_id.to_string(), class)).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, u16, f64)> {
        self.areas.iter().map(|((d, s, c), a)| (*d, s.as_str(), *c, *a))
    }
}

/// Merged level 1 over a whole ensemble.
pub type EnsembleOverlaps = DrawOverlaps;

// ── Report rows ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub draw: usize,
    pub site_id: String,
    pub class: u16,
    pub area_km2: f64,
    pub tonnage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteClassRow {
    pub site_id: String,
    pub class: u16,
    pub tonnage: f64,
    /// Draws in which the site overlapped the class at all.
    pub hit_draws: usize,
    pub area_km2: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRow {
    pub site_id: String,
    pub tonnage: f64,
    pub area_km2: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRow {
    pub class: u16,
    pub area_km2: Summary,
    /// Tonnage of the sites overlapping the class, per draw.
    pub tonnage: MeanSd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawSiteRow {
    pub draw: usize,
    pub site_id: String,
    pub tonnage: f64,
    pub area_km2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawClassRow {
    pub draw: usize,
    pub class: u16,
    pub area_km2: f64,
    pub tonnage: f64,
    pub n_sites: usize,
}

/// A draw excluded from the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawFailure {
    pub draw: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub n_draws: usize,
    pub raw: Vec<RawRow>,
    pub site_class: Vec<SiteClassRow>,
    pub site: Vec<SiteRow>,
    pub class: Vec<ClassRow>,
    pub per_draw_site: Vec<DrawSiteRow>,
    pub per_draw_class: Vec<DrawClassRow>,
    pub failed_draws: Vec<DrawFailure>,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

/// Derives the report tables for a fixed site table.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    /// Site id → tonnage, in input order.
    sites: Vec<(String, f64)>,
    classes: BTreeSet<u16>,
}

impl ResultAggregator {
    /// `classes` are listed in the class table even if never overlapped;
    /// classes observed in the ensemble are always added.
    pub fn new(sites: &[Site], classes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            sites: sites.iter().map(|s| (s.id.clone(), s.tonnage)).collect(),
            classes: classes.into_iter().collect(),
        }
    }

    pub fn aggregate(&self, overlaps: &EnsembleOverlaps) -> Report {
        let tonnage: BTreeMap<&str, f64> = self.sites.iter().map(|(id, t)| (id.as_str(), *t)).collect();
        let draws: Vec<usize> = overlaps.draws.iter().copied().collect();

        let mut unknown = BTreeSet::new();
        let known: Vec<(usize, &str, u16, f64)> = overlaps
            .iter()
            .filter(|(_, s, _, _)| {
                let ok = tonnage.contains_key(s);
                if !ok {
                    unknown.insert(s.to_string());
                }
                ok
            })
            .collect();
        if !unknown.is_empty() {
            warn!(sites = ?unknown, "overlap records for sites missing from the site table were ignored");
        }

        let raw = known
            .iter()
            .map(|&(draw, s, class, area)| RawRow {
                draw,
                site_id: s.to_string(),
                class,
                area_km2: area,
                tonnage: tonnage[s],
            })
            .collect();

        let site_class = self.site_class_table(&draws, &known, &tonnage);
        let (site, per_draw_site) = self.site_table(&draws, &known);
        let (class, per_draw_class) = self.class_table(&draws, &known, &tonnage);

        Report {
            n_draws: draws.len(),
            raw,
            site_class,
            site,
            class,
            per_draw_site,
            per_draw_class,
            failed_draws: Vec::new(),
        }
    }

    /// Per (site, class) across draws, zero-filled over draws for every pair
    /// seen at least once.
    fn site_class_table(
        &self,
        draws: &[usize],
        known: &[(usize, &str, u16, f64)],
        tonnage: &BTreeMap<&str, f64>,
    ) -> Vec<SiteClassRow> {
        let mut partial: BTreeMap<(usize, (&str, u16)), f64> = BTreeMap::new();
        let mut pairs: BTreeSet<(&str, u16)> = BTreeSet::new();
        for &(draw, s, class, area) in known {
            pairs.insert((s, class));
            *partial.entry((draw, (s, class))).or_insert(0.0) += area;
        }
        let pairs: Vec<(&str, u16)> = pairs.into_iter().collect();
        let full = zero_fill(draws, &pairs, &partial);

        let mut per_pair: BTreeMap<(&str, u16), Vec<f64>> = BTreeMap::new();
        for ((_, pair), area) in full {
            per_pair.entry(pair).or_default().push(area);
        }
        per_pair
            .into_iter()
            .map(|((s, class), values)| SiteClassRow {
                site_id: s.to_string(),
                class,
                tonnage: tonnage[s],
                hit_draws: values.iter().filter(|&&v| v > 0.0).count(),
                area_km2: Summary::from_values(&values),
            })
            .collect()
    }

    /// Per (draw, site) totals over classes, zero-filled over draws × sites,
    /// then per-site statistics.
    fn site_table(&self, draws: &[usize], known: &[(usize, &str, u16, f64)]) -> (Vec<SiteRow>, Vec<DrawSiteRow>) {
        let mut partial: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let index: BTreeMap<&str, usize> = self.sites.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i)).collect();
        for &(draw, s, _, area) in known {
            *partial.entry((draw, index[s])).or_insert(0.0) += area;
        }
        let site_idx: Vec<usize> = (0..self.sites.len()).collect();
        let full = zero_fill(draws, &site_idx, &partial);

        let mut per_site: Vec<Vec<f64>> = vec![Vec::with_capacity(draws.len()); self.sites.len()];
        let mut per_draw = Vec::with_capacity(full.len());
        for ((draw, i), area) in full {
            let (id, t) = &self.sites[i];
            per_site[i].push(area);
            per_draw.push(DrawSiteRow { draw, site_id: id.clone(), tonnage: *t, area_km2: area });
        }

        let rows = self
            .sites
            .iter()
            .zip(per_site)
            .map(|((id, t), values)| SiteRow {
                site_id: id.clone(),
                tonnage: *t,
                area_km2: Summary::from_values(&values),
            })
            .collect();
        (rows, per_draw)
    }

    /// Per (draw, class) totals over sites, with each overlapping site's
    /// tonnage counted once, zero-filled over draws × classes, then per-class
    /// statistics.
    fn class_table(
        &self,
        draws: &[usize],
        known: &[(usize, &str, u16, f64)],
        tonnage: &BTreeMap<&str, f64>,
    ) -> (Vec<ClassRow>, Vec<DrawClassRow>) {
        // (draw, class, site) → area; one entry per site, whatever the number of parts.
        let mut by_site: BTreeMap<(usize, u16, &str), f64> = BTreeMap::new();
        for &(draw, s, class, area) in known {
            *by_site.entry((draw, class, s)).or_insert(0.0) += area;
        }

        #[derive(Clone, Default)]
        struct Cell {
            area: f64,
            tonnage: f64,
            n_sites: usize,
        }
        let mut partial: BTreeMap<(usize, u16), Cell> = BTreeMap::new();
        for ((draw, class, s), area) in by_site {
            let cell = partial.entry((draw, class)).or_default();
            cell.area += area;
            cell.tonnage += tonnage[s];
            cell.n_sites += 1;
        }

        let mut classes = self.classes.clone();
        classes.extend(known.iter().map(|&(_, _, c, _)| c));
        let classes: Vec<u16> = classes.into_iter().collect();
        let full = zero_fill(draws, &classes, &partial);

        let mut per_class: BTreeMap<u16, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        let mut per_draw = Vec::with_capacity(full.len());
        for ((draw, class), cell) in full {
            let e = per_class.entry(class).or_default();
            e.0.push(cell.area);
            e.1.push(cell.tonnage);
            per_draw.push(DrawClassRow {
                draw,
                class,
                area_km2: cell.area,
                tonnage: cell.tonnage,
                n_sites: cell.n_sites,
            });
        }

        let rows = per_class
            .into_iter()
            .map(|(class, (areas, tonnages))| ClassRow {
                class,
                area_km2: Summary::from_values(&areas),
                tonnage: MeanSd::from_values(&tonnages),
            })
            .collect();
        (rows, per_draw)
    }
}
