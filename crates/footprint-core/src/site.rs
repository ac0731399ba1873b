//! Mining-property sites: the immutable input of every draw.
//!
//! Sites arrive as a JSON array of rows `{id, lon, lat, tonnage, deposit_type}`.
//! Every field is required; rows are checked up front so that no simulation
//! work starts on a partially valid table.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FootprintError, Result};

/// One mining property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    /// Longitude in degrees (WGS84).
    pub lon: f64,
    /// Latitude in degrees (WGS84).
    pub lat: f64,
    /// Ore tonnage. Non-positive values are legal and yield the minimum footprint.
    pub tonnage: f64,
    /// Free-form deposit type label, resolved by the sampling policy.
    pub deposit_type: String,
}

impl Site {
    pub fn new(id: impl Into<String>, lon: f64, lat: f64, tonnage: f64, deposit_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lon,
            lat,
            tonnage,
            deposit_type: deposit_type.into(),
        }
    }
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SiteRow {
    id: Option<Value>,
    lon: Option<f64>,
    lat: Option<f64>,
    tonnage: Option<f64>,
    deposit_type: Option<String>,
}

fn id_to_string(row: usize, v: Value) -> Result<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(FootprintError::MissingField { row, field: "id" }),
    }
}

impl SiteRow {
    fn into_site(self, row: usize) -> Result<Site> {
        let missing = |field| FootprintError::MissingField { row, field };
        let id = id_to_string(row, self.id.ok_or_else(|| missing("id"))?)?;
        Ok(Site {
            id,
            lon: self.lon.ok_or_else(|| missing("lon"))?,
            lat: self.lat.ok_or_else(|| missing("lat"))?,
            tonnage: self.tonnage.ok_or_else(|| missing("tonnage"))?,
            deposit_type: self.deposit_type.ok_or_else(|| missing("deposit_type"))?,
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parse and validate a JSON site table held in memory.
pub fn parse_sites(text: &str) -> Result<Vec<Site>> {
    let rows: Vec<SiteRow> =
        serde_json::from_str(text).map_err(|e| FootprintError::json("<sites>", e))?;
    sites_from_rows(rows)
}

/// Read, parse and validate the site table at `path`.
pub fn load_sites(path: &Path) -> Result<Vec<Site>> {
    let text = fs::read_to_string(path).map_err(|e| FootprintError::io(path, e))?;
    let rows: Vec<SiteRow> =
        serde_json::from_str(&text).map_err(|e| FootprintError::json(path, e))?;
    sites_from_rows(rows)
}

fn sites_from_rows(rows: Vec<SiteRow>) -> Result<Vec<Site>> {
    let sites = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.into_site(i))
        .collect::<Result<Vec<_>>>()?;
    validate(&sites)?;
    Ok(sites)
}

/// Check the table-level invariants: non-empty, unique ids, finite values,
/// coordinates on the globe.
pub fn validate(sites: &[Site]) -> Result<()> {
    if sites.is_empty() {
        return Err(FootprintError::NoSites);
    }
    let mut seen = HashSet::with_capacity(sites.len());
    for s in sites {
        let invalid = |reason: &str| FootprintError::InvalidSite {
            id: s.id.clone(),
            reason: reason.to_string(),
        };
        if !seen.insert(s.id.as_str()) {
            return Err(FootprintError::DuplicateSite(s.id.clone()));
        }
        if !(-180.0..=180.0).contains(&s.lon) {
            return Err(invalid("longitude outside [-180, 180]"));
        }
        if !(-90.0..=90.0).contains(&s.lat) {
            return Err(invalid("latitude outside [-90, 90]"));
        }
        if !s.tonnage.is_finite() {
            return Err(invalid("tonnage is not finite"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_rows_with_numeric_ids() {
        let sites = parse_sites(
            r#"[
                {"id": 7, "lon": 120.5, "lat": -2.25, "tonnage": 1.5e6, "deposit_type": "Laterite"},
                {"id": "B-2", "lon": 10.0, "lat": 60.0, "tonnage": 0.0, "deposit_type": "mixed"}
            ]"#,
        )
        .unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].id, "7");
        assert_eq!(sites[1].deposit_type, "mixed");
    }

    #[test]
    fn missing_field_reports_row_and_name() {
        let err = parse_sites(r#"[{"id": "a", "lon": 1.0, "lat": 2.0, "deposit_type": "laterite"}]"#)
            .unwrap_err();
        assert!(matches!(err, FootprintError::MissingField { row: 0, field: "tonnage" }));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = parse_sites(
            r#"[
                {"id": "a", "lon": 1.0, "lat": 2.0, "tonnage": 1.0, "deposit_type": "x"},
                {"id": "a", "lon": 3.0, "lat": 4.0, "tonnage": 1.0, "deposit_type": "x"}
            ]"#,
        )
        .unwrap_err();
        assert!(matches!(err, FootprintError::DuplicateSite(id) if id == "a"));
    }

    #[test]
    fn negative_tonnage_is_accepted() {
        let sites = parse_sites(r#"[{"id": "a", "lon": 1.0, "lat": 2.0, "tonnage": -5.0, "deposit_type": "x"}]"#)
            .unwrap();
        assert_eq!(sites[0].tonnage, -5.0);
    }

    #[test]
    fn empty_table_is_fatal() {
        assert!(matches!(parse_sites("[]").unwrap_err(), FootprintError::NoSites));
    }

    #[test]
    fn out_of_range_latitude_rejected() {
        let err = parse_sites(r#"[{"id": "a", "lon": 1.0, "lat": 95.0, "tonnage": 1.0, "deposit_type": "x"}]"#)
            .unwrap_err();
        assert!(matches!(err, FootprintError::InvalidSite { .. }));
    }
}
