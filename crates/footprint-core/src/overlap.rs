//! Per-draw overlap between footprint buffers and the classified layer.
//!
//! Pipeline for one draw:
//!   1. move buffers into the layer's CRS if needed,
//!   2. union all buffers; the union masks the layer lookup,
//!   3. dissolve the masked layer into class regions,
//!   4. clip every buffer against every region it may touch and measure
//!      the clipped area in km².
//!
//! Regions come out of the dissolve as disjoint axis-aligned runs, so each
//! buffer/run intersection is a convex-window clip (Sutherland–Hodgman)
//! rather than a general polygon boolean.

use geo::{BooleanOps, BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};
#[cfg(feature = "threading")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::{BufferDraw, BufferDrawSet};
use crate::crs::{area_km2, reproject};
use crate::dissolve::{dissolve_by_class, ClassPolygon};
use crate::error::{FootprintError, Result};
use crate::raster::ClassRaster;

/// Intersections smaller than this (km²) are numerical noise.
const MIN_OVERLAP_KM2: f64 = 1e-12;

/// Area of one buffer falling into one class region in one draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapRecord {
    pub draw: usize,
    pub site_id: String,
    pub class: u16,
    /// Region id within the draw; several parts may share a class.
    pub part: usize,
    pub area_km2: f64,
}

// ── Geometry helpers ─────────────────────────────────────────────────────────

/// Union of many polygons by pairwise (cascaded) merging.
pub fn union_all<I>(polys: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = Polygon<f64>>,
{
    let mut level: Vec<MultiPolygon<f64>> =
        polys.into_iter().map(|p| MultiPolygon::new(vec![p])).collect();
    if level.is_empty() {
        return MultiPolygon::new(Vec::new());
    }
    let merge = |pair: &[MultiPolygon<f64>]| -> MultiPolygon<f64> {
        pair[1..].iter().fold(pair[0].clone(), |acc, p| acc.union(p))
    };
    while level.len() > 1 {
        #[cfg(feature = "threading")]
        {
            level = level.par_chunks(2).map(merge).collect();
        }
        #[cfg(not(feature = "threading"))]
        {
            level = level.chunks(2).map(merge).collect();
        }
    }
    level.swap_remove(0)
}

fn clip_edge(
    input: &[Coord<f64>],
    inside: impl Fn(Coord<f64>) -> bool,
    cross: impl Fn(Coord<f64>, Coord<f64>) -> Coord<f64>,
) -> Vec<Coord<f64>> {
    let mut out = Vec::with_capacity(input.len() + 4);
    let Some(&last) = input.last() else { return out };
    let mut prev = last;
    for &cur in input {
        match (inside(prev), inside(cur)) {
            (true, true) => out.push(cur),
            (true, false) => out.push(cross(prev, cur)),
            (false, true) => {
                out.push(cross(prev, cur));
                out.push(cur);
            }
            (false, false) => {}
        }
        prev = cur;
    }
    out
}

fn lerp_x(a: Coord<f64>, b: Coord<f64>, x: f64) -> Coord<f64> {
    let t = (x - a.x) / (b.x - a.x);
    Coord { x, y: a.y + t * (b.y - a.y) }
}

fn lerp_y(a: Coord<f64>, b: Coord<f64>, y: f64) -> Coord<f64> {
    let t = (y - a.y) / (b.y - a.y);
    Coord { x: a.x + t * (b.x - a.x), y }
}

/// Clip a polygon's exterior ring to an axis-aligned rectangle.
/// Returns `None` when nothing of positive extent remains.
///
/// The ring must be convex (buffer circles are); a concave ring can come
/// back with zero-width bridges along the rectangle edge. Interiors are
/// ignored.
pub fn clip_to_rect(poly: &Polygon<f64>, rect: &Rect<f64>) -> Option<Polygon<f64>> {
    let (min, max) = (rect.min(), rect.max());
    let ring = poly.exterior();
    let mut pts: Vec<Coord<f64>> = ring.0.clone();
    if ring.is_closed() {
        pts.pop();
    }
    pts = clip_edge(&pts, |c| c.x >= min.x, |a, b| lerp_x(a, b, min.x));
    pts = clip_edge(&pts, |c| c.x <= max.x, |a, b| lerp_x(a, b, max.x));
    pts = clip_edge(&pts, |c| c.y >= min.y, |a, b| lerp_y(a, b, min.y));
    pts = clip_edge(&pts, |c| c.y <= max.y, |a, b| lerp_y(a, b, max.y));
    if pts.len() < 3 {
        return None;
    }
    pts.push(pts[0]);
    Some(Polygon::new(LineString::new(pts), vec![]))
}

fn check_buffer(draw: usize, b: &BufferDraw) -> Result<()> {
    let degenerate = |reason: &str| FootprintError::DegenerateGeometry {
        draw,
        site_id: b.site_id.clone(),
        reason: reason.to_string(),
    };
    if !(b.radius_m.is_finite() && b.radius_m > 0.0) {
        return Err(degenerate("radius is not a positive number"));
    }
    let ring = b.polygon.exterior();
    if ring.0.len() < 4 {
        return Err(degenerate("ring has fewer than three vertices"));
    }
    if ring.0.iter().any(|c| !(c.x.is_finite() && c.y.is_finite())) {
        return Err(degenerate("non-finite vertex"));
    }
    Ok(())
}

// ── Overlap ──────────────────────────────────────────────────────────────────

fn overlaps_for_buffer(
    draw: usize,
    site_id: &str,
    buffer: &Polygon<f64>,
    regions: &[ClassPolygon],
    layer: &ClassRaster,
) -> Vec<OverlapRecord> {
    let Some(bbox) = buffer.bounding_rect() else { return Vec::new() };
    regions
        .iter()
        .filter(|region| region.bbox.intersects(&bbox))
        .filter_map(|region| {
            let area: f64 = region
                .runs
                .iter()
                .filter(|run| run.intersects(&bbox))
                .filter_map(|run| clip_to_rect(buffer, run))
                .map(|piece| area_km2(&piece, layer.crs))
                .sum();
            (area > MIN_OVERLAP_KM2).then(|| OverlapRecord {
                draw,
                site_id: site_id.to_string(),
                class: region.class,
                part: region.region,
                area_km2: area,
            })
        })
        .collect()
}

/// Overlap records for one draw. A draw touching no classified cell yields
/// an empty vector, which is a valid outcome.
pub fn compute_overlaps(set: &BufferDrawSet, layer: &ClassRaster) -> Result<Vec<OverlapRecord>> {
    if layer.width == 0 || layer.height == 0 {
        return Err(FootprintError::EmptyLayer { width: layer.width, height: layer.height });
    }
    for b in &set.buffers {
        check_buffer(set.draw, b)?;
    }

    let buffers: Vec<(&str, Polygon<f64>)> = set
        .buffers
        .iter()
        .map(|b| (b.site_id.as_str(), reproject(&b.polygon, set.crs, layer.crs)))
        .collect();

    let union = union_all(buffers.iter().map(|(_, p)| p.clone()));
    let regions = dissolve_by_class(layer, &union);
    debug!(draw = set.draw, buffers = buffers.len(), regions = regions.len(), "dissolved layer");
    if regions.is_empty() {
        return Ok(Vec::new());
    }

    #[cfg(feature = "threading")]
    let per_site: Vec<Vec<OverlapRecord>> = buffers
        .par_iter()
        .map(|(id, poly)| overlaps_for_buffer(set.draw, id, poly, &regions, layer))
        .collect();
    #[cfg(not(feature = "threading"))]
    let per_site: Vec<Vec<OverlapRecord>> = buffers
        .iter()
        .map(|(id, poly)| overlaps_for_buffer(set.draw, id, poly, &regions, layer))
        .collect();

    Ok(per_site.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{circle_polygon, BufferSimulator};
    use crate::crs::Crs;
    use crate::policy::{MultiplierClip, SamplingPolicy};
    use crate::raster::GeoTransform;
    use crate::site::Site;
    use approx::assert_abs_diff_eq;
    use geo::{coord, Area};
    use std::collections::BTreeMap;

    fn buffer(draw: usize, id: &str, x: f64, y: f64, r: f64) -> BufferDraw {
        let center = coord! { x: x, y: y };
        BufferDraw {
            draw,
            site_id: id.to_string(),
            center,
            shift: (0.0, 0.0),
            radius_m: r,
            area_km2: std::f64::consts::PI * r * r / 1e6,
            multiplier: 1.0,
            clip: MultiplierClip::None,
            policy: "test".into(),
            polygon: circle_polygon(center, r, 128),
        }
    }

    /// 10×10 grid of 1 km cells on the equal-area plane, x 0..10 km, y 0..10 km.
    /// Left half class 1, right half class 2, top row nodata.
    fn halves() -> ClassRaster {
        let t = GeoTransform { origin_x: 0.0, origin_y: 10_000.0, pixel_width: 1000.0, pixel_height: 1000.0 };
        let mut r = ClassRaster::empty(10, 10, t, Crs::EqualArea, 0).unwrap();
        for row in 1..10 {
            for col in 0..10 {
                r.set(row, col, if col < 5 { 1 } else { 2 });
            }
        }
        r
    }

    #[test]
    fn clip_square_against_rect() {
        let sq = Polygon::from(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 4.0, y: 4.0 }));
        let clipped = clip_to_rect(&sq, &Rect::new(coord! { x: 2.0, y: 1.0 }, coord! { x: 10.0, y: 3.0 })).unwrap();
        assert_abs_diff_eq!(clipped.unsigned_area(), 4.0, epsilon = 1e-12);
        assert!(clip_to_rect(&sq, &Rect::new(coord! { x: 5.0, y: 5.0 }, coord! { x: 6.0, y: 6.0 })).is_none());
    }

    #[test]
    fn buffer_straddling_classes_splits_its_area() {
        let set = BufferDrawSet {
            draw: 0,
            crs: Crs::EqualArea,
            buffers: vec![buffer(0, "s", 5000.0, 5000.0, 2000.0)],
        };
        let recs = compute_overlaps(&set, &halves()).unwrap();
        assert_eq!(recs.len(), 2);
        let total: f64 = recs.iter().map(|r| r.area_km2).sum();
        let poly_area = set.buffers[0].polygon.unsigned_area() / 1e6;
        assert_abs_diff_eq!(total, poly_area, epsilon = 1e-9);
        assert_abs_diff_eq!(recs[0].area_km2, recs[1].area_km2, epsilon = 1e-9);
    }

    #[test]
    fn buffer_outside_layer_emits_nothing() {
        let set = BufferDrawSet {
            draw: 3,
            crs: Crs::EqualArea,
            buffers: vec![buffer(3, "far", 90_000.0, 90_000.0, 1500.0)],
        };
        assert!(compute_overlaps(&set, &halves()).unwrap().is_empty());
    }

    #[test]
    fn nodata_band_is_not_counted() {
        // Centred on the nodata top row boundary: only the lower half is classified.
        let set = BufferDrawSet {
            draw: 0,
            crs: Crs::EqualArea,
            buffers: vec![buffer(0, "edge", 2500.0, 9000.0, 400.0)],
        };
        let recs = compute_overlaps(&set, &halves()).unwrap();
        let total: f64 = recs.iter().map(|r| r.area_km2).sum();
        let half = set.buffers[0].polygon.unsigned_area() / 2e6;
        assert_abs_diff_eq!(total, half, epsilon = 1e-9);
        assert!(recs.iter().all(|r| r.class == 1));
    }

    #[test]
    fn disjoint_regions_of_one_class_are_separate_parts() {
        let t = GeoTransform { origin_x: 0.0, origin_y: 3000.0, pixel_width: 1000.0, pixel_height: 1000.0 };
        let mut layer = ClassRaster::empty(3, 3, t, Crs::EqualArea, 0).unwrap();
        layer.set(1, 0, 7);
        layer.set(1, 2, 7);
        let set = BufferDrawSet {
            draw: 0,
            crs: Crs::EqualArea,
            buffers: vec![buffer(0, "s", 1500.0, 1500.0, 1400.0)],
        };
        let recs = compute_overlaps(&set, &layer).unwrap();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.class == 7));
        assert_ne!(recs[0].part, recs[1].part);
    }

    #[test]
    fn geographic_layer_gets_reprojected_buffers() {
        // A 0.2° WGS84 grid at the equator, all class 5.
        let t = GeoTransform { origin_x: 10.0, origin_y: 1.0, pixel_width: 0.2, pixel_height: 0.2 };
        let mut layer = ClassRaster::empty(10, 10, t, Crs::Wgs84, 0).unwrap();
        layer.data.iter_mut().for_each(|v| *v = 5);

        let sim = BufferSimulator::new(SamplingPolicy::default(), 0.0, 1).unwrap();
        let sites = vec![Site::new("eq", 11.0, 0.0, 1.0e6, "laterite")];
        let set = sim.generate_draw(0, &sites).unwrap();
        let recs = compute_overlaps(&set, &layer).unwrap();

        let total: f64 = recs.iter().map(|r| r.area_km2).sum();
        let poly_area = set.buffers[0].polygon.unsigned_area() / 1e6;
        assert!((total - poly_area).abs() / poly_area < 1e-3, "{total} vs {poly_area}");
    }

    #[test]
    fn web_mercator_layer_measures_ground_area() {
        // 50 km Web Mercator square around (10°E, 50°N), all class 3.
        let c = Crs::WebMercator.project(10.0, 50.0);
        let t = GeoTransform {
            origin_x: c.x - 25_000.0,
            origin_y: c.y + 25_000.0,
            pixel_width: 500.0,
            pixel_height: 500.0,
        };
        let mut layer = ClassRaster::empty(100, 100, t, Crs::WebMercator, 0).unwrap();
        layer.data.iter_mut().for_each(|v| *v = 3);

        let sim = BufferSimulator::new(SamplingPolicy::default(), 0.0, 4).unwrap();
        let sites = vec![Site::new("mid", 10.0, 50.0, 1.0e6, "laterite")];
        let set = sim.generate_draw(0, &sites).unwrap();
        let recs = compute_overlaps(&set, &layer).unwrap();
        assert!(recs.iter().all(|r| r.class == 3));

        // Web Mercator inflates lengths by 1/cos(50°); areas must not follow.
        let total: f64 = recs.iter().map(|r| r.area_km2).sum();
        let b = &set.buffers[0];
        assert!((total - b.area_km2).abs() / b.area_km2 < 1e-3, "{total} vs {}", b.area_km2);
    }

    #[test]
    fn per_site_class_sum_never_exceeds_buffer_area() {
        let sim = BufferSimulator::new(SamplingPolicy::default(), 3000.0, 17).unwrap();
        let t = GeoTransform { origin_x: 9.0, origin_y: 1.0, pixel_width: 0.01, pixel_height: 0.01 };
        let mut layer = ClassRaster::empty(200, 200, t, Crs::Wgs84, 0).unwrap();
        for row in 0..200 {
            for col in 0..200 {
                layer.set(row, col, ((row / 17 + col / 13) % 4) as u16);
            }
        }
        let sites: Vec<Site> = (0..6)
            .map(|i| Site::new(format!("s{i}"), 9.3 + 0.25 * i as f64, 0.1 * i as f64 - 0.2, 4.0e5, "mixed"))
            .collect();
        for draw in 0..5 {
            let set = sim.generate_draw(draw, &sites).unwrap();
            let recs = compute_overlaps(&set, &layer).unwrap();
            let mut per_site: BTreeMap<&str, f64> = BTreeMap::new();
            for r in &recs {
                *per_site.entry(r.site_id.as_str()).or_default() += r.area_km2;
            }
            for b in &set.buffers {
                let got = per_site.get(b.site_id.as_str()).copied().unwrap_or(0.0);
                let full = b.polygon.unsigned_area() / 1e6;
                assert!(got <= full * (1.0 + 1e-6), "{}: {got} > {full}", b.site_id);
            }
        }
    }

    #[test]
    fn union_area_between_max_and_sum() {
        let sim = BufferSimulator::new(SamplingPolicy::default(), 5000.0, 23).unwrap();
        let sites: Vec<Site> = (0..8)
            .map(|i| Site::new(format!("s{i}"), 30.0 + 0.02 * i as f64, -10.0, 1.0e5 * (i + 1) as f64, "mixed"))
            .collect();
        for draw in 0..5 {
            let set = sim.generate_draw(draw, &sites).unwrap();
            let areas: Vec<f64> = set.buffers.iter().map(|b| b.polygon.unsigned_area()).collect();
            let union = union_all(set.buffers.iter().map(|b| b.polygon.clone())).unsigned_area();
            let sum: f64 = areas.iter().sum();
            let max = areas.iter().cloned().fold(0.0, f64::max);
            assert!(union <= sum * (1.0 + 1e-9));
            assert!(union >= max * (1.0 - 1e-9));
        }
    }

    #[test]
    fn degenerate_buffer_is_an_error() {
        let mut b = buffer(0, "bad", 100.0, 100.0, 50.0);
        b.radius_m = f64::NAN;
        let set = BufferDrawSet { draw: 2, crs: Crs::EqualArea, buffers: vec![b] };
        assert!(matches!(
            compute_overlaps(&set, &halves()),
            Err(FootprintError::DegenerateGeometry { draw: 2, .. })
        ));
    }
}
