//! Classified raster → class polygons, restricted to a mask region.
//!
//! Only cells that are classified (not `nodata`) and whose footprint touches
//! the mask are considered. Kept cells are grouped into 4-connected regions
//! of a single class value; each region becomes one `ClassPolygon` whose
//! geometry is the region's horizontal cell runs. Runs never overlap, so
//! the regions partition the classified part of the mask and areas measured
//! against them add up without double counting.

use std::collections::{BTreeMap, VecDeque};

use geo::{BoundingRect, Intersects, MultiPolygon, Polygon, Rect};

use crate::raster::ClassRaster;

/// One contiguous region of a single class value.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPolygon {
    pub class: u16,
    /// Region id, unique within one dissolve call (scan order).
    pub region: usize,
    pub cells: usize,
    /// Merged horizontal runs of the region's cells, disjoint.
    pub runs: Vec<Rect<f64>>,
    pub bbox: Rect<f64>,
}

impl ClassPolygon {
    pub fn geometry(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(self.runs.iter().map(|r| r.to_polygon()).collect())
    }
}

/// Classified cells inside the mask, keyed by (row, col).
fn masked_cells(layer: &ClassRaster, mask: &MultiPolygon<f64>) -> BTreeMap<(usize, usize), u16> {
    let mut kept = BTreeMap::new();
    for poly in mask {
        let Some(bbox) = poly.bounding_rect() else { continue };
        let Some(w) = layer.window_for(&bbox) else { continue };
        for row in w.row0..w.row1 {
            for col in w.col0..w.col1 {
                if kept.contains_key(&(row, col)) {
                    continue;
                }
                let class = layer.get(row, col);
                if layer.is_nodata(class) {
                    continue;
                }
                if poly.intersects(&layer.cell_rect(row, col)) {
                    kept.insert((row, col), class);
                }
            }
        }
    }
    kept
}

/// Split each region's cells into row runs of consecutive columns.
fn runs_of(layer: &ClassRaster, cells: &mut [(usize, usize)]) -> Vec<Rect<f64>> {
    cells.sort_unstable();
    let mut runs = Vec::new();
    let mut i = 0;
    while i < cells.len() {
        let (row, start) = cells[i];
        let mut end = start + 1;
        let mut j = i + 1;
        while j < cells.len() && cells[j] == (row, end) {
            end += 1;
            j += 1;
        }
        runs.push(layer.run_rect(row, start, end));
        i = j;
    }
    runs
}

fn bbox_of(runs: &[Rect<f64>]) -> Rect<f64> {
    let mut min = runs[0].min();
    let mut max = runs[0].max();
    for r in &runs[1..] {
        min.x = min.x.min(r.min().x);
        min.y = min.y.min(r.min().y);
        max.x = max.x.max(r.max().x);
        max.y = max.y.max(r.max().y);
    }
    Rect::new(min, max)
}

/// Dissolve the classified cells under `mask` into per-class regions.
pub fn dissolve_by_class(layer: &ClassRaster, mask: &MultiPolygon<f64>) -> Vec<ClassPolygon> {
    let mut kept = masked_cells(layer, mask);
    let mut out = Vec::new();

    while let Some((&seed, &class)) = kept.iter().next() {
        kept.remove(&seed);
        let mut cells = vec![seed];
        let mut queue = VecDeque::from([seed]);

        while let Some((r, c)) = queue.pop_front() {
            let neighbours = [
                r.checked_sub(1).map(|r| (r, c)),
                Some((r + 1, c)),
                c.checked_sub(1).map(|c| (r, c)),
                Some((r, c + 1)),
            ];
            for n in neighbours.into_iter().flatten() {
                if kept.get(&n) == Some(&class) {
                    kept.remove(&n);
                    cells.push(n);
                    queue.push_back(n);
                }
            }
        }

        let runs = runs_of(layer, &mut cells);
        out.push(ClassPolygon {
            class,
            region: out.len(),
            cells: cells.len(),
            bbox: bbox_of(&runs),
            runs,
        });
    }
    out
}

/// Mask covering the whole layer, for dissolving without a buffer union.
pub fn full_extent_mask(layer: &ClassRaster) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![Polygon::from(layer.extent())])
}
