//! Classified area layer: a north-up grid of u16 class codes with an affine
//! placement in one of the supported CRSs. Cells equal to `nodata` are
//! unclassified and never produce overlap.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use geo::{coord, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{FootprintError, Result};

/// Affine placement of a north-up grid. `origin_*` is the outer corner of
/// cell (0, 0), i.e. the top-left of the raster; rows advance southwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive cell height; row `r` spans `origin_y - (r+1)·h .. origin_y - r·h`.
    pub pixel_height: f64,
}

/// Half-open cell index ranges of a raster window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub row0: usize,
    pub row1: usize,
    pub col0: usize,
    pub col1: usize,
}

impl Window {
    pub fn rows(&self) -> usize {
        self.row1 - self.row0
    }

    pub fn cols(&self) -> usize {
        self.col1 - self.col0
    }
}

/// A classified grid storing one class value per cell, row-major.
/// Cells equal to `nodata` are unclassified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRaster {
    pub data: Vec<u16>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: u16,
}

impl ClassRaster {
    pub fn new(
        data: Vec<u16>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Crs,
        nodata: u16,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(FootprintError::RasterShape { width, height, actual: data.len() });
        }
        if !(transform.pixel_width > 0.0 && transform.pixel_height > 0.0) {
            return Err(FootprintError::InvalidParameter {
                name: "transform",
                reason: "pixel sizes must be positive".into(),
            });
        }
        Ok(Self { data, width, height, transform, crs, nodata })
    }

    /// A raster filled with `nodata`.
    pub fn empty(width: usize, height: usize, transform: GeoTransform, crs: Crs, nodata: u16) -> Result<Self> {
        Self::new(vec![nodata; width * height], width, height, transform, crs, nodata)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, class: u16) {
        self.data[row * self.width + col] = class;
    }

    #[inline]
    pub fn is_nodata(&self, class: u16) -> bool {
        class == self.nodata
    }

    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let t = &self.transform;
        let x0 = t.origin_x + col as f64 * t.pixel_width;
        let y1 = t.origin_y - row as f64 * t.pixel_height;
        Rect::new(
            coord! { x: x0, y: y1 - t.pixel_height },
            coord! { x: x0 + t.pixel_width, y: y1 },
        )
    }

    /// Rectangle spanning cells `[col0, col1)` of one row.
    pub fn run_rect(&self, row: usize, col0: usize, col1: usize) -> Rect<f64> {
        let a = self.cell_rect(row, col0);
        let b = self.cell_rect(row, col1 - 1);
        Rect::new(a.min(), b.max())
    }

    pub fn extent(&self) -> Rect<f64> {
        let t = &self.transform;
        Rect::new(
            coord! { x: t.origin_x, y: t.origin_y - self.height as f64 * t.pixel_height },
            coord! { x: t.origin_x + self.width as f64 * t.pixel_width, y: t.origin_y },
        )
    }

    /// Cells whose footprint touches `rect`, clamped to the grid.
    /// Returns `None` when the rectangle misses the raster entirely.
    pub fn window_for(&self, rect: &Rect<f64>) -> Option<Window> {
        let t = &self.transform;
        let clamp = |v: f64, hi: usize| -> usize {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as usize).min(hi)
            }
        };
        let col0 = clamp(((rect.min().x - t.origin_x) / t.pixel_width).floor(), self.width);
        let col1 = clamp(((rect.max().x - t.origin_x) / t.pixel_width).ceil(), self.width);
        let row0 = clamp(((t.origin_y - rect.max().y) / t.pixel_height).floor(), self.height);
        let row1 = clamp(((t.origin_y - rect.min().y) / t.pixel_height).ceil(), self.height);
        (col0 < col1 && row0 < row1).then_some(Window { row0, row1, col0, col1 })
    }

    /// Distinct class values present, excluding `nodata`.
    pub fn classes(&self) -> BTreeSet<u16> {
        self.data.iter().copied().filter(|&v| v != self.nodata).collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FootprintError::io(path, e))?;
        let r: ClassRaster = serde_json::from_str(&text).map_err(|e| FootprintError::json(path, e))?;
        Self::new(r.data, r.width, r.height, r.transform, r.crs, r.nodata)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).map_err(|e| FootprintError::json(path, e))?;
        fs::write(path, json).map_err(|e| FootprintError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: usize, h: usize) -> ClassRaster {
        let t = GeoTransform { origin_x: 0.0, origin_y: 100.0, pixel_width: 10.0, pixel_height: 10.0 };
        ClassRaster::empty(w, h, t, Crs::EqualArea, 0).unwrap()
    }

    #[test]
    fn cell_rect_is_north_up() {
        let r = grid(10, 10);
        let c = r.cell_rect(0, 0);
        assert_eq!(c.min(), coord! { x: 0.0, y: 90.0 });
        assert_eq!(c.max(), coord! { x: 10.0, y: 100.0 });
        let last = r.cell_rect(9, 9);
        assert_eq!(last.min(), coord! { x: 90.0, y: 0.0 });
    }

    #[test]
    fn window_covers_touched_cells() {
        let r = grid(10, 10);
        let w = r.window_for(&Rect::new(coord! { x: 15.0, y: 55.0 }, coord! { x: 34.0, y: 71.0 })).unwrap();
        assert_eq!(w, Window { row0: 2, row1: 5, col0: 1, col1: 4 });
    }

    #[test]
    fn window_clamps_and_misses() {
        let r = grid(10, 10);
        let w = r.window_for(&Rect::new(coord! { x: -50.0, y: -50.0 }, coord! { x: 500.0, y: 500.0 })).unwrap();
        assert_eq!((w.rows(), w.cols()), (10, 10));
        assert!(r.window_for(&Rect::new(coord! { x: 200.0, y: 0.0 }, coord! { x: 300.0, y: 50.0 })).is_none());
    }

    #[test]
    fn shape_mismatch_rejected() {
        let t = GeoTransform { origin_x: 0.0, origin_y: 0.0, pixel_width: 1.0, pixel_height: 1.0 };
        assert!(ClassRaster::new(vec![1, 2, 3], 2, 2, t, Crs::Wgs84, 0).is_err());
    }

    #[test]
    fn classes_skip_nodata() {
        let mut r = grid(3, 3);
        r.set(0, 0, 4);
        r.set(2, 1, 2);
        r.set(1, 1, 4);
        assert_eq!(r.classes().into_iter().collect::<Vec<_>>(), [2, 4]);
    }
}
