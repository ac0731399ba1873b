//! Monte Carlo estimate of how much land mining footprints take from a
//! classified area layer (e.g. protected areas).
//!
//! Pipeline: sites → `BufferSimulator` (one buffer per site per draw) →
//! `compute_overlaps` (per-draw area per site and class region) →
//! `ResultAggregator` (ensemble statistics). `PowerAnalyzer` sizes the
//! ensemble from a pilot run of the same buffer model.

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod crs;
pub mod dissolve;
pub mod ensemble;
pub mod error;
pub mod overlap;
pub mod policy;
pub mod power;
pub mod raster;
pub mod rng;
pub mod site;

pub use aggregate::{DrawOverlaps, EnsembleOverlaps, Report, ResultAggregator};
pub use buffer::{BufferDraw, BufferDrawSet, BufferSimulator};
pub use config::{AnalysisConfig, PowerConfig};
pub use crs::Crs;
pub use error::{FootprintError, Result};
pub use overlap::{compute_overlaps, OverlapRecord};
pub use policy::SamplingPolicy;
pub use power::{PowerAnalysis, PowerAnalyzer};
pub use raster::{ClassRaster, GeoTransform};
pub use site::Site;
