use std::path::PathBuf;

/// Errors raised by the footprint simulation and overlap pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FootprintError {
    #[error("site row {row}: missing required field `{field}`")]
    MissingField { row: usize, field: &'static str },

    #[error("site `{id}`: {reason}")]
    InvalidSite { id: String, reason: String },

    #[error("duplicate site id `{0}`")]
    DuplicateSite(String),

    #[error("no sites to simulate")]
    NoSites,

    #[error("no draw artifacts found in {}", .0.display())]
    NoDraws(PathBuf),

    #[error("sampling policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("degenerate geometry for site `{site_id}` in draw {draw}: {reason}")]
    DegenerateGeometry { draw: usize, site_id: String, reason: String },

    #[error("draw {draw} panicked: {message}")]
    DrawPanicked { draw: usize, message: String },

    #[error("no usable draws: all {failed} draws failed")]
    NoUsableDraws { failed: usize },

    #[error("classification layer is empty ({width}x{height})")]
    EmptyLayer { width: usize, height: usize },

    #[error("raster data length {actual} does not match {width}x{height}")]
    RasterShape { width: usize, height: usize, actual: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl FootprintError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, FootprintError>;
