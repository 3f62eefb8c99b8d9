use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ForgeError {
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("invalid options: {0}")]
    #[diagnostic(help("see `scenery-forge build --help`"))]
    InvalidOptions(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    Network(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("catalog response is not valid JSON: {0}")]
    CatalogDecode(String),

    #[error("no scenes found: {0}")]
    #[diagnostic(help("widen the time range, raise --cloud-lt or try --skip-cloud-filter"))]
    NoScenesFound(String),

    #[error("invalid asset for {item}: {reason}")]
    InvalidAsset { item: String, reason: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("missing raster source: {0}")]
    MissingRasterSource(PathBuf),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("install GDAL command line utilities and make sure they are on PATH"))]
    ToolMissing(String),

    #[error("invalid raster geometry for {path}: {width}x{height}")]
    InvalidRasterGeometry {
        path: PathBuf,
        width: i64,
        height: i64,
    },

    #[error("raster tool failed: {0}")]
    RasterTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ForgeError {
    /// Transient failures that the catalog client retries and fails over on.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForgeError::Network(_) => true,
            ForgeError::CatalogStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
