//! Error types for the tiled DEM crate.

use thiserror::Error;

/// Errors that can occur when working with DEM data.
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading or writing a tile file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Zip archive could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// HTTP client error that is not a connectivity failure.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The tiling configuration is inconsistent.
    #[error("Invalid grid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A geographic region with inverted or non-finite bounds.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// The tile file has a format no reader understands.
    #[error("Unsupported tile format: {0}")]
    UnsupportedFormat(String),

    /// The tile file opened but its raster is unusable.
    #[error("Invalid tile raster: {0}")]
    InvalidRaster(String),

    /// The remote tile source cannot be reached at all.
    ///
    /// This is the only fatal per-tile error: it propagates out of the
    /// lookup that triggered it instead of degrading to no-data.
    #[error("Remote tile source unreachable ({url}): {reason}")]
    SourceUnreachable {
        /// URL that was being fetched.
        url: String,
        /// Reason reported by the transport.
        reason: String,
    },

    /// The remote server answered, but not with the tile archive.
    #[error("Failed to download {url}: {reason}")]
    DownloadFailed {
        /// URL that was being fetched.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Pixel or row requested outside a tile.
    #[error("Pixel ({x}, {y}) is outside the {width}x{height} tile")]
    OutOfBounds {
        /// Requested column.
        x: usize,
        /// Requested row.
        y: usize,
        /// Tile width in pixels.
        width: usize,
        /// Tile height in pixels.
        height: usize,
    },

    /// The model or tile has been disposed.
    #[error("Elevation model has been disposed")]
    Disposed,
}

impl DemError {
    /// Whether this error means the whole remote source is unreachable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DemError::SourceUnreachable { .. })
    }
}
