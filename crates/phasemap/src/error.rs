//! Error types for transport map construction and application.

use thiserror::Error;

/// Result type for phasemap operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while building or applying a transport map.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Interpolation order outside 1..=4.
    #[error("Unsupported interpolation order: {0} (must be 1, 2, 3 or 4)")]
    UnsupportedOrder(u32),

    /// Grid dimensions are zero or the cell count does not fit a `u32` index.
    #[error("Invalid grid dimensions: {xsize}x{ysize}")]
    InvalidGrid {
        /// Size along the first axis.
        xsize: u32,
        /// Size along the second axis.
        ysize: u32,
    },

    /// A distribution buffer does not match the map's grid.
    #[error("Buffer size mismatch: expected {expected} cells, got {actual}")]
    BufferSizeMismatch {
        /// Cell count of the map.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },

    /// Cell coordinates outside the grid.
    #[error("Cell ({q}, {p}) is outside the grid")]
    CellOutOfRange {
        /// First-axis index.
        q: u32,
        /// Second-axis index.
        p: u32,
    },

    /// Coordinate convention name not recognized.
    #[error("Unknown coordinate convention: {0}")]
    UnknownConvention(String),

    /// Backend name not recognized or not compiled in.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Accelerator device or dispatch failure.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Host/device copy failed.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendError(msg.into())
    }

    /// Check a buffer length against the expected cell count.
    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::BufferSizeMismatch { expected, actual })
        }
    }
}
