//! Error types for the Ambilink link library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving a controller board.
#[derive(Error, Debug)]
pub enum Error {
    /// Serial endpoint does not exist.
    #[error("Serial port not found at {0}")]
    PortNotFound(String),

    /// Serial port communication error.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Serial I/O error.
    #[error("Serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    /// Light grid dimensions cannot be expressed in the config packet.
    #[error("Invalid light grid {columns}x{rows} (each dimension must be 1-255)")]
    InvalidDimensions { columns: u32, rows: u32 },

    /// Frame pixel count does not match the light grid.
    #[error("Frame size mismatch: expected {expected}, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    /// The link session has been closed.
    #[error("Link session is closed")]
    SessionClosed,

    /// Preview image encoding error.
    #[error("Preview encoding error: {0}")]
    Png(#[from] png::EncodingError),
}
