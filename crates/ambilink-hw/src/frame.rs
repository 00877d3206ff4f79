//! Light grid geometry and captured frames.

use crate::{Error, Result};
use std::sync::Arc;

/// Light grid dimensions announced to the board in the config packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    columns: u8,
    rows: u8,
}

impl LinkConfig {
    /// Validates configured dimensions against the single-byte config fields.
    pub fn new(columns: u32, rows: u32) -> Result<Self> {
        let valid = |v: u32| (1..=u8::MAX as u32).contains(&v);
        if !valid(columns) || !valid(rows) {
            return Err(Error::InvalidDimensions { columns, rows });
        }
        Ok(Self {
            columns: columns as u8,
            rows: rows as u8,
        })
    }

    /// Number of light columns.
    pub fn columns(&self) -> u8 {
        self.columns
    }

    /// Number of light rows.
    pub fn rows(&self) -> u8 {
        self.rows
    }

    /// Total number of lights in the grid.
    pub fn pixel_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// One complete set of packed `0x??RRGGBB` light values.
///
/// Frames are immutable once captured; cloning shares the pixel storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: Arc<[u32]>,
}

impl Frame {
    /// Wraps captured pixels, checking them against the light grid.
    pub fn new(config: &LinkConfig, pixels: &[u32]) -> Result<Self> {
        if pixels.len() != config.pixel_count() {
            return Err(Error::FrameSize {
                expected: config.pixel_count(),
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels: Arc::from(pixels),
        })
    }

    /// Returns the packed pixel values in capture order.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Number of lights in the frame.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns true if the frame holds no lights.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}
