//! Live preview of the light grid.
//!
//! The capture engine scans the grid as a serpentine: odd rows run right to
//! left. The preview undoes that so it reads like the screen.

use crate::frame::LinkConfig;
use crate::protocol::split_rgb;
use crate::{Error, Result};

/// Maps a light in capture order to its linear preview index.
#[inline]
pub fn preview_index(row: usize, column: usize, columns: usize) -> usize {
    let start = row * columns;
    if row % 2 == 1 {
        start + (columns - 1 - column)
    } else {
        start + column
    }
}

/// Row-major `columns x rows` image of `0x00RRGGBB` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    data: Vec<u32>,
    width: usize,
    height: usize,
}

impl PreviewImage {
    /// Creates a black preview sized to the light grid.
    pub fn new(config: &LinkConfig) -> Self {
        let width = config.columns() as usize;
        let height = config.rows() as usize;
        Self {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    /// Returns the width in lights.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the height in lights.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the raw cells, row-major.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Gets the cell at the given coordinates.
    pub fn get_pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    /// Writes a frame given in capture order.
    pub fn write_frame(&mut self, pixels: &[u32]) -> Result<()> {
        if pixels.len() != self.data.len() {
            return Err(Error::FrameSize {
                expected: self.data.len(),
                actual: pixels.len(),
            });
        }
        for (row, chunk) in pixels.chunks_exact(self.width).enumerate() {
            for (column, &pixel) in chunk.iter().enumerate() {
                self.data[preview_index(row, column, self.width)] = pixel & 0x00FF_FFFF;
            }
        }
        Ok(())
    }

    /// Converts the preview to RGBA8 bytes.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.data.len() * 4);
        for &pixel in &self.data {
            let (r, g, b) = split_rgb(pixel);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
        rgba
    }

    /// Encodes the preview as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut png_data = Vec::new();
        {
            let mut encoder =
                png::Encoder::new(&mut png_data, self.width as u32, self.height as u32);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.to_rgba8())?;
        }
        Ok(png_data)
    }
}
