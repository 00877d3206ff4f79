//! Built-in test pattern for bringing up a board without screen capture.

use tracing::{debug, info, warn};

use super::CaptureEngine;

/// Hue steps per light across a row.
const HUE_STEP: u32 = 7;

/// Hue advance per frame.
const HUE_SPEED: u32 = 3;

/// Moving hue sweep across the light grid.
#[derive(Debug, Default)]
pub struct TestPattern {
    columns: usize,
    rows: usize,
    phase: u32,
    produced: u64,
    limit: Option<u64>,
    running: bool,
}

impl TestPattern {
    /// Creates a pattern that runs until stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pattern that stops after `frames` frames.
    pub fn with_limit(frames: u64) -> Self {
        Self {
            limit: Some(frames),
            ..Self::default()
        }
    }

    fn light(&self, row: usize, column: usize) -> u32 {
        // Odd rows are scanned right to left
        let x = if row % 2 == 1 {
            self.columns - 1 - column
        } else {
            column
        };
        let hue = (x as u32 * HUE_STEP + self.phase) % 360;
        hue_to_rgb(hue)
    }
}

impl CaptureEngine for TestPattern {
    fn start(&mut self, output: i32, columns: u8, rows: u8) -> bool {
        if columns == 0 || rows == 0 {
            warn!("Test pattern cannot start with a {}x{} grid", columns, rows);
            return false;
        }
        self.columns = columns as usize;
        self.rows = rows as usize;
        self.phase = 0;
        self.produced = 0;
        self.running = true;
        info!(
            "Test pattern started ({}x{}, output {})",
            columns, rows, output
        );
        true
    }

    fn process(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            debug!("Test pattern reached its frame limit");
            self.running = false;
            return false;
        }
        self.phase = (self.phase + HUE_SPEED) % 360;
        self.produced += 1;
        true
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn pixels(&self, buffer: &mut [u32]) {
        for (i, slot) in buffer.iter_mut().enumerate().take(self.columns * self.rows) {
            *slot = self.light(i / self.columns, i % self.columns);
        }
    }

    fn stop(&mut self) {
        if self.running {
            debug!("Test pattern stopped after {} frames", self.produced);
        }
        self.running = false;
    }
}

/// Converts a fully saturated hue in degrees to packed RGB.
fn hue_to_rgb(hue: u32) -> u32 {
    let hue = hue % 360;
    let rising = (hue % 60) * 255 / 60;
    let falling = 255 - rising;
    let (r, g, b) = match hue / 60 {
        0 => (255, rising, 0),
        1 => (falling, 255, 0),
        2 => (0, 255, rising),
        3 => (0, falling, 255),
        4 => (rising, 0, 255),
        _ => (255, 0, falling),
    };
    (r << 16) | (g << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hue_to_rgb() {
        assert_eq!(hue_to_rgb(0), 0xFF0000);
        assert_eq!(hue_to_rgb(120), 0x00FF00);
        assert_eq!(hue_to_rgb(240), 0x0000FF);
        assert_eq!(hue_to_rgb(360), 0xFF0000);
    }

    #[test]
    fn test_serpentine_rows() {
        let mut pattern = TestPattern::new();
        assert!(pattern.start(-1, 4, 2));
        assert!(pattern.process());

        let mut buffer = [0u32; 8];
        pattern.pixels(&mut buffer);
        // Second row mirrors the first
        for column in 0..4 {
            assert_eq!(buffer[column], buffer[7 - column]);
        }
    }

    #[test]
    fn test_frame_limit() {
        let mut pattern = TestPattern::with_limit(2);
        assert!(!pattern.is_running());
        assert!(pattern.start(-1, 2, 1));
        assert!(pattern.process());
        assert!(pattern.process());
        assert!(!pattern.process());
        assert!(!pattern.is_running());
    }

    #[test]
    fn test_stop_idempotent() {
        let mut pattern = TestPattern::new();
        assert!(pattern.start(0, 2, 2));
        pattern.stop();
        pattern.stop();
        assert!(!pattern.is_running());
        assert!(!pattern.process());
    }

    #[test]
    fn test_rejects_empty_grid() {
        let mut pattern = TestPattern::new();
        assert!(!pattern.start(-1, 0, 3));
        assert!(!pattern.is_running());
    }
}
