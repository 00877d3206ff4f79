//! Capture engine contract.
//!
//! An engine produces one packed `0x00RRGGBB` value per light, in the
//! serpentine order the board wires its strips (odd rows right to left).

mod pattern;

pub use pattern::TestPattern;

/// Frame producer polled by the frame pump.
pub trait CaptureEngine: Send + 'static {
    /// Begins producing `columns * rows` frames from the given output.
    ///
    /// Returns false if the engine could not start.
    fn start(&mut self, output: i32, columns: u8, rows: u8) -> bool;

    /// Advances one frame. False means no new data this tick.
    fn process(&mut self) -> bool;

    /// False once the engine has permanently stopped.
    fn is_running(&self) -> bool;

    /// Copies the current frame into `buffer` after a successful `process`.
    fn pixels(&self, buffer: &mut [u32]);

    /// Releases engine resources. Idempotent.
    fn stop(&mut self);
}
