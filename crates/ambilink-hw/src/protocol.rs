//! Board wire protocol.
//!
//! Host to board:
//! - Config packet: `'C' | columns | rows`
//! - Light data packet: `'L' | r,g,b x (columns * rows)`
//! - Single control bytes: `'H'` (hello), `'A'` (frame available),
//!   `'K'` (keepalive), `'D'` (debug request)
//!
//! Board to host: single control bytes `'H'`, `'C'`, `'R'`, `'D'`. A `'D'` is
//! followed by one newline-terminated line of diagnostic text.

use crate::frame::LinkConfig;

/// Config packet size.
pub const CONFIG_PACKET_SIZE: usize = 3;

/// Bytes per light in a light data packet.
pub const BYTES_PER_LIGHT: usize = 3;

/// Host to board command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostCommand {
    /// Reply to the board's hello.
    Hello = b'H',
    /// Grid configuration packet header.
    Config = b'C',
    /// Light data packet header.
    LightData = b'L',
    /// New frame available notice.
    FrameAvailable = b'A',
    /// Idle keepalive.
    Keepalive = b'K',
    /// Request for a diagnostic line.
    Debug = b'D',
}

/// Board to host control bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardMessage {
    /// Board (re)started and wants to handshake.
    Hello,
    /// Board requests the grid configuration.
    ConfigRequest,
    /// Board is ready to receive light data.
    Ready,
    /// Diagnostic line, `None` when it could not be read.
    Debug(Option<String>),
    /// Anything else; ignored.
    Other(u8),
}

impl BoardMessage {
    /// Board byte announcing a diagnostic line.
    pub const DEBUG_BYTE: u8 = b'D';

    /// Decodes a single control byte.
    ///
    /// A debug byte decodes with no line; the reader fills it in.
    pub fn from_byte(value: u8) -> Self {
        match value {
            b'H' => BoardMessage::Hello,
            b'C' => BoardMessage::ConfigRequest,
            b'R' => BoardMessage::Ready,
            b'D' => BoardMessage::Debug(None),
            other => BoardMessage::Other(other),
        }
    }
}

/// Builds the grid configuration packet.
pub fn build_config_packet(config: &LinkConfig) -> [u8; CONFIG_PACKET_SIZE] {
    [HostCommand::Config as u8, config.columns(), config.rows()]
}

/// Builds a light data packet from packed `0x??RRGGBB` values.
pub fn build_frame_packet(pixels: &[u32]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(pixels.len() * BYTES_PER_LIGHT + 1);
    packet.push(HostCommand::LightData as u8);
    for &pixel in pixels {
        let (r, g, b) = split_rgb(pixel);
        packet.extend_from_slice(&[r, g, b]);
    }
    packet
}

/// Splits a packed pixel into its red, green and blue bytes.
#[inline]
pub fn split_rgb(pixel: u32) -> (u8, u8, u8) {
    (
        ((pixel >> 16) & 0xFF) as u8,
        ((pixel >> 8) & 0xFF) as u8,
        (pixel & 0xFF) as u8,
    )
}
