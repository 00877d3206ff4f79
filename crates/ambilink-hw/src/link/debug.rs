//! Diagnostic line channel.
//!
//! The host sends `'D'` while the link is idle; the board answers with `'D'`
//! followed by one line of text terminated by `"\r\n"`.

use std::io::{BufRead, Read};
use tokio::sync::broadcast;
use tracing::info;

/// Maximum bytes read for one diagnostic line, terminator included.
pub const DEBUG_LINE_BUDGET: u64 = 256;

/// Buffered lines per subscriber.
const DEBUG_CHANNEL_CAPACITY: usize = 16;

/// Fan-out of diagnostic lines reported by the board.
pub struct DebugChannel {
    tx: broadcast::Sender<String>,
}

impl Default for DebugChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugChannel {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEBUG_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes to subsequent lines.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Logs a line and hands it to subscribers.
    pub fn publish(&self, line: String) {
        info!("Board debug: {}", line);
        // No subscribers is fine, the log line is enough
        let _ = self.tx.send(line);
    }
}

/// Reads the line following an inbound `'D'`.
///
/// Returns `None` if no newline arrives within [`DEBUG_LINE_BUDGET`] bytes or
/// the read fails (including a timeout).
pub fn read_debug_line<R: BufRead>(reader: &mut R) -> Option<String> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(DEBUG_LINE_BUDGET)
        .read_until(b'\n', &mut buf)
        .ok()?;
    if buf.last() != Some(&b'\n') {
        return None;
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}
