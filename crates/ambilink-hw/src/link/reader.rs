//! Inbound byte loop.
//!
//! Runs on its own thread for the lifetime of a session, decoding board
//! control bytes and feeding them into the [`LinkSession`].

use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::debug::read_debug_line;
use super::session::LinkSession;
use crate::protocol::BoardMessage;
use crate::Result;

/// Name of the reader thread.
const READER_THREAD_NAME: &str = "ambilink-reader";

/// Spawns the reader loop for a session.
pub fn spawn_reader(
    session: Arc<LinkSession>,
    reader: Box<dyn Read + Send>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(READER_THREAD_NAME.to_string())
        .spawn(move || run_reader(&session, reader))?;
    Ok(handle)
}

/// Reads and dispatches inbound bytes until the session closes or the
/// channel fails.
fn run_reader<R: Read>(session: &LinkSession, reader: R) {
    let mut reader = BufReader::new(reader);
    let mut byte = [0u8; 1];

    debug!("Link reader started");
    while session.is_open() {
        match reader.read(&mut byte) {
            Ok(0) => {
                debug!("Link channel reached end of stream");
                break;
            }
            Ok(_) => {}
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                warn!("Link read failed: {}", e);
                break;
            }
        }

        if session.in_grace_period(Instant::now()) {
            trace!("Discarding {:#04X} during open grace period", byte[0]);
            continue;
        }

        let message = match BoardMessage::from_byte(byte[0]) {
            BoardMessage::Debug(_) => BoardMessage::Debug(read_debug_line(&mut reader)),
            other => other,
        };
        session.handle_message(message, Instant::now());
    }
    debug!("Link reader stopped");
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
