//! Board link module.
//!
//! Handshake, flow control and keepalives over a serial channel.

pub mod debug;
mod reader;
mod session;

pub use debug::{DebugChannel, DEBUG_LINE_BUDGET};
pub use reader::spawn_reader;
pub use session::{
    BoardState, LinkSession, LinkTiming, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_OPEN_DELAY,
};
