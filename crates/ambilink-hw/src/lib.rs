//! Ambilink Link Library
//!
//! Drives an Ambilink lighting controller board over a serial link:
//! handshake, frame flow control, keepalives and diagnostics.

pub mod channel;
pub mod error;
pub mod frame;
pub mod link;
pub mod preview;
pub mod protocol;

pub use channel::{Channel, Connector, SerialConnector};
pub use error::{Error, Result};
pub use frame::{Frame, LinkConfig};
pub use link::{BoardState, LinkSession, LinkTiming};
pub use preview::PreviewImage;
pub use protocol::{BoardMessage, HostCommand};
