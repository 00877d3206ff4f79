//! Serial channel to the controller board.

use crate::{Error, Result};
use std::io::{Read, Write};
use std::time::Duration;
use tokio_serial::{DataBits, Parity, StopBits};
use tracing::{debug, info};

/// Default board baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 288_000;

/// Default read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// An opened duplex byte channel, split into independent halves.
pub struct Channel {
    /// Outbound half, owned by the link session.
    pub writer: Box<dyn Write + Send>,
    /// Inbound half, owned by the reader thread.
    pub reader: Box<dyn Read + Send>,
}

/// Opens channels to a named endpoint.
pub trait Connector: Send + Sync {
    /// Opens the endpoint, e.g. `/dev/ttyUSB0`.
    fn connect(&self, endpoint: &str) -> Result<Channel>;
}

/// Opens serial ports with fixed 8N1 framing.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT)
    }
}

impl SerialConnector {
    /// Creates a connector with the given baud rate and I/O timeout.
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }

}

impl Connector for SerialConnector {
    fn connect(&self, endpoint: &str) -> Result<Channel> {
        let port = tokio_serial::new(endpoint, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.timeout)
            .open()
            .map_err(|e| open_error(endpoint, e))?;

        let reader = port.try_clone()?;
        debug!("Serial port timeout set to {:?}", self.timeout);
        info!("Serial port {} opened at {} baud", endpoint, self.baud_rate);

        Ok(Channel {
            writer: Box::new(port),
            reader: Box::new(reader),
        })
    }
}

/// Maps an open failure, reporting `PortNotFound` only for paths that don't exist.
fn open_error(endpoint: &str, e: tokio_serial::Error) -> Error {
    let missing = !std::path::Path::new(endpoint).exists();
    match e.kind {
        tokio_serial::ErrorKind::NoDevice if missing => Error::PortNotFound(endpoint.to_string()),
        tokio_serial::ErrorKind::Io(kind)
            if (kind == std::io::ErrorKind::NotFound
                || kind == std::io::ErrorKind::PermissionDenied)
                && missing =>
        {
            Error::PortNotFound(endpoint.to_string())
        }
        _ => Error::Serial(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_port() {
        let connector = SerialConnector::default();
        match connector.connect("/dev/ambilink-does-not-exist") {
            Err(Error::PortNotFound(path)) => assert_eq!(path, "/dev/ambilink-does-not-exist"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[test]
    fn test_busy_port_is_not_missing() {
        // An exclusively held tty reports NoDevice
        let busy = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "Device or resource busy");
        match open_error("/dev/null", busy) {
            Error::Serial(e) => assert_eq!(e.kind, tokio_serial::ErrorKind::NoDevice),
            other => panic!("unexpected error: {other}"),
        }

        let gone = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "No such device");
        assert!(matches!(
            open_error("/dev/ambilink-does-not-exist", gone),
            Error::PortNotFound(_)
        ));
    }

    #[test]
    fn test_existing_non_tty_is_not_missing() {
        let connector = SerialConnector::default();
        assert!(!matches!(
            connector.connect("/dev/null"),
            Err(Error::PortNotFound(_))
        ));
    }

    // Hardware tests are skipped by default
    #[test]
    #[ignore]
    fn test_port_open() {
        let connector = SerialConnector::default();
        assert!(connector.connect("/dev/ttyUSB0").is_ok());
    }
}
