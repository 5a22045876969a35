//! Status taxonomy shared by every public operation

use thiserror::Error;

/// Errors surfaced by device, protocol, extraction and parser operations.
///
/// The library performs no automatic retries: every variant is reported to
/// the caller unchanged, and retry policy is the caller's responsibility.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument was rejected (wrong size, out of range).
    #[error("invalid argument: {0}")]
    InvalidArgs(&'static str),

    /// A caller-visible allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// The transport reported a failure other than its no-data code.
    #[error("transport I/O error: {0}")]
    Io(std::io::Error),

    /// The transport reported its distinguished no-data code.
    #[error("timed out waiting for data")]
    Timeout,

    /// A response failed header, length, parameter echo or checksum
    /// validation.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The device memory did not contain a required terminator.
    #[error("data format error: {0}")]
    DataFormat(&'static str),

    /// The caller's cancellation token was set at a transaction boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation, field or index is not available for this device.
    #[error("not supported")]
    Unsupported,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::Io(kind) => Error::from(std::io::Error::from(kind)),
            _ => Error::Io(std::io::Error::other(err.to_string())),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_mapping() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn test_io_mapping() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_display() {
        assert!(!Error::Cancelled.to_string().is_empty());
        assert!(Error::Protocol("bad checksum").to_string().contains("bad checksum"));
    }
}
