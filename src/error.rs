//! The error type shared by streams, sockets, and the pipeline.
//!
//! Packet-level problems (bad checksums, wrong addresses, malformed headers
//! inside a filter) never surface as errors; the pipeline drops those packets
//! silently. The variants here are the failures that *do* reach callers of
//! the socket-level APIs.

use thiserror::Error;

/// Any error produced by this crate.
///
/// The type is `Clone` so that a failure recorded inside a connection (for
/// example by `TcpRecv::fail`) can be handed out again on every subsequent
/// call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Operation on a stream whose done signal has fired.
    #[error("stream closed")]
    StreamClosed,

    /// A non-blocking send found the outgoing channel full.
    ///
    /// Streams are lossy by contract; callers are expected to drop the
    /// packet.
    #[error("write buffer full")]
    WriteBufferFull,

    /// Close of something already closed.
    #[error("already closed")]
    AlreadyClosed,

    /// A read or write deadline elapsed. The context names the operation.
    #[error("{0}: operation timed out")]
    Timeout(&'static str),

    /// A header failed validation on an explicit parse path.
    #[error("invalid packet")]
    InvalidPacket,

    /// The requested port is taken.
    #[error("port in use")]
    PortInUse,

    /// The requested port does not fit in 16 bits.
    #[error("port out of range")]
    PortOutOfRange,

    /// The allocator pool is exhausted.
    #[error("no free ports")]
    NoFreePorts,

    /// The operation is outside what this stack implements.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The underlying tunnel device failed.
    #[error("tunnel i/o: {0}")]
    TunnelIo(String),

    /// The TCP server handshake ran out of retries.
    #[error("handshake failed")]
    HandshakeFailed,
}

impl Error {
    /// Whether this error is a deadline expiry.
    ///
    /// Networking callers commonly treat timeouts as retryable waits rather
    /// than failures; this flag lets them branch without matching variants.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::TunnelIo(err.to_string())
    }
}

/// Shorthand result type for crate operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_flag() {
        assert!(Error::Timeout("read").is_timeout());
        assert!(!Error::StreamClosed.is_timeout());
    }
}
