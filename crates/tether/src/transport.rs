//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between two processes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: a transport knows nothing about frames or values.
//!   It moves opaque, already-delimited buffers.
//! - **Full Duplex**: `send` and `recv` are independent so a pump can read
//!   while workers write.

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable, the connection dropped, or its credentials
    /// stopped being acceptable mid-session.
    ConnectionLost(String),
    /// Nothing arrived within the idle timeout.
    Timeout,
    /// A frame exceeded the transport's size limit.
    PayloadTooLarge(usize),
    /// Generic I/O or cipher failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Timeout => write!(f, "idle timeout"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {} bytes is too large", n),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional frame pipe.
///
/// Object-safe so peers can hold `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one frame.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next frame, `Ok(None)` once the stream is closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Stops sending. The remote side observes end of stream.
    async fn close(&self);
}
