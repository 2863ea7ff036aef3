//! Crate-wide error type.
//!
//! Mirrors the error kinds the original engine surfaces at its boundary
//! (capacity exhaustion, malformed datagrams, terminal timeouts, handler
//! failures, method/path mismatches) plus the two failure modes a Rust
//! transport/clock abstraction can report that the C source simply aborts
//! on: a socket I/O error and a clock read error.

use core::fmt;

/// Something went wrong talking CoAP.
#[derive(Debug)]
pub enum Error<SocketError> {
  /// All slots of some kind (open requests, observers, observe memos,
  /// resend buffers) are in use.
  Capacity,
  /// A header or option could not be encoded (bad option ordering, an
  /// over-long path, or a token longer than 8 bytes).
  Encode,
  /// An incoming datagram failed to parse and was dropped.
  Parse,
  /// A confirmable exchange exhausted its retransmissions without a
  /// response or ACK.
  Timeout,
  /// A resource handler returned a negative length.
  Handler,
  /// A path matched a resource but the method wasn't in its bitmask.
  Method,
  /// No resource matched the request path.
  NotFound,
  /// The underlying transport failed.
  Socket(SocketError),
  /// The clock failed to produce a reading.
  Clock(embedded_time::clock::Error),
}

impl<SocketError: fmt::Debug> fmt::Display for Error<SocketError> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Error::Capacity => write!(f, "no free slots"),
      | Error::Encode => write!(f, "failed to encode message"),
      | Error::Parse => write!(f, "failed to parse message"),
      | Error::Timeout => write!(f, "retransmissions exhausted without a response"),
      | Error::Handler => write!(f, "resource handler failed"),
      | Error::Method => write!(f, "method not allowed for this resource"),
      | Error::NotFound => write!(f, "no resource matched the request path"),
      | Error::Socket(e) => write!(f, "socket error: {:?}", e),
      | Error::Clock(e) => write!(f, "clock error: {:?}", e),
    }
  }
}

impl<SocketError> From<embedded_time::clock::Error> for Error<SocketError> {
  fn from(e: embedded_time::clock::Error) -> Self {
    Error::Clock(e)
  }
}

/// Convenience alias.
pub type Result<T, SocketError> = core::result::Result<T, Error<SocketError>>;
