//! Transport abstraction: the `Socket` seam the engine sends and receives
//! datagrams through, and `Addrd<T>`, which pairs a value with the remote
//! address it came from or is going to.

use no_std_net::SocketAddr;

/// `T` alongside the socket address it was received from, or should be
/// sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// The remote address.
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// The wrapped value.
  pub fn data(&self) -> &T {
    &self.0
  }

  /// The wrapped value, mutably.
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Unwrap, discarding the address.
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the wrapped value, keeping the address.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Addrd<U> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the wrapped value as `Addrd<&T>`.
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(&self.0, self.1)
  }
}

/// A non-blocking datagram transport.
///
/// The engine is generic over this trait so the same dispatch logic runs
/// atop a plain UDP socket or a DTLS-secured one (see
/// [`crate::dtls::SecureUdpSocket`]) without knowing which.
pub trait Socket {
  /// This transport's I/O error.
  type Error: core::fmt::Debug;

  /// The local address this socket is bound to.
  fn local_addr(&self) -> SocketAddr;

  /// Send `data` to `addr`, through whatever security layer this
  /// transport provides.
  fn send(&self, data: &[u8], addr: SocketAddr) -> nb::Result<(), Self::Error>;

  /// Send `data` to `addr`, bypassing any security layer. Used for
  /// transports (like DTLS) where some traffic (e.g. handshake probes)
  /// must go out in the clear; equivalent to `send` for plain UDP.
  fn insecure_send(&self, data: &[u8], addr: SocketAddr) -> nb::Result<(), Self::Error> {
    self.send(data, addr)
  }

  /// Receive one datagram into `buf`, returning the number of bytes
  /// written and the sender's address.
  fn recv(&self, buf: &mut [u8]) -> nb::Result<(usize, SocketAddr), Self::Error>;

  /// Peek the sender's address of the next datagram without consuming it.
  fn peek_addr(&self) -> nb::Result<SocketAddr, Self::Error>;

  /// Bind a new socket to `addr`.
  fn bind(addr: SocketAddr) -> Result<Self, Self::Error>
    where Self: Sized;

  /// Join a multicast group. Not every transport supports this (DTLS
  /// sessions are point-to-point).
  fn join_multicast(&self, addr: no_std_net::IpAddr) -> Result<(), Self::Error>;
}
