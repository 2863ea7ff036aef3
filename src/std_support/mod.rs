//! `std`-only platform glue: a wall-clock [`crate::time::Clock`], a
//! [`crate::net::Socket`] impl for [`std::net::UdpSocket`], and (with
//! the `openssl` dependency this feature pulls in) a DTLS-secured
//! transport. Grounded in the teacher crate's own `std` module.

use embedded_time::rate::Fraction;
use embedded_time::Instant;

mod addr;
#[cfg(feature = "openssl")]
pub mod dtls;

pub(crate) use addr::{to_no_std, to_std, to_std_ip};

/// [`embedded_time::Clock`] backed by [`std::time::Instant`], ticking
/// in microseconds (matching the resolution [`crate::config::Config`]'s
/// `obs_tick_exponent` assumes).
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// A clock whose epoch is the moment it's created.
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    let elapsed = std::time::Instant::now().duration_since(self.0);
    Ok(Instant::new(elapsed.as_micros() as u64))
  }
}

fn io_to_nb(e: std::io::Error) -> nb::Error<std::io::Error> {
  match e.kind() {
    | std::io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(e),
  }
}

impl crate::net::Socket for std::net::UdpSocket {
  type Error = std::io::Error;

  fn local_addr(&self) -> no_std_net::SocketAddr {
    to_no_std(self.local_addr().expect("bound socket has a local address"))
  }

  fn send(&self, data: &[u8], addr: no_std_net::SocketAddr) -> nb::Result<(), Self::Error> {
    self.set_nonblocking(true).map_err(io_to_nb)?;
    std::net::UdpSocket::send_to(self, data, to_std(addr)).map_err(io_to_nb)?;
    Ok(())
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<(usize, no_std_net::SocketAddr), Self::Error> {
    self.set_nonblocking(true).map_err(io_to_nb)?;
    let (n, addr) = self.recv_from(buf).map_err(io_to_nb)?;
    Ok((n, to_no_std(addr)))
  }

  fn peek_addr(&self) -> nb::Result<no_std_net::SocketAddr, Self::Error> {
    let mut scratch = [0u8; 1];
    let (_, addr) = self.peek_from(&mut scratch).map_err(io_to_nb)?;
    Ok(to_no_std(addr))
  }

  fn bind(addr: no_std_net::SocketAddr) -> Result<Self, Self::Error> {
    let sock = std::net::UdpSocket::bind(to_std(addr))?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  fn join_multicast(&self, addr: no_std_net::IpAddr) -> Result<(), Self::Error> {
    match to_std_ip(addr) {
      | std::net::IpAddr::V4(v4) => self.join_multicast_v4(&v4, &std::net::Ipv4Addr::UNSPECIFIED),
      | std::net::IpAddr::V6(v6) => self.join_multicast_v6(&v6, 0),
    }
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::Clock as _;

  use super::*;

  #[test]
  fn clock_advances_monotonically() {
    let clock = Clock::new();
    let a = clock.try_now().unwrap();
    let b = clock.try_now().unwrap();
    assert!(b >= a);
  }
}
