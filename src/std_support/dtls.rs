//! A [`crate::net::Socket`] secured by DTLS, for deployments that need
//! confidentiality over the wire. Grounded in the teacher ecosystem's
//! `kwap::std::net::secure` (the revision of this crate that still had
//! a DTLS adapter — the snapshot this crate descends from dropped it
//! mid-rename; see `DESIGN.md`).
//!
//! Simplifications relative to that source: one [`Mutex`] guards the
//! whole connection table rather than a per-connection `Arc<Mutex<_>>`
//! (this crate's engine is already single-threaded, so there's no
//! concurrent access to avoid serializing), and a stalled handshake is
//! simply dropped and restarted on the next inbound datagram from that
//! peer rather than persisted across calls.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};

use no_std_net::SocketAddr;
use openssl::ssl::{Ssl, SslAcceptor, SslConnector, SslContext, SslMethod, SslMode, SslStream};

use super::{to_no_std, to_std};
use crate::net::Socket;

/// What can go wrong talking DTLS.
#[derive(Debug)]
pub enum Error {
  /// An OpenSSL call failed outside of the ordinary "need more data"
  /// case.
  Ssl(openssl::ssl::Error),
  /// Setting up an [`SslAcceptor`]/[`SslConnector`] failed.
  Setup(openssl::error::ErrorStack),
  /// The underlying UDP socket failed.
  Io(io::Error),
}

impl From<openssl::ssl::Error> for Error {
  fn from(e: openssl::ssl::Error) -> Self {
    Self::Ssl(e)
  }
}
impl From<openssl::error::ErrorStack> for Error {
  fn from(e: openssl::error::ErrorStack) -> Self {
    Self::Setup(e)
  }
}
impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Self::Io(e)
  }
}

/// `Result` alias for DTLS setup.
pub type Result<T> = core::result::Result<T, Error>;

enum Role {
  Server(SslContext),
  Client(SslConnector),
}

/// A `Read + Write` bridge from OpenSSL's blocking-stream model onto
/// one peer's datagrams on a shared, non-blocking [`UdpSocket`]. Reads
/// block (openssl's DTLS handshake code expects a blocking transport);
/// writes buffer a whole flight and send it as one datagram on
/// `flush`, since DTLS records must not span UDP datagrams.
struct PeerConn {
  sock: Arc<UdpSocket>,
  peer: SocketAddr,
  tx_buf: Vec<u8>,
}

impl Read for PeerConn {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    loop {
      let mut scratch = [0u8; 2048];
      match self.sock.recv_from(&mut scratch) {
        | Ok((n, from)) if to_no_std(from) == self.peer => {
          let n = n.min(buf.len());
          buf[..n].copy_from_slice(&scratch[..n]);
          return Ok(n);
        },
        | Ok(_) => continue, // datagram from a different peer; not ours
        | Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e),
        | Err(e) => return Err(e),
      }
    }
  }
}

impl Write for PeerConn {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.tx_buf.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    if self.tx_buf.is_empty() {
      return Ok(());
    }
    self.sock.send_to(&self.tx_buf, to_std(self.peer))?;
    self.tx_buf.clear();
    Ok(())
  }
}

enum Conn {
  Established(SslStream<PeerConn>),
}

/// A UDP socket that speaks DTLS, implementing [`crate::net::Socket`]
/// so the engine can use it exactly like a plain one.
pub struct SecureUdpSocket {
  sock: Arc<UdpSocket>,
  role: Role,
  conns: Mutex<HashMap<SocketAddr, Conn>>,
}

impl SecureUdpSocket {
  /// Build a server-role secure socket from a certificate and private
  /// key, accepting DTLS connections on `sock`.
  pub fn new_server(sock: UdpSocket, cert: openssl::x509::X509, key: openssl::pkey::PKey<openssl::pkey::Private>) -> Result<Self> {
    sock.set_nonblocking(true)?;
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::dtls())?;
    builder.set_certificate(&cert)?;
    builder.set_private_key(&key)?;
    let acceptor = builder.build();
    Ok(Self { sock: Arc::new(sock),
              role: Role::Server(acceptor.into_context()),
              conns: Mutex::new(HashMap::new()) })
  }

  /// Build a client-role secure socket.
  pub fn new_client(sock: UdpSocket) -> Result<Self> {
    sock.set_nonblocking(true)?;
    let mut builder = SslConnector::builder(SslMethod::dtls())?;
    builder.set_mode(SslMode::AUTO_RETRY);
    let connector = builder.build();
    Ok(Self { sock: Arc::new(sock),
              role: Role::Client(connector),
              conns: Mutex::new(HashMap::new()) })
  }

  fn handshake(&self, addr: SocketAddr) -> nb::Result<(), Error> {
    let conn = PeerConn { sock: self.sock.clone(), peer: addr, tx_buf: Vec::new() };
    let result = match &self.role {
      | Role::Server(ctx) => {
        let ssl = Ssl::new(ctx).map_err(Error::from).map_err(nb::Error::Other)?;
        ssl.accept(conn)
      },
      | Role::Client(connector) => connector.connect("", conn),
    };
    match result {
      | Ok(stream) => {
        self.conns.lock().unwrap().insert(addr, Conn::Established(stream));
        Ok(())
      },
      | Err(openssl::ssl::HandshakeError::WouldBlock(_mid)) => Err(nb::Error::WouldBlock),
      | Err(openssl::ssl::HandshakeError::Failure(e)) => Err(nb::Error::Other(Error::Ssl(e.into_error()))),
      | Err(openssl::ssl::HandshakeError::SetupFailure(e)) => Err(nb::Error::Other(Error::Setup(e))),
    }
  }
}

impl Socket for SecureUdpSocket {
  type Error = Error;

  fn local_addr(&self) -> SocketAddr {
    to_no_std(self.sock.local_addr().expect("bound socket has a local address"))
  }

  fn send(&self, data: &[u8], addr: SocketAddr) -> nb::Result<(), Self::Error> {
    let mut conns = self.conns.lock().unwrap();
    match conns.get_mut(&addr) {
      | Some(Conn::Established(stream)) => {
        stream.write_all(data).and_then(|_| stream.flush()).map_err(|e| nb::Error::Other(Error::Io(e)))?;
        Ok(())
      },
      | _ => {
        drop(conns);
        self.handshake(addr)?;
        self.send(data, addr)
      },
    }
  }

  fn insecure_send(&self, data: &[u8], addr: SocketAddr) -> nb::Result<(), Self::Error> {
    self.sock.send_to(data, to_std(addr)).map(|_| ()).map_err(Error::from).map_err(nb::Error::Other)
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<(usize, SocketAddr), Self::Error> {
    let from = self.peek_addr()?;
    let mut conns = self.conns.lock().unwrap();
    match conns.get_mut(&from) {
      | Some(Conn::Established(stream)) => match stream.read(buf) {
        | Ok(n) => Ok((n, from)),
        | Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(nb::Error::WouldBlock),
        | Err(e) => Err(nb::Error::Other(Error::Io(e))),
      },
      | _ => {
        drop(conns);
        self.handshake(from)?;
        Err(nb::Error::WouldBlock)
      },
    }
  }

  fn peek_addr(&self) -> nb::Result<SocketAddr, Self::Error> {
    let mut scratch = [0u8; 1];
    let (_, addr) = self.sock.peek_from(&mut scratch).map_err(|e| match e.kind() {
      | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
      | _ => nb::Error::Other(Error::Io(e)),
    })?;
    Ok(to_no_std(addr))
  }

  fn bind(addr: SocketAddr) -> core::result::Result<Self, Self::Error> {
    let sock = UdpSocket::bind(to_std(addr))?;
    Self::new_client(sock)
  }

  fn join_multicast(&self, _addr: no_std_net::IpAddr) -> core::result::Result<(), Self::Error> {
    // DTLS sessions are point-to-point; multicast has no meaning here.
    Err(Error::Io(io::Error::new(io::ErrorKind::Unsupported, "DTLS sockets cannot join multicast groups")))
  }
}

impl core::fmt::Debug for SecureUdpSocket {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "SecureUdpSocket {{ .. }}")
  }
}
