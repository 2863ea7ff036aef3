//! A thin synchronous client built on [`crate::engine::Engine`],
//! mirroring the teacher crate's `blocking::Client`: construct it,
//! `send`/`ping`, get an answer back, with the polling loop hidden
//! inside.

use std::io;

use no_std_net::SocketAddr;

use crate::config::Config;
use crate::engine::{Engine, OutgoingRequest, ReqResult};
use crate::error::Error;
use crate::net::Socket;
use crate::resource::Listener;
use crate::std_support::Clock;

/// A blocking CoAP client bound to a real UDP socket and the system
/// clock.
pub struct Client<const REQS: usize = 4, const OBS: usize = 4, const MEMOS: usize = 4, const RESENDS: usize = 4> {
  engine: Engine<std::net::UdpSocket, Clock, REQS, OBS, MEMOS, RESENDS>,
}

impl<const REQS: usize, const OBS: usize, const MEMOS: usize, const RESENDS: usize> Client<REQS, OBS, MEMOS, RESENDS> {
  /// Bind a client to `port` on all interfaces, with default engine
  /// configuration.
  pub fn new_std(port: u16) -> io::Result<Self> {
    Self::new_std_config(port, Config { port, ..Config::default() })
  }

  /// Bind a client with an explicit [`Config`].
  pub fn new_std_config(port: u16, config: Config) -> io::Result<Self> {
    let sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    sock.set_nonblocking(true)?;
    Ok(Self { engine: Engine::new(config, sock, Clock::new()) })
  }

  /// Register an application listener.
  pub fn register_listener(&mut self, listener: &'static Listener) -> Result<(), Error<std::io::Error>> {
    self.engine.register_listener(listener)
  }

  /// Send a request and block until it resolves.
  pub fn send(&mut self, req: &OutgoingRequest<'_>, remote: SocketAddr) -> Result<ReqResult, Error<std::io::Error>> {
    self.engine.send(req, remote)
  }

  /// Ping `remote`, blocking until the RST arrives or retransmissions
  /// are exhausted. Resolves to the round-trip time on success.
  pub fn ping(&mut self, remote: SocketAddr) -> Result<embedded_time::duration::Milliseconds<u64>, Error<std::io::Error>> {
    self.engine.ping(remote)
  }

  /// Run one iteration of the underlying engine's event loop — for
  /// servicing inbound requests (and Observe notifications) between
  /// client calls.
  pub fn poll_once(&mut self) -> Result<(), Error<std::io::Error>> {
    self.engine.poll_once()
  }

  /// Borrow the underlying engine, e.g. to call
  /// [`Engine::obs_send`]/[`Engine::resource_list`].
  pub fn engine_mut(&mut self) -> &mut Engine<std::net::UdpSocket, Clock, REQS, OBS, MEMOS, RESENDS> {
    &mut self.engine
  }
}
