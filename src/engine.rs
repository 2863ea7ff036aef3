//! The message engine: the event loop, the slot tables it schedules
//! against, and the request/response/observe dispatch built on top of
//! them.
//!
//! [`Engine`] owns one transport ([`Socket`]) and one set of fixed-
//! capacity slot tables. There is no background thread: callers drive
//! the event loop themselves by calling [`Engine::poll_once`] (directly,
//! or indirectly through [`Engine::send`]/[`Engine::ping`], which loop
//! it until their exchange resolves) — the same "you call poll" shape
//! the teacher crate uses for its `Core`, rather than the one-thread-
//! per-engine design the original C sketches (see `DESIGN.md`). A
//! single `Engine` is not `Sync`; running it from more than one thread
//! means putting it behind your own `Mutex`, as documented on
//! [`Engine::send`].

use core::sync::atomic::{AtomicU16, Ordering};

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use no_std_net::SocketAddr;
use tinyvec::ArrayVec;

use crate::config::Config;
use crate::error::Error;
use crate::net::Socket;
use crate::pdu::{self, code, Code, CodecError, Id, Packet, PacketOut, Token, Type};
use crate::resource::{Found, Listener, Registry};
use crate::retry::{RetryTimer, YouShould};
use crate::time::Clock;

/// Maximum on-wire datagram size this engine will send or accept.
pub const PDU_BUF_SIZE: usize = 256;
/// Bytes retained for a non-confirmable request's matching record
/// (header + token; non-confirmables are never resent so the rest of
/// the datagram doesn't need to survive).
pub const HEADER_MAXLEN: usize = 16;

/// Sentinel `send_limit`: this memo tracks a non-confirmable request,
/// which is never retransmitted.
const NON_SENTINEL: i16 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReqState {
  Unused,
  Wait,
  Resp,
  Timeout,
}

/// A response captured verbatim into an owned, fixed-size buffer so it
/// can outlive the `&mut Engine` borrow that produced it.
#[derive(Debug, Clone)]
pub struct OwnedResponse {
  buf: ArrayVec<[u8; PDU_BUF_SIZE]>,
}

impl OwnedResponse {
  fn from_slice(bytes: &[u8]) -> Self {
    Self { buf: bytes.iter().copied().collect() }
  }

  /// The captured bytes.
  pub fn as_bytes(&self) -> &[u8] {
    &self.buf
  }

  /// Parse the captured bytes as a [`Packet`].
  pub fn parse(&self) -> Result<Packet<'_>, CodecError> {
    pdu::parse(&self.buf)
  }
}

/// What became of a submitted request.
#[derive(Debug, Clone)]
pub enum ReqResult {
  /// Submitted but not (yet) resolved. Only returned when
  /// [`Config::send_wait_for_response`] is `false`; retrieve the
  /// eventual outcome with [`Engine::take_result`].
  Pending,
  /// A response was matched.
  Response(OwnedResponse),
  /// Retransmissions (or, for non-confirmables, the single send) were
  /// exhausted without a matching response, or an ACK/RST closed the
  /// exchange with nothing to deliver.
  Timeout,
}

/// What a caller-supplied response [`Handler`] is told.
#[derive(Debug, Clone, Copy)]
pub enum HandlerOutcome<'p> {
  /// A response was matched.
  Response(Packet<'p>),
  /// The exchange resolved with nothing to deliver (terminal timeout,
  /// or an ACK/RST). There is no packet to point to — the resend
  /// buffer backing it has already been freed — so unlike the source's
  /// "delivered with a null PDU", this is a variant with no payload at
  /// all rather than an `Option<&Packet>` forced through a null case.
  Timeout,
}

/// A caller-supplied callback invoked inline, on the thread driving the
/// event loop, when a request resolves. Must not block or call
/// [`Engine::send`] on this same engine (see its docs for why).
pub type Handler = fn(HandlerOutcome<'_>, SocketAddr);

/// A submitted-but-not-yet-claimed request, returned by
/// [`Engine::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqHandle(usize);

struct ReqMemo<C: Clock> {
  state: ReqState,
  id: Id,
  token: Token,
  remote: Option<SocketAddr>,
  /// `NON_SENTINEL` for non-confirmable; otherwise remaining retries.
  send_limit: i16,
  resend_buf: Option<usize>,
  resend_len: usize,
  retry: Option<RetryTimer>,
  due_at: Option<Instant<C>>,
  handler: Option<Handler>,
  /// Kept alive (state stays `Resp`/`Timeout`, slot not freed) until
  /// claimed via [`Engine::take_result`].
  retain: bool,
  result_buf: ArrayVec<[u8; PDU_BUF_SIZE]>,
}

impl<C: Clock> ReqMemo<C> {
  const fn unused() -> Self {
    Self { state: ReqState::Unused,
           id: Id(0),
           token: Token::from_array_empty([0; 8]),
           remote: None,
           send_limit: NON_SENTINEL,
           resend_buf: None,
           resend_len: 0,
           retry: None,
           due_at: None,
           handler: None,
           retain: false,
           result_buf: ArrayVec::from_array_empty([0; PDU_BUF_SIZE]) }
  }
}

#[derive(Debug, Clone, Copy)]
struct Observer {
  addr: Option<SocketAddr>,
}

impl Observer {
  const fn empty() -> Self {
    Self { addr: None }
  }
}

#[derive(Clone)]
struct ObserveMemo {
  observer: Option<usize>,
  resource: Option<&'static str>,
  token: Token,
  /// 24-bit counter, strictly increasing (mod 2^24) per resource.
  last_value: u32,
}

impl ObserveMemo {
  const fn empty() -> Self {
    Self { observer: None, resource: None, token: Token::from_array_empty([0; 8]), last_value: 0 }
  }
}

/// An outgoing request to submit, as built by the caller (mirroring
/// `req_init` from the original API). `path` is written as the
/// request's `Uri-Path`.
pub struct OutgoingRequest<'a> {
  /// Message type: `Con` arms retransmission, `Non` does not.
  pub ty: Type,
  /// Request method.
  pub code: Code,
  /// Path to request, e.g. `/sensors/temp`.
  pub path: &'a str,
  /// Accumulated `Uri-Query` bytes, e.g. from [`crate::qstring::add_qstring`].
  pub query: &'a [u8],
  /// Request payload.
  pub payload: &'a [u8],
  /// `Observe` option to send: `Some(0)` registers, `Some(1)`
  /// deregisters.
  pub observe: Option<u32>,
}

impl<'a> OutgoingRequest<'a> {
  /// A bare `GET` with no payload, query, or Observe option.
  pub fn get(ty: Type, path: &'a str) -> Self {
    Self { ty, code: code::GET, path, query: &[], payload: &[], observe: None }
  }
}

/// The message engine: one transport, one set of slot tables, one
/// resource registry.
pub struct Engine<S: Socket, C: Clock, const REQS: usize = 4, const OBS: usize = 4, const MEMOS: usize = 4, const RESENDS: usize = 4> {
  config: Config,
  sock: S,
  clock: C,
  registry: Registry,
  next_message_id: AtomicU16,
  open_reqs: [ReqMemo<C>; REQS],
  observers: [Observer; OBS],
  observe_memos: [ObserveMemo; MEMOS],
  resend_bufs: [[u8; PDU_BUF_SIZE]; RESENDS],
  resend_used: [bool; RESENDS],
}

impl<S: Socket, C: Clock, const REQS: usize, const OBS: usize, const MEMOS: usize, const RESENDS: usize>
  Engine<S, C, REQS, OBS, MEMOS, RESENDS>
{
  const UNUSED_MEMO: ReqMemo<C> = ReqMemo::unused();
  const EMPTY_OBSERVER: Observer = Observer::empty();
  const EMPTY_OBS_MEMO: ObserveMemo = ObserveMemo::empty();

  /// Start an engine bound to `sock`. `/.well-known/core` is served
  /// automatically; application resources are added with
  /// [`Engine::register_listener`].
  pub fn new(config: Config, sock: S, clock: C) -> Self {
    Self { config,
           sock,
           clock,
           registry: Registry::new(),
           next_message_id: AtomicU16::new(1),
           open_reqs: [Self::UNUSED_MEMO; REQS],
           observers: [Self::EMPTY_OBSERVER; OBS],
           observe_memos: [Self::EMPTY_OBS_MEMO; MEMOS],
           resend_bufs: [[0u8; PDU_BUF_SIZE]; RESENDS],
           resend_used: [false; RESENDS] }
  }

  /// Register an application listener. Its resources must already be
  /// sorted ascending by path.
  pub fn register_listener(&mut self, listener: &'static Listener) -> Result<(), Error<S::Error>> {
    self.registry.register(listener).map_err(|_| Error::Capacity)
  }

  /// Count of open-request slots that aren't `Unused`. Mirrors
  /// `gcoap_op_state`.
  pub fn op_state(&self) -> usize {
    self.open_reqs.iter().filter(|m| m.state != ReqState::Unused).count()
  }

  /// Emit the CoRE Link Format listing of every registered resource
  /// (built-in `/.well-known/core` excluded). Mirrors
  /// `gcoap_get_resource_list`'s two-pass sizing: pass `None` to get the
  /// byte count that would be written.
  pub fn resource_list(&self, buf: Option<&mut [u8]>) -> Result<usize, Error<S::Error>> {
    crate::well_known::resource_list(self.registry.paths(), buf).map_err(|()| Error::Capacity)
  }

  fn alloc_message_id(&self) -> Id {
    Id(self.next_message_id.fetch_add(1, Ordering::Relaxed))
  }

  fn find_free_req(&self) -> Option<usize> {
    self.open_reqs.iter().position(|m| m.state == ReqState::Unused)
  }

  fn find_free_resend(&self) -> Option<usize> {
    self.resend_used.iter().position(|used| !used)
  }

  fn find_req_by_id(&self, id: Id) -> Option<usize> {
    self.open_reqs.iter().position(|m| m.state != ReqState::Unused && m.id == id)
  }

  /// Token-match per §4.C: equal lengths required, except a zero-length
  /// token matches the first in-use memo.
  fn find_req_by_token(&self, token: &[u8]) -> Option<usize> {
    if token.is_empty() {
      return self.open_reqs.iter().position(|m| m.state == ReqState::Wait);
    }
    self.open_reqs
        .iter()
        .position(|m| m.state == ReqState::Wait && m.token.as_slice() == token)
  }

  fn find_observer(&self, addr: SocketAddr) -> Option<usize> {
    self.observers.iter().position(|o| o.addr == Some(addr))
  }

  fn find_or_reserve_observer(&mut self, addr: SocketAddr) -> Option<usize> {
    if let Some(i) = self.find_observer(addr) {
      return Some(i);
    }
    let i = self.observers.iter().position(|o| o.addr.is_none())?;
    self.observers[i].addr = Some(addr);
    Some(i)
  }

  fn free_observer_if_unreferenced(&mut self, idx: usize) {
    let still_referenced = self.observe_memos.iter().any(|m| m.observer == Some(idx));
    if !still_referenced {
      self.observers[idx].addr = None;
    }
  }

  fn find_memo_for_resource(&self, resource: &str) -> Option<usize> {
    self.observe_memos.iter().position(|m| m.resource == Some(resource))
  }

  fn find_memo(&self, observer_idx: usize, token: &[u8]) -> Option<usize> {
    self.observe_memos
        .iter()
        .position(|m| m.observer == Some(observer_idx) && m.token.as_slice() == token)
  }

  fn now(&self) -> Result<Instant<C>, Error<S::Error>> {
    self.clock.try_now().map_err(Error::from)
  }

  fn token_for(&self, id: &Id) -> Token {
    let n = self.config.token_len.min(8) as usize;
    let seed = id.0.to_be_bytes();
    (0..n).map(|i| seed[i % 2] ^ i as u8).collect()
  }

  /// Submit an outbound request without blocking. When `handler` is
  /// `Some`, the engine invokes it inline at resolution time and frees
  /// the slot immediately after (pass `retain: false`). When `retain`
  /// is `true`, the slot is held until claimed with
  /// [`Engine::take_result`].
  pub fn submit(&mut self, req: &OutgoingRequest<'_>, remote: SocketAddr, handler: Option<Handler>, retain: bool) -> Result<ReqHandle, Error<S::Error>> {
    let slot = self.find_free_req().ok_or(Error::Capacity)?;
    let confirmable = matches!(req.ty, Type::Con);
    let resend_slot = if confirmable { Some(self.find_free_resend().ok_or(Error::Capacity)?) } else { None };

    let id = self.alloc_message_id();
    let token: Token = self.token_for(&id);

    let mut scratch = [0u8; PDU_BUF_SIZE];
    let hdr_len = pdu::build_hdr(&mut scratch, req.ty, &token, req.code, id).map_err(|_| Error::Encode)?;
    let out = PacketOut { is_success_response: false,
                          is_request: true,
                          observe: req.observe,
                          uri_path: Some(req.path),
                          content_format: None,
                          uri_query: Some(req.query),
                          payload: req.payload };
    let total = pdu::finish_pdu(&mut scratch, hdr_len, &out).map_err(|_| Error::Encode)?;

    nb::block!(self.sock.send(&scratch[..total], remote)).map_err(Error::Socket)?;

    let now = self.now()?;
    let memo = &mut self.open_reqs[slot];
    memo.state = ReqState::Wait;
    memo.id = id;
    memo.token = token;
    memo.remote = Some(remote);
    memo.handler = handler;
    memo.retain = retain;
    memo.result_buf.clear();

    if let Some(resend_idx) = resend_slot {
      self.resend_used[resend_idx] = true;
      self.resend_bufs[resend_idx][..total].copy_from_slice(&scratch[..total]);

      let seed = (id.0 as u64) << 16 | remote.port() as u64;
      let mut retry = RetryTimer::new(seed,
                                      Milliseconds(self.config.ack_timeout_millis),
                                      self.config.random_factor,
                                      self.config.max_retransmit as u16);
      let delay = retry.initial_delay();

      let memo = &mut self.open_reqs[slot];
      memo.resend_buf = Some(resend_idx);
      memo.resend_len = total;
      memo.send_limit = self.config.max_retransmit as i16;
      memo.retry = Some(retry);
      memo.due_at = Some(now + delay);
    } else {
      let memo = &mut self.open_reqs[slot];
      memo.send_limit = NON_SENTINEL;
      memo.due_at = Some(now + Milliseconds(self.config.non_timeout_millis));
    }

    Ok(ReqHandle(slot))
  }

  /// Send a request and, when [`Config::send_wait_for_response`] is
  /// set, block the calling thread — by repeatedly calling
  /// [`Engine::poll_once`] — until it resolves. With that flag unset,
  /// returns [`ReqResult::Pending`] immediately after the datagram is
  /// queued; poll the handle later with [`Engine::take_result`].
  ///
  /// # Reentrancy
  /// Never call this from a resource handler or from a [`Handler`]
  /// callback running on this same engine: both run on the thread
  /// already inside `poll_once`, so a nested blocking `send` would spin
  /// on its own unprocessed datagrams forever.
  pub fn send(&mut self, req: &OutgoingRequest<'_>, remote: SocketAddr) -> Result<ReqResult, Error<S::Error>> {
    let handle = self.submit(req, remote, None, true)?;
    if !self.config.send_wait_for_response {
      return Ok(ReqResult::Pending);
    }
    loop {
      self.poll_once()?;
      if let Some(result) = self.take_result(handle) {
        return Ok(result);
      }
    }
  }

  /// Retrieve the outcome of a request submitted with `retain: true`,
  /// freeing its slot. Returns `None` while still outstanding.
  pub fn take_result(&mut self, handle: ReqHandle) -> Option<ReqResult> {
    let memo = &mut self.open_reqs[handle.0];
    match memo.state {
      | ReqState::Resp => {
        let result = ReqResult::Response(OwnedResponse::from_slice(&memo.result_buf));
        *memo = ReqMemo::unused();
        Some(result)
      },
      | ReqState::Timeout => {
        *memo = ReqMemo::unused();
        Some(ReqResult::Timeout)
      },
      | _ => None,
    }
  }

  /// Ping `remote`: send an EMPTY confirmable (no code, no token) and
  /// wait for the RST every CoAP stack sends in reply to an unmatched
  /// EMPTY message (RFC 7252 §4.3), retrying with the usual backoff.
  /// Resolves to the round-trip time on success. Grounded in the
  /// teacher's `Core::ping`/`poll_ping`, adapted so the match key is
  /// message id rather than token (EMPTY messages carry none).
  pub fn ping(&mut self, remote: SocketAddr) -> Result<Milliseconds<u64>, Error<S::Error>> {
    let sent_at = self.now()?;
    let slot = self.find_free_req().ok_or(Error::Capacity)?;
    let resend_idx = self.find_free_resend().ok_or(Error::Capacity)?;

    let id = self.alloc_message_id();
    let mut scratch = [0u8; 8];
    let hdr_len = pdu::build_hdr(&mut scratch, Type::Con, &[], code::EMPTY, id).map_err(|_| Error::Encode)?;
    nb::block!(self.sock.send(&scratch[..hdr_len], remote)).map_err(Error::Socket)?;

    self.resend_used[resend_idx] = true;
    self.resend_bufs[resend_idx][..hdr_len].copy_from_slice(&scratch[..hdr_len]);

    let seed = (id.0 as u64) << 8;
    let mut retry = RetryTimer::new(seed,
                                    Milliseconds(self.config.ack_timeout_millis),
                                    self.config.random_factor,
                                    self.config.max_retransmit as u16);
    let delay = retry.initial_delay();
    let now = self.now()?;

    let memo = &mut self.open_reqs[slot];
    memo.state = ReqState::Wait;
    memo.id = id;
    memo.token = Token::new();
    memo.remote = Some(remote);
    memo.handler = None;
    memo.retain = true;
    memo.send_limit = self.config.max_retransmit as i16;
    memo.resend_buf = Some(resend_idx);
    memo.resend_len = hdr_len;
    memo.retry = Some(retry);
    memo.due_at = Some(now + delay);

    let handle = ReqHandle(slot);
    loop {
      self.poll_once()?;
      if let Some(result) = self.take_result(handle) {
        return match result {
          | ReqResult::Timeout => Err(Error::Timeout),
          | _ => {
            let now = self.now()?;
            let elapsed_us = now.duration_since_epoch().integer().saturating_sub(sent_at.duration_since_epoch().integer());
            Ok(Milliseconds(elapsed_us / 1_000))
          },
        };
      }
    }
  }

  /// Run one iteration of the event loop: check every armed
  /// retransmission timer, then receive and dispatch at most one
  /// datagram.
  pub fn poll_once(&mut self) -> Result<(), Error<S::Error>> {
    self.check_timers()?;

    let mut buf = [0u8; PDU_BUF_SIZE];
    match self.sock.recv(&mut buf) {
      | Ok((n, from)) => self.dispatch(&buf[..n], from)?,
      | Err(nb::Error::WouldBlock) => {},
      | Err(nb::Error::Other(e)) => return Err(Error::Socket(e)),
    }
    Ok(())
  }

  fn check_timers(&mut self) -> Result<(), Error<S::Error>> {
    let now = self.now()?;
    for slot in 0..REQS {
      let due = match self.open_reqs[slot].due_at {
        | Some(at) if self.open_reqs[slot].state == ReqState::Wait && now >= at => at,
        | _ => continue,
      };
      let _ = due;
      self.on_timeout(slot, now)?;
    }
    Ok(())
  }

  fn on_timeout(&mut self, slot: usize, now: Instant<C>) -> Result<(), Error<S::Error>> {
    if self.open_reqs[slot].send_limit == NON_SENTINEL {
      self.expire(slot);
      return Ok(());
    }

    let retry = match self.open_reqs[slot].retry.as_mut() {
      | Some(r) => r,
      | None => return Ok(()),
    };
    match retry.what_should_i_do(now) {
      | YouShould::Retry { at } => {
        let memo = &mut self.open_reqs[slot];
        memo.due_at = Some(at);
        if let (Some(idx), Some(remote), len) = (memo.resend_buf, memo.remote, memo.resend_len) {
          let buf = self.resend_bufs[idx];
          let _ = nb::block!(self.sock.send(&buf[..len], remote));
        }
      },
      | YouShould::Cry => self.expire(slot),
    }
    Ok(())
  }

  fn expire(&mut self, slot: usize) {
    let memo = &mut self.open_reqs[slot];
    if let Some(idx) = memo.resend_buf.take() {
      self.resend_used[idx] = false;
    }
    if let Some(h) = memo.handler.take() {
      // Invariant: a memo only reaches a state where `handler` can
      // still be `Some` after having been armed with `remote` set.
      h(HandlerOutcome::Timeout, memo.remote.expect("in-use memo has a remote"));
    }
    if memo.retain {
      memo.state = ReqState::Timeout;
    } else {
      *memo = ReqMemo::unused();
    }
  }

  fn dispatch(&mut self, bytes: &[u8], from: SocketAddr) -> Result<(), Error<S::Error>> {
    let pkt = match pdu::parse(bytes) {
      | Ok(p) => p,
      | Err(_) => {
        log::warn!("dropped malformed datagram from {:?}", from);
        return Ok(());
      },
    };
    log::trace!("recv {} from {:?}", core::str::from_utf8(&crate::logging::pkt_summary(&pkt)).unwrap_or(""), from);

    match pkt.code().kind() {
      | code::CodeKind::Empty => self.on_empty(&pkt, from),
      | code::CodeKind::Request => self.on_request(&pkt, bytes, from)?,
      | code::CodeKind::Response => self.on_response(&pkt, bytes, from),
    }
    Ok(())
  }

  fn on_empty(&mut self, pkt: &Packet<'_>, from: SocketAddr) {
    let slot = match self.find_req_by_id(pkt.id()) {
      | Some(s) => s,
      | None => return,
    };

    if matches!(pkt.ty(), Type::Reset) {
      let token = self.open_reqs[slot].token.clone();
      if let Some(obs_idx) = self.find_observer(from) {
        if let Some(memo_idx) = self.find_memo(obs_idx, &token) {
          self.observe_memos[memo_idx] = ObserveMemo::empty();
          self.free_observer_if_unreferenced(obs_idx);
        }
      }

      if token.is_empty() {
        // A Reset to a tokenless EMPTY confirmable is the reply `ping`
        // arms itself to wait for (RFC 7252 §4.3): the peer is alive and
        // rejected the probe by design. That's success, not a timeout.
        self.resolve_empty(slot);
        return;
      }
    }

    self.expire(slot);
  }

  /// Close out an exchange that resolved to an EMPTY message with
  /// nothing further expected (see the tokenless-Reset case in
  /// `on_empty`) — distinct from [`Self::expire`], which always reports
  /// [`ReqResult::Timeout`].
  fn resolve_empty(&mut self, slot: usize) {
    let memo = &mut self.open_reqs[slot];
    if let Some(idx) = memo.resend_buf.take() {
      self.resend_used[idx] = false;
    }
    memo.result_buf.clear();
    memo.handler.take();
    if memo.retain {
      memo.state = ReqState::Resp;
    } else {
      *memo = ReqMemo::unused();
    }
  }

  fn on_response(&mut self, pkt: &Packet<'_>, bytes: &[u8], from: SocketAddr) {
    if matches!(pkt.ty(), Type::Con) {
      log::warn!("dropped confirmable (separate) response from {:?}: not supported", from);
      return;
    }
    let slot = match self.find_req_by_token(pkt.token()) {
      | Some(s) => s,
      | None => return,
    };

    let memo = &mut self.open_reqs[slot];
    memo.result_buf = bytes.iter().copied().collect();
    if let Some(idx) = memo.resend_buf.take() {
      self.resend_used[idx] = false;
    }

    if let Some(h) = memo.handler.take() {
      if let Ok(p) = pdu::parse(&memo.result_buf) {
        h(HandlerOutcome::Response(p), from);
      }
    }

    if memo.retain {
      memo.state = ReqState::Resp;
    } else {
      *memo = ReqMemo::unused();
    }
  }

  fn on_request(&mut self, pkt: &Packet<'_>, _bytes: &[u8], from: SocketAddr) -> Result<(), Error<S::Error>> {
    let mut out = [0u8; PDU_BUF_SIZE];
    let n = self.handle_req(pkt, from, out.as_mut_slice())?;
    if n > 0 {
      let _ = nb::block!(self.sock.send(&out[..n as usize], from));
    }
    Ok(())
  }

  /// Locate the resource for `pkt`'s path+method, run Observe
  /// bookkeeping, and invoke its handler. Returns the number of bytes
  /// written to `buf`, or a negative value meaning "don't respond"
  /// (only for the "Observe present but not 0/1" protocol violation —
  /// every other path always writes a response, even an error one).
  fn handle_req(&mut self, pkt: &Packet<'_>, from: SocketAddr, buf: &mut [u8]) -> Result<isize, Error<S::Error>> {
    if pkt.url() == crate::well_known::PATH {
      return Ok(if pkt.code() == code::GET {
        crate::well_known::respond(pkt, self.registry.paths(), buf)
      } else {
        self.canned_response(pkt, buf, code::METHOD_NOT_ALLOWED)
      });
    }

    let found = self.registry.find(pkt.url(), pkt.code());
    let resource = match found {
      | Found::Resource(r) => r,
      | Found::WrongMethod => return Ok(self.canned_response(pkt, buf, code::METHOD_NOT_ALLOWED)),
      | Found::NotFound => return Ok(self.canned_response(pkt, buf, code::NOT_FOUND)),
    };

    let mut pkt = pkt.clone();
    if let Some(v) = pkt.observe() {
      match v {
        | 0 => {
          if self.find_memo_for_resource(resource.path()).is_some() {
            pkt.clear_observe();
          } else {
            let memo_idx = self.observe_memos.iter().position(|m| m.observer.is_none());
            match memo_idx {
              | Some(memo_idx) => {
                let obs_idx = self.find_or_reserve_observer(from);
                match obs_idx {
                  | Some(obs_idx) => {
                    self.observe_memos[memo_idx] = ObserveMemo { observer: Some(obs_idx),
                                                                  resource: Some(resource.path()),
                                                                  token: pkt.token().clone(),
                                                                  last_value: 0 };
                  },
                  | None => pkt.clear_observe(),
                }
              },
              | None => pkt.clear_observe(),
            }
          }
        },
        | 1 => {
          if let Some(obs_idx) = self.find_observer(from) {
            if let Some(memo_idx) = self.find_memo(obs_idx, pkt.token()) {
              self.observe_memos[memo_idx] = ObserveMemo::empty();
              self.free_observer_if_unreferenced(obs_idx);
            }
          }
          pkt.clear_observe();
        },
        | _ => return Ok(-1),
      }
    }

    if pkt.has_observe() {
      let now = self.now()?;
      let tick: u64 = now.duration_since_epoch().integer();
      let value = ((tick >> self.config.obs_tick_exponent) & 0x00FF_FFFF) as u32;
      pkt.set_observe(value);
      if let Some(memo_idx) = self.find_memo_for_resource(resource.path()) {
        self.observe_memos[memo_idx].last_value = value;
      }
    }

    let n = resource.handle(&pkt, buf);
    if n < 0 {
      log::debug!("resource handler for {} failed", resource.path());
      return Ok(self.canned_response(&pkt, buf, code::INTERNAL_SERVER_ERROR));
    }
    Ok(n)
  }

  fn canned_response(&self, req: &Packet<'_>, buf: &mut [u8], code: Code) -> isize {
    let ty = match req.ty() {
      | Type::Con => Type::Ack,
      | other => other,
    };
    let hdr_len = match pdu::build_hdr(buf, ty, req.token(), code, req.id()) {
      | Ok(n) => n,
      | Err(_) => return -1,
    };
    let out = PacketOut { is_success_response: false,
                          is_request: false,
                          observe: None,
                          uri_path: None,
                          content_format: None,
                          uri_query: None,
                          payload: &[] };
    pdu::finish_pdu(buf, hdr_len, &out).map(|n| n as isize).unwrap_or(-1)
  }

  /// Send a notification for `resource`. `buf[..len]` must already be a
  /// finished PDU (built with [`pdu::finish_pdu`]) whose type is read to
  /// decide delivery: `Non` is sent directly; `Con` re-enters the
  /// request path (no response handler) so retransmission and RST
  /// handling work the same as for a client-originated request.
  /// Returns `0` if no observer is registered for `resource`.
  pub fn obs_send(&mut self, buf: &[u8], resource: &str) -> Result<usize, Error<S::Error>> {
    let memo_idx = match self.find_memo_for_resource(resource) {
      | Some(i) => i,
      | None => return Ok(0),
    };
    let observer_idx = self.observe_memos[memo_idx].observer.ok_or(Error::NotFound)?;
    let remote = self.observers[observer_idx].addr.ok_or(Error::NotFound)?;

    let pkt = pdu::parse(buf).map_err(|_| Error::Encode)?;
    match pkt.ty() {
      | Type::Non => {
        nb::block!(self.sock.send(buf, remote)).map_err(Error::Socket)?;
        Ok(buf.len())
      },
      | Type::Con => {
        let slot = self.find_free_req().ok_or(Error::Capacity)?;
        let resend_idx = self.find_free_resend().ok_or(Error::Capacity)?;
        nb::block!(self.sock.send(buf, remote)).map_err(Error::Socket)?;

        self.resend_used[resend_idx] = true;
        self.resend_bufs[resend_idx][..buf.len()].copy_from_slice(buf);

        let seed = (pkt.id().0 as u64) << 16;
        let mut retry = RetryTimer::new(seed,
                                        Milliseconds(self.config.ack_timeout_millis),
                                        self.config.random_factor,
                                        self.config.max_retransmit as u16);
        let delay = retry.initial_delay();
        let now = self.now()?;

        let memo = &mut self.open_reqs[slot];
        memo.state = ReqState::Wait;
        memo.id = pkt.id();
        memo.token = pkt.token().clone();
        memo.remote = Some(remote);
        memo.handler = None;
        memo.retain = false;
        memo.send_limit = self.config.max_retransmit as i16;
        memo.resend_buf = Some(resend_idx);
        memo.resend_len = buf.len();
        memo.retry = Some(retry);
        memo.due_at = Some(now + delay);

        Ok(buf.len())
      },
      | _ => Err(Error::Encode),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};
  use std::collections::VecDeque;
  use std::rc::Rc;

  use embedded_time::rate::Fraction;
  use no_std_net::{Ipv4Addr, SocketAddrV4};

  use super::*;
  use crate::pdu::code::method_flag;
  use crate::resource::Resource;

  // Mirrors the teacher's `test::ClockMock`/`test::SockMock`: cheap,
  // `Rc`-shared fakes so the test driving `Engine` from the outside and
  // the `Engine` holding the transport/clock by value see the same state.

  #[derive(Clone)]
  struct FakeClock {
    micros: Rc<Cell<u64>>,
    auto_advance: u64,
  }

  impl FakeClock {
    fn new() -> Self {
      Self { micros: Rc::new(Cell::new(0)), auto_advance: 0 }
    }

    /// A clock that jumps forward by `step_micros` every time it's read,
    /// so a caller blocked in a retry loop (e.g. [`Engine::ping`]) runs
    /// its schedule to completion without a real sleep.
    fn with_auto_advance(step_micros: u64) -> Self {
      Self { micros: Rc::new(Cell::new(0)), auto_advance: step_micros }
    }

    fn set_millis(&self, ms: u64) {
      self.micros.set(ms * 1_000);
    }
  }

  impl embedded_time::Clock for FakeClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
      if self.auto_advance > 0 {
        self.micros.set(self.micros.get() + self.auto_advance);
      }
      Ok(Instant::new(self.micros.get()))
    }
  }

  #[derive(Clone)]
  struct FakeSocket {
    local: SocketAddr,
    rx: Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>,
    tx: Rc<RefCell<Vec<(Vec<u8>, SocketAddr)>>>,
  }

  impl FakeSocket {
    fn new(local: SocketAddr) -> Self {
      Self { local, rx: Rc::new(RefCell::new(VecDeque::new())), tx: Rc::new(RefCell::new(Vec::new())) }
    }

    fn push_inbound(&self, bytes: &[u8], from: SocketAddr) {
      self.rx.borrow_mut().push_back((bytes.to_vec(), from));
    }

    fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
      self.tx.borrow().clone()
    }
  }

  impl Socket for FakeSocket {
    type Error = core::convert::Infallible;

    fn local_addr(&self) -> SocketAddr {
      self.local
    }

    fn send(&self, data: &[u8], addr: SocketAddr) -> nb::Result<(), Self::Error> {
      self.tx.borrow_mut().push((data.to_vec(), addr));
      Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> nb::Result<(usize, SocketAddr), Self::Error> {
      match self.rx.borrow_mut().pop_front() {
        | Some((bytes, from)) => {
          let n = bytes.len().min(buf.len());
          buf[..n].copy_from_slice(&bytes[..n]);
          Ok((n, from))
        },
        | None => Err(nb::Error::WouldBlock),
      }
    }

    fn peek_addr(&self) -> nb::Result<SocketAddr, Self::Error> {
      self.rx.borrow().front().map(|(_, from)| *from).ok_or(nb::Error::WouldBlock)
    }

    fn bind(addr: SocketAddr) -> Result<Self, Self::Error> {
      Ok(Self::new(addr))
    }

    fn join_multicast(&self, _addr: no_std_net::IpAddr) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  fn local_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 5683))
  }

  fn peer_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 5683))
  }

  fn sensor_handler(req: &Packet<'_>, buf: &mut [u8]) -> isize {
    let ty = match req.ty() {
      | Type::Con => Type::Ack,
      | other => other,
    };
    let hdr_len = match pdu::build_hdr(buf, ty, req.token(), code::CONTENT, req.id()) {
      | Ok(n) => n,
      | Err(_) => return -1,
    };
    let out = PacketOut { is_success_response: true,
                          is_request: false,
                          observe: req.observe(),
                          uri_path: None,
                          content_format: None,
                          uri_query: None,
                          payload: b"21.5" };
    pdu::finish_pdu(buf, hdr_len, &out).map(|n| n as isize).unwrap_or(-1)
  }

  static SENSOR: [Resource; 1] = [Resource::new("/sensors/temp", method_flag::GET, sensor_handler)];
  static SENSOR_LISTENER: Listener = Listener::new(&SENSOR);

  #[test]
  fn non_get_round_trips_through_a_fake_peer() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::new();
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(Config::default(), sock.clone(), clock);

    let remote = peer_addr();
    let req = OutgoingRequest::get(Type::Non, "/sensors/temp");
    let handle = engine.submit(&req, remote, None, true).unwrap();

    let sent = sock.sent();
    assert_eq!(sent.len(), 1);
    let (bytes, to) = &sent[0];
    assert_eq!(*to, remote);
    let sent_pkt = pdu::parse(bytes).unwrap();
    assert_eq!(sent_pkt.url(), "/sensors/temp");

    let mut resp_buf = [0u8; 64];
    let hdr_len = pdu::build_hdr(&mut resp_buf, Type::Non, sent_pkt.token(), code::CONTENT, sent_pkt.id()).unwrap();
    let out = PacketOut { is_success_response: true,
                          is_request: false,
                          observe: None,
                          uri_path: None,
                          content_format: None,
                          uri_query: None,
                          payload: b"20.0" };
    let total = pdu::finish_pdu(&mut resp_buf, hdr_len, &out).unwrap();
    sock.push_inbound(&resp_buf[..total], remote);

    engine.poll_once().unwrap();

    match engine.take_result(handle).unwrap() {
      | ReqResult::Response(resp) => assert_eq!(resp.parse().unwrap().payload(), b"20.0"),
      | other => panic!("expected a response, got {:?}", other),
    }
  }

  #[test]
  fn con_retransmission_follows_backoff_schedule_then_times_out() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::new();
    let config = Config { ack_timeout_millis: 2_000, random_factor: 1.0, max_retransmit: 4, ..Config::default() };
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(config, sock.clone(), clock.clone());

    let remote = peer_addr();
    let req = OutgoingRequest::get(Type::Con, "/sensors/temp");
    let handle = engine.submit(&req, remote, None, true).unwrap();
    assert_eq!(sock.sent().len(), 1, "original transmission");

    for due_ms in [2_000u64, 4_000, 8_000, 16_000] {
      clock.set_millis(due_ms);
      engine.poll_once().unwrap();
    }
    assert_eq!(sock.sent().len(), 5, "original plus four retries, matching the literal ACK_TIMEOUT*2^n schedule");

    clock.set_millis(32_000);
    engine.poll_once().unwrap();
    assert!(matches!(engine.take_result(handle), Some(ReqResult::Timeout)));
    assert_eq!(sock.sent().len(), 5, "no further retransmission once retries are exhausted");
  }

  #[test]
  fn observe_register_then_notify() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::new();
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(Config::default(), sock.clone(), clock);
    engine.register_listener(&SENSOR_LISTENER).unwrap();

    let observer = peer_addr();
    let mut req_buf = [0u8; 64];
    let hdr_len = pdu::build_hdr(&mut req_buf, Type::Con, &[9, 9], code::GET, Id(42)).unwrap();
    let out = PacketOut { is_success_response: false,
                          is_request: true,
                          observe: Some(0),
                          uri_path: Some("/sensors/temp"),
                          content_format: None,
                          uri_query: None,
                          payload: &[] };
    let total = pdu::finish_pdu(&mut req_buf, hdr_len, &out).unwrap();
    sock.push_inbound(&req_buf[..total], observer);

    engine.poll_once().unwrap();

    let sent = sock.sent();
    assert_eq!(sent.len(), 1);
    let resp = pdu::parse(&sent[0].0).unwrap();
    assert_eq!(resp.observe(), Some(0), "registration ack echoes Observe: 0");
    assert_eq!(resp.payload(), b"21.5");

    let mut notif_buf = [0u8; 64];
    let nhdr = pdu::build_hdr(&mut notif_buf, Type::Non, &[9, 9], code::CONTENT, Id(43)).unwrap();
    let nout = PacketOut { is_success_response: true,
                           is_request: false,
                           observe: Some(1),
                           uri_path: None,
                           content_format: None,
                           uri_query: None,
                           payload: b"22.0" };
    let ntotal = pdu::finish_pdu(&mut notif_buf, nhdr, &nout).unwrap();

    let n = engine.obs_send(&notif_buf[..ntotal], "/sensors/temp").unwrap();
    assert_eq!(n, ntotal);
    assert_eq!(sock.sent().len(), 2);
  }

  #[test]
  fn reset_to_a_notification_deregisters_the_observer() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::new();
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(Config::default(), sock.clone(), clock);
    engine.register_listener(&SENSOR_LISTENER).unwrap();

    let observer = peer_addr();
    let mut req_buf = [0u8; 64];
    let hdr_len = pdu::build_hdr(&mut req_buf, Type::Con, &[9, 9], code::GET, Id(1)).unwrap();
    let out = PacketOut { is_success_response: false,
                          is_request: true,
                          observe: Some(0),
                          uri_path: Some("/sensors/temp"),
                          content_format: None,
                          uri_query: None,
                          payload: &[] };
    let total = pdu::finish_pdu(&mut req_buf, hdr_len, &out).unwrap();
    sock.push_inbound(&req_buf[..total], observer);
    engine.poll_once().unwrap();

    let mut notif_buf = [0u8; 64];
    let nhdr = pdu::build_hdr(&mut notif_buf, Type::Con, &[9, 9], code::CONTENT, Id(100)).unwrap();
    let nout = PacketOut { is_success_response: true,
                           is_request: false,
                           observe: Some(5),
                           uri_path: None,
                           content_format: None,
                           uri_query: None,
                           payload: b"23.0" };
    let ntotal = pdu::finish_pdu(&mut notif_buf, nhdr, &nout).unwrap();
    engine.obs_send(&notif_buf[..ntotal], "/sensors/temp").unwrap();

    let mut rst = [0u8; 4];
    let rst_len = pdu::build_hdr(&mut rst, Type::Reset, &[], code::EMPTY, Id(100)).unwrap();
    sock.push_inbound(&rst[..rst_len], observer);
    engine.poll_once().unwrap();

    let n = engine.obs_send(&notif_buf[..ntotal], "/sensors/temp").unwrap();
    assert_eq!(n, 0, "no observer remains for the resource after the RST");
  }

  #[test]
  fn ping_resolves_on_the_matching_reset() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::new();
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(Config::default(), sock.clone(), clock);
    let remote = peer_addr();

    // A fresh engine's message-ID counter starts at 1.
    let mut rst = [0u8; 4];
    let rst_len = pdu::build_hdr(&mut rst, Type::Reset, &[], code::EMPTY, Id(1)).unwrap();
    sock.push_inbound(&rst[..rst_len], remote);

    engine.ping(remote).unwrap();
    assert_eq!(sock.sent().len(), 1);
  }

  #[test]
  fn ping_times_out_without_a_reset() {
    let sock = FakeSocket::new(local_addr());
    let clock = FakeClock::with_auto_advance(3_000_000);
    let config = Config { random_factor: 1.0, ..Config::default() };
    let mut engine: Engine<FakeSocket, FakeClock> = Engine::new(config, sock.clone(), clock);

    match engine.ping(peer_addr()) {
      | Err(Error::Timeout) => {},
      | other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(sock.sent().len() > 1, "the ping should have been retransmitted before giving up");
  }
}
