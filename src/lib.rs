//! A constrained-device CoAP (RFC 7252) request/response engine with
//! Observe (RFC 7641) support.
//!
//! CoAP carries HTTP-shaped request/response semantics over UDP
//! datagrams, sized for devices too small to carry a TCP/TLS stack.
//! This crate implements the wire codec, a fixed-capacity message
//! engine (open requests, registered observers, retransmission
//! timers), and the Observe extension, without allocating: every slot
//! table is a `const`-generic-sized array, so an [`engine::Engine`]'s
//! footprint is fixed at compile time.
//!
//! ## Layout
//! - [`pdu`] — the wire format: parsing, option encoding, codes, types.
//! - [`resource`] — the application-facing resource registry.
//! - [`engine`] — the event loop and per-exchange state machines.
//! - [`retry`] — confirmable retransmission backoff.
//! - [`net`] — the [`net::Socket`] transport seam.
//! - [`time`] — the [`time::Clock`] seam.
//! - [`config`] — runtime-tunable engine parameters.
//! - [`error`] — the crate-wide error type.
//! - [`well_known`] — the built-in `/.well-known/core` discovery resource.
//! - [`qstring`] — `Uri-Query` accumulation for outgoing requests.
//!
//! With the `std` feature (on by default), [`std_support`] adds a
//! [`net::Socket`] impl for [`std::net::UdpSocket`], a wall-clock
//! [`time::Clock`], and a DTLS-secured transport; [`blocking`] adds a
//! thin synchronous client built on top.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(not(test), deny(unsafe_code))]

/// Runtime-tunable engine parameters (RFC 7252 retransmission knobs,
/// token length, and friends).
pub mod config;
/// The crate-wide error type.
pub mod error;
pub(crate) mod logging;
/// The transport seam the engine sends and receives datagrams through.
pub mod net;
/// The CoAP wire codec.
pub mod pdu;
/// The application-facing resource registry.
pub mod resource;
/// Confirmable-message retransmission backoff.
pub mod retry;
/// The clock seam the engine schedules retransmission and Observe
/// ticks against.
pub mod time;

/// `Uri-Query` accumulation for outgoing requests.
pub mod qstring;
/// The built-in `/.well-known/core` discovery resource.
pub mod well_known;

/// The event loop, slot tables, and request/response/observe dispatch.
pub mod engine;

#[cfg(feature = "std")]
/// `std`-only platform glue: a wall-clock [`time::Clock`], a
/// [`net::Socket`] impl for [`std::net::UdpSocket`], and (behind the
/// `openssl` dependency this feature pulls in) a DTLS-secured
/// transport.
pub mod std_support;

#[cfg(feature = "std")]
/// A thin blocking client built atop [`engine::Engine`], for callers
/// who just want to send a request and get a response back.
pub mod blocking;

pub use config::Config;
pub use engine::{Engine, HandlerOutcome, OutgoingRequest, ReqHandle, ReqResult};
pub use error::Error;
pub use net::{Addrd, Socket};
pub use pdu::{Code, CodecError, ContentFormat, Packet, PacketOut, Type};
pub use resource::{Listener, Registry, Resource};
pub use time::Clock;
