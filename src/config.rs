//! Runtime-configurable engine parameters.
//!
//! The original source expresses these as compile-time constants. Slot
//! table *capacities* stay compile-time here too (they're `const` generic
//! parameters on [`crate::engine::Engine`], since they size fixed arrays),
//! but the retransmission/timing knobs are runtime values assembled once
//! at `init` and threaded through the engine — mirroring [`Config`] in the
//! teacher crate this one is descended from. This is what lets a test
//! disable retransmission jitter (`random_factor = 1.0`) without a
//! separate build.

/// RFC 7252 retransmission parameters and the handful of other runtime
/// knobs the engine needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
  /// UDP port the engine listens on.
  pub port: u16,
  /// Base ACK timeout, milliseconds. RFC 7252 default: 2000.
  pub ack_timeout_millis: u64,
  /// Multiplier applied to `ack_timeout_millis` to form the upper bound
  /// of the jitter range for the first retransmission. RFC 7252 default:
  /// 1.5. Tests that need deterministic timing set this to `1.0`.
  pub random_factor: f32,
  /// Maximum number of retransmissions of a confirmable message before
  /// the exchange is considered timed out. RFC 7252 default: 4.
  pub max_retransmit: u8,
  /// Single-shot timeout for non-confirmable requests, milliseconds.
  pub non_timeout_millis: u64,
  /// Recv timeout used by the event loop while any request is
  /// outstanding, milliseconds.
  pub recv_timeout_millis: u64,
  /// Token length used for outgoing requests, 0-8 bytes.
  pub token_len: u8,
  /// Right-shift applied to the microsecond clock to form a 24-bit
  /// observe value.
  pub obs_tick_exponent: u32,
  /// Whether `req_send`/`Engine::send` blocks the caller until the
  /// exchange completes (response or terminal timeout) rather than
  /// returning once the datagram is queued.
  pub send_wait_for_response: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self { port: 5683,
           ack_timeout_millis: 2_000,
           random_factor: 1.5,
           max_retransmit: 4,
           non_timeout_millis: 5_000,
           recv_timeout_millis: 1_000,
           token_len: 4,
           obs_tick_exponent: 5,
           send_wait_for_response: true }
  }
}

impl Config {
  /// `ACK_TIMEOUT * 2^MAX_RETRANSMIT * RANDOM_FACTOR`, the worst-case
  /// time a confirmable exchange can remain outstanding before the
  /// final retry's ACK window closes.
  pub fn max_transmit_span_millis(&self) -> u64 {
    let span = (self.ack_timeout_millis as f32) * 2f32.powi(self.max_retransmit as i32 - 1)
               * self.random_factor;
    span as u64
  }

  /// `max_transmit_span + (2 * processing_delay) + ack_timeout`, an
  /// upper bound on how long a message ID must be remembered to reject
  /// duplicates.
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis() + 2 * 200 + self.ack_timeout_millis
  }
}
