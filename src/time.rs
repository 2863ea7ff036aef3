//! Time abstractions used by the retransmission and observe subsystems.
//!
//! The engine is generic over [`embedded_time::Clock`] so that the same retry
//! and observe-tick math runs on a wall clock (`std`) or a hardware timer
//! (no_std). All durations the engine reasons about are in milliseconds
//! ([`Millis`]); the observe tick value additionally needs microsecond
//! resolution, so clocks report [`embedded_time::Clock::T`] in microseconds.

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// Milliseconds, the unit the engine schedules retransmissions in.
pub type Millis = Milliseconds<u64>;

/// A clock whose tick is `u64` microseconds.
///
/// Blanket-implemented for anything satisfying [`embedded_time::Clock<T = u64>`]
/// so platform clocks need only implement the upstream trait.
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// How long to wait for something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
  /// Wait at most this many milliseconds.
  Millis(u64),
  /// Wait forever.
  Never,
}

/// A value stamped with the clock reading at which it was produced.
#[derive(Clone, Copy)]
pub struct Stamped<C: Clock, T> {
  data: T,
  at: Instant<C>,
}

impl<C: Clock, T> Stamped<C, T> {
  /// Pair a value with a clock reading.
  pub fn new(data: T, at: Instant<C>) -> Self {
    Self { data, at }
  }

  /// The wrapped value.
  pub fn data(&self) -> &T {
    &self.data
  }

  /// The clock reading at which `data` was stamped.
  pub fn at(&self) -> Instant<C> {
    self.at
  }
}

impl<C: Clock, T: core::fmt::Debug> core::fmt::Debug for Stamped<C, T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Stamped").field("data", &self.data).finish()
  }
}
