//! Exponential backoff with jitter for confirmable retransmission.
//!
//! The event loop arms one of these per outstanding confirmable exchange.
//! The first timer (armed right after the original transmission) fires
//! after `ack_timeout`. Each subsequent timer fires after
//! `ack_timeout * 2^(n-2)` where `n` is the 1-indexed count of timers
//! armed so far (so the first two timers share the same base delay, and
//! it doubles from there) — this is the schedule that produces
//! transmissions at `t ≈ 0, 2, 4, 8, 16s` for `ack_timeout = 2s`,
//! `max_retransmit = 4`, `random_factor = 1.0`. Every delay is jittered
//! uniformly into `[delay, delay * random_factor]`.

use embedded_time::duration::Milliseconds;
use embedded_time::fixed_point::FixedPoint;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::time::Clock;

/// What a retrying caller should do when its timer fires.
#[derive(Debug, Clone, Copy)]
pub enum YouShould<C: Clock> {
  /// Retransmit now; arm the next timer for `at`.
  Retry {
    /// When the next timeout should fire.
    at: Instant<C>,
  },
  /// Retransmissions are exhausted. Give up.
  Cry,
}

/// Tracks retransmission timing for one outstanding confirmable exchange.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  init_millis: u64,
  random_factor: f32,
  max_retransmit: u16,
  /// Index (1-based) of the most recently armed timer. `0` before
  /// [`Self::initial_delay`] has been called.
  n: u16,
  rng_seed: u64,
}

impl RetryTimer {
  /// Start a new retry timer.
  ///
  /// `rng_seed` should vary per-exchange (e.g. derived from the message
  /// ID and send time) so concurrent exchanges don't share a jitter
  /// sequence.
  pub fn new(rng_seed: u64, init: Milliseconds<u64>, random_factor: f32, max_retransmit: u16) -> Self {
    Self { init_millis: init.integer(),
           random_factor,
           max_retransmit,
           n: 0,
           rng_seed }
  }

  fn delay_for(&self, n: u16) -> Milliseconds<u64> {
    let exp = n.saturating_sub(2);
    let base = self.init_millis as f64 * 2f64.powi(exp as i32);
    let max = base * self.random_factor as f64;
    let jittered = if max > base {
      let mut rng = ChaCha8Rng::seed_from_u64(self.rng_seed.wrapping_add(n as u64));
      rng.gen_range(base..=max)
    } else {
      base
    };
    Milliseconds(jittered as u64)
  }

  /// The delay to arm right after the original transmission, before any
  /// timeout has fired.
  pub fn initial_delay(&mut self) -> Milliseconds<u64> {
    self.n = 1;
    self.delay_for(1)
  }

  /// Call when this exchange's currently-armed timer fires at `now`.
  /// Reports whether to retransmit (and when to next arm the timer) or
  /// give up.
  pub fn what_should_i_do<C: Clock>(&mut self, now: Instant<C>) -> YouShould<C> {
    let retries_used_before = self.n.saturating_sub(1);
    let retries_remaining = self.max_retransmit.saturating_sub(retries_used_before);
    if retries_remaining == 0 {
      YouShould::Cry
    } else {
      self.n += 1;
      let delay = self.delay_for(self.n);
      YouShould::Retry { at: now + delay }
    }
  }
}

#[cfg(test)]
mod tests {
  use core::cell::Cell;

  use embedded_time::rate::Fraction;

  use super::*;

  #[derive(Debug, Clone, Copy)]
  struct FakeClock<'a>(&'a Cell<u64>);

  impl<'a> embedded_time::Clock for FakeClock<'a> {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
      Ok(Instant::new(self.0.get()))
    }
  }

  #[test]
  fn matches_literal_retransmission_schedule() {
    let now_ms = Cell::new(0u64);
    let clock = FakeClock(&now_ms);

    let mut timer = RetryTimer::new(0, Milliseconds(2_000), 1.0, 4);

    let mut transmissions = vec![0u64];
    let mut at: Instant<FakeClock> = clock.try_now().unwrap() + timer.initial_delay();

    loop {
      let fired_at = at.duration_since_epoch().integer();
      match timer.what_should_i_do(at) {
        | YouShould::Retry { at: next } => {
          transmissions.push(fired_at);
          at = next;
        },
        | YouShould::Cry => break,
      }
    }

    assert_eq!(transmissions, vec![0, 2_000, 4_000, 8_000, 16_000]);
  }
}
