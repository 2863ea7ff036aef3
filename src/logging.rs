//! Trace-log formatting helpers.
//!
//! Kept separate from the call sites so the `write!`-based formatting
//! (which needs a scratch buffer since we're `no_std`) doesn't clutter
//! the engine's dispatch logic.

use core::fmt::Write;

use tinyvec::ArrayVec;

use crate::pdu::{Packet, Type};

/// A short one-line summary of a packet, suitable for a `trace!` log.
/// Truncated rather than reallocated if it doesn't fit.
pub fn pkt_summary(pkt: &Packet<'_>) -> ArrayVec<[u8; 64]> {
  struct W(ArrayVec<[u8; 64]>);
  impl Write for W {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
      for b in s.bytes() {
        if self.0.try_push(b).is_some() {
          break;
        }
      }
      Ok(())
    }
  }

  let ty = match pkt.ty() {
    | Type::Con => "CON",
    | Type::Non => "NON",
    | Type::Ack => "ACK",
    | Type::Reset => "RST",
  };

  let mut w = W(ArrayVec::new());
  let _ = write!(w, "{} {}.{:02} id={}", ty, pkt.code().class(), pkt.code().detail(), pkt.id().0);
  w.0
}
