//! RFC 7252 §3 message type.

/// CoAP message type, the two bits following the version in the header
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
  /// Confirmable — retransmitted until acked or reset.
  Con,
  /// Non-confirmable — sent once, not retransmitted.
  Non,
  /// Acknowledgement of a confirmable message.
  Ack,
  /// Rejection of a confirmable or non-confirmable message.
  Reset,
}

impl Type {
  /// The 2-bit wire value.
  pub fn bits(&self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}

impl TryFrom<u8> for Type {
  type Error = ();

  fn try_from(b: u8) -> Result<Self, ()> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(()),
    }
  }
}
