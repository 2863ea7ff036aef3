//! CoAP option numbers (RFC 7252 §5.10) and Content-Format registrations
//! this engine understands.

/// Observe (RFC 7641 §2).
pub const OBSERVE: u16 = 6;
/// Uri-Path (RFC 7252 §5.10.1).
pub const URI_PATH: u16 = 11;
/// Content-Format (RFC 7252 §5.10.3).
pub const CONTENT_FORMAT: u16 = 12;
/// Uri-Query (RFC 7252 §5.10.1).
pub const URI_QUERY: u16 = 15;

/// `0xFF`, the byte that separates options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// A registered Content-Format value (RFC 7252 §12.3).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format` (RFC 6690), used by `/.well-known/core`.
  LinkFormat,
  /// `application/octet-stream`
  OctetStream,
  /// `application/json`
  Json,
  /// Anything else, by its registered numeric value.
  Other(u16),
}

impl From<ContentFormat> for u16 {
  fn from(c: ContentFormat) -> Self {
    match c {
      | ContentFormat::Text => 0,
      | ContentFormat::LinkFormat => 40,
      | ContentFormat::OctetStream => 42,
      | ContentFormat::Json => 50,
      | ContentFormat::Other(n) => n,
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    match n {
      | 0 => ContentFormat::Text,
      | 40 => ContentFormat::LinkFormat,
      | 42 => ContentFormat::OctetStream,
      | 50 => ContentFormat::Json,
      | other => ContentFormat::Other(other),
    }
  }
}
