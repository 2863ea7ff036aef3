//! CoAP PDU codec (RFC 7252 §3).
//!
//! [`Packet`] is a parsed view over a caller-owned datagram: the header
//! fields and token are copied into small fixed buffers (cheap, and lets
//! `Packet` outlive option iteration), while the payload stays a borrow
//! into the original buffer. Encoding goes the other way: callers hand
//! [`finish_pdu`] a [`PacketOut`] describing what to write and a buffer
//! to write it into; nothing here ever allocates.

pub mod code;
pub mod option;
pub mod ty;

pub use code::{method_to_flag, Code, CodeKind};
pub use option::ContentFormat;
pub use ty::Type;

use tinyvec::ArrayVec;

use self::option::{CONTENT_FORMAT, OBSERVE, PAYLOAD_MARKER, URI_PATH, URI_QUERY};

/// A 16-bit CoAP message ID (RFC 7252 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u16);

impl Id {
  /// Parse a big-endian message ID from the first two bytes of `buf`.
  pub fn from_be_bytes(buf: [u8; 2]) -> Self {
    Id(u16::from_be_bytes(buf))
  }
}

/// A 0-8 byte request token (RFC 7252 §5.3.1).
pub type Token = ArrayVec<[u8; 8]>;

/// Bounded storage for a request path, e.g. `/sensors/temp`.
pub type UrlBuf = ArrayVec<[u8; 64]>;

/// Bounded storage for a query string, e.g. `a=1&b=2`.
pub type QueryBuf = ArrayVec<[u8; 80]>;

/// Codec failure. Distinct from [`crate::error::Error`] because the codec
/// doesn't know about sockets or clocks; the engine maps these in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
  /// The datagram is shorter than the base header, has an unsupported
  /// version, or an option runs past the buffer.
  Malformed,
  /// An option was written out of delta order, or didn't fit in the
  /// destination buffer.
  Encode,
}

/// A parsed CoAP message.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
  ty: Type,
  code: Code,
  id: Id,
  token: Token,
  url: UrlBuf,
  query: QueryBuf,
  content_format: Option<ContentFormat>,
  observe: Option<u32>,
  payload: &'a [u8],
}

impl<'a> Packet<'a> {
  /// Message type.
  pub fn ty(&self) -> Type {
    self.ty
  }

  /// Method or response code.
  pub fn code(&self) -> Code {
    self.code
  }

  /// Message ID.
  pub fn id(&self) -> Id {
    self.id
  }

  /// Request token, 0-8 bytes.
  pub fn token(&self) -> &Token {
    &self.token
  }

  /// `Uri-Path` options joined with `/`, e.g. `/a/b`. Empty if none were
  /// present.
  pub fn url(&self) -> &str {
    core::str::from_utf8(&self.url).unwrap_or("")
  }

  /// Accumulated `Uri-Query` bytes.
  pub fn query(&self) -> &[u8] {
    &self.query
  }

  /// `Content-Format` option, if present.
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.content_format
  }

  /// `Observe` option value, if present.
  pub fn observe(&self) -> Option<u32> {
    self.observe
  }

  /// Whether an `Observe` option was present.
  pub fn has_observe(&self) -> bool {
    self.observe.is_some()
  }

  /// Clear the `Observe` option, so a response built from this packet
  /// doesn't echo it.
  pub fn clear_observe(&mut self) {
    self.observe = None;
  }

  /// Set the `Observe` option value to be echoed in a response.
  pub fn set_observe(&mut self, value: u32) {
    self.observe = Some(value & 0x00FF_FFFF);
  }

  /// Payload bytes, borrowed from the buffer `self` was parsed from.
  pub fn payload(&self) -> &'a [u8] {
    self.payload
  }
}

fn read_ext(buf: &[u8], pos: &mut usize, nibble: u8) -> Result<u16, CodecError> {
  match nibble {
    | 0..=12 => Ok(nibble as u16),
    | 13 => {
      let b = *buf.get(*pos).ok_or(CodecError::Malformed)?;
      *pos += 1;
      Ok(b as u16 + 13)
    },
    | 14 => {
      let hi = *buf.get(*pos).ok_or(CodecError::Malformed)?;
      let lo = *buf.get(*pos + 1).ok_or(CodecError::Malformed)?;
      *pos += 2;
      Ok(u16::from_be_bytes([hi, lo]) + 269)
    },
    | _ => Err(CodecError::Malformed),
  }
}

/// Parse a CoAP message from `buf`.
///
/// Fails with [`CodecError::Malformed`] if `buf` is shorter than the base
/// header, the version isn't `1`, the token length claims more bytes
/// than exist, or any option's length runs past the end of `buf`.
pub fn parse(buf: &[u8]) -> Result<Packet<'_>, CodecError> {
  if buf.len() < 4 {
    return Err(CodecError::Malformed);
  }

  let byte0 = buf[0];
  let ver = byte0 >> 6;
  if ver != 1 {
    return Err(CodecError::Malformed);
  }
  let ty = Type::try_from((byte0 >> 4) & 0b11).map_err(|_| CodecError::Malformed)?;
  let tkl = (byte0 & 0b1111) as usize;
  if tkl > 8 {
    return Err(CodecError::Malformed);
  }

  let code = Code::from(buf[1]);
  let id = Id::from_be_bytes([buf[2], buf[3]]);

  let mut pos = 4;
  if buf.len() < pos + tkl {
    return Err(CodecError::Malformed);
  }
  let token: Token = buf[pos..pos + tkl].iter().copied().collect();
  pos += tkl;

  let mut url = UrlBuf::new();
  let mut query = QueryBuf::new();
  let mut content_format = None;
  let mut observe = None;
  let mut last_optnum: u16 = 0;

  while pos < buf.len() {
    if buf[pos] == PAYLOAD_MARKER {
      pos += 1;
      break;
    }

    let header = buf[pos];
    pos += 1;
    let delta = read_ext(buf, &mut pos, header >> 4)?;
    let length = read_ext(buf, &mut pos, header & 0b1111)? as usize;
    let optnum = last_optnum + delta;
    last_optnum = optnum;

    if pos + length > buf.len() {
      return Err(CodecError::Malformed);
    }
    let value = &buf[pos..pos + length];
    pos += length;

    match optnum {
      | URI_PATH => {
        let _ = url.try_push(b'/');
        for &b in value {
          if url.try_push(b).is_some() {
            break;
          }
        }
      },
      | URI_QUERY => {
        if !query.is_empty() {
          let _ = query.try_push(b'&');
        }
        for &b in value {
          if query.try_push(b).is_some() {
            break;
          }
        }
      },
      | CONTENT_FORMAT => {
        let v = be_uint(value);
        content_format = Some(ContentFormat::from(v as u16));
      },
      | OBSERVE => {
        observe = Some(be_uint(value) & 0x00FF_FFFF);
      },
      | _ => { /* unrecognized elective option: ignore */ },
    }
  }

  Ok(Packet { ty,
              code,
              id,
              token,
              url,
              query,
              content_format,
              observe,
              payload: &buf[pos..] })
}

fn be_uint(bytes: &[u8]) -> u32 {
  bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Write a CoAP base header (version 1) into `buf`. Returns the number
/// of bytes written, or [`CodecError::Encode`] if `buf` or `token` don't
/// fit the constraints (`token.len() > 8`, or `buf` too short).
pub fn build_hdr(buf: &mut [u8], ty: Type, token: &[u8], code: Code, id: Id) -> Result<usize, CodecError> {
  if token.len() > 8 || buf.len() < 4 + token.len() {
    return Err(CodecError::Encode);
  }
  buf[0] = (1 << 6) | (ty.bits() << 4) | token.len() as u8;
  buf[1] = code.into();
  buf[2..4].copy_from_slice(&id.0.to_be_bytes());
  buf[4..4 + token.len()].copy_from_slice(token);
  Ok(4 + token.len())
}

fn encode_ext(n: u16) -> (u8, [u8; 2], usize) {
  if n < 13 {
    (n as u8, [0, 0], 0)
  } else if n < 269 {
    (13, [(n - 13) as u8, 0], 1)
  } else {
    let v = n - 269;
    let b = v.to_be_bytes();
    (14, b, 2)
  }
}

/// Write one option (RFC 7252 §3.1) at `*pos`, advancing it.
///
/// `optnum` must be `>= *last_optnum`; CoAP's delta encoding can't
/// express options out of numeric order. Violating this is a caller
/// bug, surfaced as [`CodecError::Encode`] rather than a panic.
pub fn put_option(buf: &mut [u8], pos: &mut usize, last_optnum: &mut u16, optnum: u16, value: &[u8]) -> Result<(), CodecError> {
  if optnum < *last_optnum {
    return Err(CodecError::Encode);
  }
  let delta = optnum - *last_optnum;
  let (delta_nibble, delta_ext, delta_ext_len) = encode_ext(delta);
  let (len_nibble, len_ext, len_ext_len) = encode_ext(value.len() as u16);

  let needed = 1 + delta_ext_len + len_ext_len + value.len();
  if buf.len() < *pos + needed {
    return Err(CodecError::Encode);
  }

  buf[*pos] = (delta_nibble << 4) | len_nibble;
  *pos += 1;
  buf[*pos..*pos + delta_ext_len].copy_from_slice(&delta_ext[..delta_ext_len]);
  *pos += delta_ext_len;
  buf[*pos..*pos + len_ext_len].copy_from_slice(&len_ext[..len_ext_len]);
  *pos += len_ext_len;
  buf[*pos..*pos + value.len()].copy_from_slice(value);
  *pos += value.len();

  *last_optnum = optnum;
  Ok(())
}

fn shorten_u32(v: u32) -> ArrayVec<[u8; 4]> {
  let bytes = v.to_be_bytes();
  let mut out = ArrayVec::new();
  let mut started = false;
  for &b in &bytes {
    if b != 0 {
      started = true;
    }
    if started {
      out.push(b);
    }
  }
  out
}

/// Describes the options and payload a message should be finished with.
/// See [`finish_pdu`].
pub struct PacketOut<'a> {
  /// Whether the outgoing code class is `SUCCESS` (2.xx) — gates whether
  /// `observe` gets written, per RFC 7641 §3.
  pub is_success_response: bool,
  /// Whether the outgoing code class is a request — gates whether
  /// `uri_path`/`uri_query` get written.
  pub is_request: bool,
  /// `Observe` option value to write, if any.
  pub observe: Option<u32>,
  /// `Uri-Path`, written as one option per `/`-separated segment.
  pub uri_path: Option<&'a str>,
  /// `Content-Format` option to write, if any.
  pub content_format: Option<ContentFormat>,
  /// Accumulated `Uri-Query` bytes (see [`crate::engine::add_qstring`]).
  pub uri_query: Option<&'a [u8]>,
  /// Response/request payload.
  pub payload: &'a [u8],
}

/// Write `out`'s options (in RFC-mandated delta order: Observe, then
/// Uri-Path, then Content-Format, then Uri-Query) starting at
/// `header_len`, then the payload behind a `0xFF` marker if non-empty.
/// Returns the total on-wire length.
pub fn finish_pdu(buf: &mut [u8], header_len: usize, out: &PacketOut<'_>) -> Result<usize, CodecError> {
  let mut pos = header_len;
  let mut last_optnum = 0u16;

  if out.is_success_response {
    if let Some(v) = out.observe {
      let bytes = shorten_u32(v);
      put_option(buf, &mut pos, &mut last_optnum, OBSERVE, &bytes)?;
    }
  }

  if out.is_request {
    if let Some(path) = out.uri_path {
      if !path.starts_with('/') && !path.is_empty() {
        return Err(CodecError::Encode);
      }
      for seg in path.split('/').filter(|s| !s.is_empty()) {
        put_option(buf, &mut pos, &mut last_optnum, URI_PATH, seg.as_bytes())?;
      }
    }
  }

  if let Some(cf) = out.content_format {
    let v: u16 = cf.into();
    let bytes = if v == 0 { ArrayVec::<[u8; 2]>::new() } else { v.to_be_bytes().into_iter().skip_while(|&b| b == 0).collect() };
    put_option(buf, &mut pos, &mut last_optnum, CONTENT_FORMAT, &bytes)?;
  }

  if out.is_request {
    let q = out.uri_query.unwrap_or(&[]);
    if !q.is_empty() {
      put_option(buf, &mut pos, &mut last_optnum, URI_QUERY, q)?;
    }
  }

  if !out.payload.is_empty() {
    if buf.len() < pos + 1 + out.payload.len() {
      return Err(CodecError::Encode);
    }
    buf[pos] = PAYLOAD_MARKER;
    pos += 1;
    buf[pos..pos + out.payload.len()].copy_from_slice(out.payload);
    pos += out.payload.len();
  }

  Ok(pos)
}

/// Compare a resource's path against a request URL for the alphabetical
/// linear scan in [`crate::resource`]. Resources are expected sorted
/// ascending; scanning stops as soon as this returns `Greater`.
pub fn match_path(resource_path: &str, uri: &str) -> core::cmp::Ordering {
  resource_path.cmp(uri)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_then_parse_roundtrips_header_fields() {
    let mut buf = [0u8; 64];
    let token = [1, 2, 3, 4];
    let n = build_hdr(&mut buf, Type::Con, &token, code::GET, Id(0xBEEF)).unwrap();

    let pkt = parse(&buf[..n]).unwrap();
    assert_eq!(pkt.ty(), Type::Con);
    assert_eq!(pkt.code(), code::GET);
    assert_eq!(pkt.id(), Id(0xBEEF));
    assert_eq!(pkt.token().as_slice(), &token[..]);
  }

  #[test]
  fn finish_pdu_writes_uri_path_and_payload() {
    let mut buf = [0u8; 64];
    let n = build_hdr(&mut buf, Type::Non, &[], code::GET, Id(1)).unwrap();

    let out = PacketOut { is_success_response: false,
                          is_request: true,
                          observe: None,
                          uri_path: Some("/a/b"),
                          content_format: None,
                          uri_query: None,
                          payload: b"hi" };
    let total = finish_pdu(&mut buf, n, &out).unwrap();

    let pkt = parse(&buf[..total]).unwrap();
    assert_eq!(pkt.url(), "/a/b");
    assert_eq!(pkt.payload(), b"hi");
  }

  #[test]
  fn rejects_bad_version() {
    let mut buf = [0u8; 4];
    buf[0] = 0b1000_0000; // version 2, unsupported
    assert_eq!(parse(&buf), Err(CodecError::Malformed));
  }

  #[test]
  fn match_path_orders_ascending() {
    use core::cmp::Ordering;
    assert_eq!(match_path("/a", "/b"), Ordering::Less);
    assert_eq!(match_path("/b", "/b"), Ordering::Equal);
    assert_eq!(match_path("/c", "/b"), Ordering::Greater);
  }
}
