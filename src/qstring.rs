//! Accumulating a request's `Uri-Query` bytes ahead of submission.
//!
//! CoAP has no single "query string" option — each `key=value` pair is
//! its own `Uri-Query` option — but the wire codec in [`crate::pdu`]
//! takes a single pre-joined `&`-separated buffer (mirroring how the
//! original's `gcoap_add_qstring` builds up one buffer the caller later
//! hands to `gcoap_req_init`) and splits it back into options itself.
//! [`add_qstring`] is the inverse half: appending one `key`/`value` pair
//! per call, `&`-separating as it goes.

/// Append `key` (and, if given, `=value`) to `buf`, `&`-separating from
/// whatever's already there. Returns the new length of the used prefix
/// of `buf`, or `None` if it wouldn't fit — `buf` is left unmodified in
/// that case.
pub fn add_qstring(buf: &mut [u8], used: usize, key: &str, value: Option<&str>) -> Option<usize> {
  let sep = if used > 0 { 1 } else { 0 };
  let value_len = value.map(|v| 1 + v.len()).unwrap_or(0);
  let needed = sep + key.len() + value_len;
  if used + needed > buf.len() {
    return None;
  }

  let mut pos = used;
  if sep == 1 {
    buf[pos] = b'&';
    pos += 1;
  }
  buf[pos..pos + key.len()].copy_from_slice(key.as_bytes());
  pos += key.len();
  if let Some(v) = value {
    buf[pos] = b'=';
    pos += 1;
    buf[pos..pos + v.len()].copy_from_slice(v.as_bytes());
    pos += v.len();
  }
  Some(pos)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accumulates_key_value_pairs_with_ampersand_separator() {
    let mut buf = [0u8; 32];
    let used = add_qstring(&mut buf, 0, "a", Some("1")).unwrap();
    let used = add_qstring(&mut buf, used, "b", None).unwrap();
    assert_eq!(&buf[..used], b"a=1&b");
  }

  #[test]
  fn refuses_to_overflow_the_buffer() {
    let mut buf = [0u8; 4];
    assert_eq!(add_qstring(&mut buf, 0, "toolong", None), None);
  }
}
