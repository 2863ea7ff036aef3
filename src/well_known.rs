//! The built-in `/.well-known/core` resource (RFC 6690 CoRE Link
//! Format, content-format 40).
//!
//! Unlike every other resource, this one is served directly by
//! [`crate::engine::Engine::handle_req`] rather than through a
//! registered [`crate::resource::Resource`] — its body is the
//! registry's own path list, and a [`crate::resource::Resource`]
//! handler is a bare `fn` pointer with no way to capture it. gcoap
//! special-cases this path the same way, ahead of its listener scan.

use crate::engine::PDU_BUF_SIZE;
use crate::pdu::{self, code, ContentFormat, Packet, PacketOut, Type};

/// The well-known path every CoAP server answers link-format discovery
/// requests on.
pub const PATH: &str = "/.well-known/core";

/// Write the comma-separated listing of `paths`, each wrapped in
/// `<...>`, into `buf`. With `buf: None`, returns the byte count that
/// would be written without writing anything — callers use this to
/// size their buffer before the real pass.
pub fn resource_list(paths: impl Iterator<Item = &'static str>, buf: Option<&mut [u8]>) -> Result<usize, ()> {
  match buf {
    | None => {
      let mut n = 0;
      for (i, path) in paths.enumerate() {
        if i > 0 {
          n += 1; // ","
        }
        n += 2 + path.len(); // "<" + path + ">"
      }
      Ok(n)
    },
    | Some(buf) => {
      let mut pos = 0;
      for (i, path) in paths.enumerate() {
        if i > 0 {
          *buf.get_mut(pos).ok_or(())? = b',';
          pos += 1;
        }
        *buf.get_mut(pos).ok_or(())? = b'<';
        pos += 1;
        let bytes = path.as_bytes();
        buf.get_mut(pos..pos + bytes.len()).ok_or(())?.copy_from_slice(bytes);
        pos += bytes.len();
        *buf.get_mut(pos).ok_or(())? = b'>';
        pos += 1;
      }
      Ok(pos)
    },
  }
}

/// Build the `2.05 Content` link-format response to a GET on
/// [`PATH`], writing it into `buf`. Returns the number of bytes
/// written, or a negative value on failure (the engine turns that into
/// a synthesized `5.00`).
pub fn respond(req: &Packet<'_>, paths: impl Iterator<Item = &'static str>, buf: &mut [u8]) -> isize {
  let mut body = [0u8; PDU_BUF_SIZE];
  let len = match resource_list(paths, Some(&mut body)) {
    | Ok(n) => n,
    | Err(()) => return -1,
  };

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
                        observe: None,
                        uri_path: None,
                        content_format: Some(ContentFormat::LinkFormat),
                        uri_query: None,
                        payload: &body[..len] };
  pdu::finish_pdu(buf, hdr_len, &out).map(|n| n as isize).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn two_pass_sizing_agrees() {
    let paths = ["/a", "/b/c"];
    let sized = resource_list(paths.iter().copied(), None).unwrap();

    let mut buf = [0u8; 64];
    let written = resource_list(paths.iter().copied(), Some(&mut buf)).unwrap();

    assert_eq!(sized, written);
    assert_eq!(&buf[..written], b"</a>,</b/c>");
  }
}
