//! RFC 7252 §5.8/§5.9 method and response codes, encoded as `c.dd`.

/// A CoAP code: 3-bit class, 5-bit detail, printed `class.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
  class: u8,
  detail: u8,
}

impl Code {
  /// Build a code from its class and detail digits, e.g. `Code::new(2, 5)` is `2.05`.
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// The class digit (`c` in `c.dd`).
  pub fn class(&self) -> u8 {
    self.class
  }

  /// The detail digits (`dd` in `c.dd`).
  pub fn detail(&self) -> u8 {
    self.detail
  }

  /// What kind of code this is: empty, request, or response.
  pub fn kind(&self) -> CodeKind {
    match self.class {
      | 0 if self.detail == 0 => CodeKind::Empty,
      | 0 => CodeKind::Request,
      | 2 | 4 | 5 => CodeKind::Response,
      | _ => CodeKind::Response,
    }
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    Code::new(b >> 5, b & 0b0001_1111)
  }
}

impl From<Code> for u8 {
  fn from(c: Code) -> Self {
    (c.class << 5) | (c.detail & 0b0001_1111)
  }
}

/// What a [`Code`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
  /// `0.00`, used only for ACK/RST.
  Empty,
  /// `0.01`-`0.31`, a request method.
  Request,
  /// `2.xx`-`5.xx`, a response.
  Response,
}

macro_rules! code {
  ($(#[$m:meta])* $name:ident => $class:literal, $detail:literal) => {
    $(#[$m])*
    pub const $name: Code = Code::new($class, $detail);
  };
}

code!(
  /// `0.00` Empty (ACK/RST).
  EMPTY => 0, 00
);
code!(
  /// `0.01` GET.
  GET => 0, 01
);
code!(
  /// `0.02` POST.
  POST => 0, 02
);
code!(
  /// `0.03` PUT.
  PUT => 0, 03
);
code!(
  /// `0.04` DELETE.
  DELETE => 0, 04
);

code!(
  /// `2.01` Created.
  CREATED => 2, 01
);
code!(
  /// `2.02` Deleted.
  DELETED => 2, 02
);
code!(
  /// `2.03` Valid.
  VALID => 2, 03
);
code!(
  /// `2.04` Changed.
  CHANGED => 2, 04
);
code!(
  /// `2.05` Content.
  CONTENT => 2, 05
);

code!(
  /// `4.00` Bad Request.
  BAD_REQUEST => 4, 00
);
code!(
  /// `4.01` Unauthorized.
  UNAUTHORIZED => 4, 01
);
code!(
  /// `4.04` Not Found.
  NOT_FOUND => 4, 04
);
code!(
  /// `4.05` Method Not Allowed.
  METHOD_NOT_ALLOWED => 4, 05
);
code!(
  /// `4.06` Not Acceptable.
  NOT_ACCEPTABLE => 4, 06
);

code!(
  /// `5.00` Internal Server Error.
  INTERNAL_SERVER_ERROR => 5, 00
);
code!(
  /// `5.01` Not Implemented.
  NOT_IMPLEMENTED => 5, 01
);

/// Bitmask over the four methods this engine dispatches, used by
/// [`crate::resource::Resource::methods`].
pub mod method_flag {
  /// GET
  pub const GET: u8 = 1 << 0;
  /// POST
  pub const POST: u8 = 1 << 1;
  /// PUT
  pub const PUT: u8 = 1 << 2;
  /// DELETE
  pub const DELETE: u8 = 1 << 3;
}

/// Map a request [`Code`] to its [`method_flag`] bit. Returns `0` for
/// anything that isn't GET/POST/PUT/DELETE.
pub fn method_to_flag(code: Code) -> u8 {
  match (code.class(), code.detail()) {
    | (0, 1) => method_flag::GET,
    | (0, 2) => method_flag::POST,
    | (0, 3) => method_flag::PUT,
    | (0, 4) => method_flag::DELETE,
    | _ => 0,
  }
}
