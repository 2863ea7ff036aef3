//! The resource registry: an alphabetically-ordered list of `(path,
//! methods, handler)` tuples, grouped into listeners and chained in a
//! fixed-capacity array. Grounded directly in gcoap's `_find_resource`:
//! resources within a listener are expected sorted ascending by path so
//! the matching scan can stop the instant it passes where the request
//! path would sort.

use core::cmp::Ordering;

use crate::pdu::{code::method_flag, method_to_flag, Code, Packet};

/// Result of [`Listener::find`] / the chained registry scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Found<'r> {
  /// A resource matched both path and method.
  Resource(&'r Resource),
  /// A resource matched the path, but not the method.
  WrongMethod,
  /// No resource matched the path.
  NotFound,
}

/// An immutable, statically registered resource.
#[derive(Debug, PartialEq, Eq)]
pub struct Resource {
  path: &'static str,
  methods: u8,
  handler: fn(&Packet<'_>, &mut [u8]) -> isize,
}

impl Resource {
  /// Declare a resource. `methods` is a bitmask built from
  /// [`crate::pdu::code::method_flag`]. `handler` writes its response
  /// into `buf` (by way of [`crate::pdu::finish_pdu`]) and returns the
  /// number of bytes written, or a negative value to signal failure
  /// (synthesized by the engine as `5.00`).
  pub const fn new(path: &'static str, methods: u8, handler: fn(&Packet<'_>, &mut [u8]) -> isize) -> Self {
    Self { path, methods, handler }
  }

  /// The resource's registered path, e.g. `/sensors/temp`.
  pub fn path(&self) -> &'static str {
    self.path
  }

  /// The method bitmask this resource accepts.
  pub fn methods(&self) -> u8 {
    self.methods
  }

  /// Invoke the resource's handler.
  pub fn handle(&self, req: &Packet<'_>, buf: &mut [u8]) -> isize {
    (self.handler)(req, buf)
  }

  fn accepts(&self, code: Code) -> bool {
    self.methods & method_to_flag(code) != 0
  }
}

/// One application's contiguous, `path`-ascending array of resources.
/// Registries hold several of these; there is no deregistration.
pub struct Listener {
  resources: &'static [Resource],
}

impl Listener {
  /// Register a new listener's resources. `resources` must be sorted by
  /// `path` ascending — the matching scan's early exit depends on it.
  pub const fn new(resources: &'static [Resource]) -> Self {
    Self { resources }
  }

  /// Scan this listener's resources for `uri`, stopping as soon as a
  /// later path would sort after it (alphabetical early exit).
  fn find(&self, uri: &str, code: Code) -> Found<'static> {
    let mut method_mismatch = false;
    for resource in self.resources {
      match crate::pdu::match_path(resource.path(), uri) {
        | Ordering::Less => continue,
        | Ordering::Greater => break,
        | Ordering::Equal => {
          if resource.accepts(code) {
            return Found::Resource(resource);
          }
          method_mismatch = true;
        },
      }
    }
    if method_mismatch {
      Found::WrongMethod
    } else {
      Found::NotFound
    }
  }
}

/// Returned by [`Registry::register`] when every listener slot is
/// already in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

/// The registry: every application-registered listener, consulted in
/// registration order. `/.well-known/core` is handled directly by the
/// engine rather than through a registered resource — gcoap special-
/// cases it the same way, ahead of `_find_resource`'s listener scan,
/// since its body depends on the registry itself and a `fn`-pointer
/// handler has no way to capture it.
pub struct Registry {
  listeners: tinyvec::ArrayVec<[Option<&'static Listener>; 8]>,
}

impl Registry {
  /// An empty registry. Application listeners are added with
  /// [`Registry::register`].
  pub fn new() -> Self {
    Self { listeners: tinyvec::ArrayVec::new() }
  }

  /// Append a listener. Fails if the registry already holds its
  /// maximum number of listeners.
  pub fn register(&mut self, listener: &'static Listener) -> Result<(), RegistryFull> {
    if self.listeners.try_push(Some(listener)).is_some() {
      Err(RegistryFull)
    } else {
      Ok(())
    }
  }

  /// Find a resource for `uri`/`code` across every registered listener,
  /// in registration order.
  pub fn find(&self, uri: &str, code: Code) -> Found<'static> {
    let mut saw_wrong_method = false;
    for listener in self.listeners.iter().copied().flatten() {
      match listener.find(uri, code) {
        | Found::Resource(r) => return Found::Resource(r),
        | Found::WrongMethod => saw_wrong_method = true,
        | Found::NotFound => {},
      }
    }
    if saw_wrong_method {
      Found::WrongMethod
    } else {
      Found::NotFound
    }
  }

  /// Iterate every registered resource's path, for the
  /// `/.well-known/core` link-format listing.
  pub fn paths(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.listeners.iter().flatten().flat_map(|l| l.resources.iter().map(|r| r.path()))
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use core::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

  use super::*;

  static C_HANDLER_CALLS: AtomicUsize = AtomicUsize::new(0);

  fn handler_a(_req: &Packet<'_>, _buf: &mut [u8]) -> isize {
    0
  }
  fn handler_c(_req: &Packet<'_>, _buf: &mut [u8]) -> isize {
    C_HANDLER_CALLS.fetch_add(1, AtomicOrdering::SeqCst);
    0
  }

  static RESOURCES: [Resource; 2] = [Resource::new("/a", method_flag::GET, handler_a), Resource::new("/c", method_flag::GET, handler_c)];
  static LISTENER: Listener = Listener::new(&RESOURCES);

  #[test]
  fn alphabetical_scan_stops_before_examining_later_entries() {
    let found = LISTENER.find("/b", Code::new(0, 1));
    assert!(matches!(found, Found::NotFound));
    assert_eq!(C_HANDLER_CALLS.load(AtomicOrdering::SeqCst), 0);
  }
}
