//! String interning.
//!
//! Every identifier, namespace component, and canonical type name that
//! flows through the compiler is interned once into a `Symbol`, a small
//! `Copy` handle into a shared table. This avoids repeated `String`
//! allocation and lets comparisons (`==` on namespace children, type-table
//! keys) be a single integer compare instead of a byte-by-byte one.

use std::cell::RefCell;
use hashbrown::HashMap;

/// A handle to an interned string. Cheap to copy, compare, and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
  strings: Vec<Box<str>>,
  map: HashMap<Box<str>, Symbol>,
}

impl Interner {
  fn new() -> Self { Self { strings: Vec::new(), map: HashMap::new() } }

  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(self.strings.len().try_into().expect("too many interned symbols"));
    let boxed: Box<str> = s.into();
    self.strings.push(boxed.clone());
    self.map.insert(boxed, sym);
    sym
  }

  fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.0 as usize] }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

/// Intern a string, returning a stable handle.
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

impl Symbol {
  /// Look up the original string for this symbol.
  ///
  /// The closure form avoids tying the result's lifetime to the
  /// thread-local interner.
  pub fn with_str<R>(self, f: impl FnOnce(&str) -> R) -> R {
    INTERNER.with(|i| f(i.borrow().resolve(self)))
  }

  /// Copy out the interned string. Prefer [`Symbol::with_str`] on hot paths.
  #[must_use] pub fn as_string(self) -> String {
    self.with_str(str::to_owned)
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.with_str(|s| f.write_str(s))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn interning_dedups() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    let c = intern("bar");
    assert_ne!(a, c);
  }

  #[test]
  fn round_trips_string() {
    let s = intern("Namespace::Child");
    assert_eq!(s.as_string(), "Namespace::Child");
  }
}
