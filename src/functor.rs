//! A special functor struct is necessary, because we need to know the arity of the functor after
//! we no longer have access to its vector of arguments. Thus, a `Functor` is a name and an arity.
//! Functors are interned to a dense `FunctorId`, which is what terms, cells, and bytecode carry.

use std::fmt::{Formatter, Display};

use string_cache::DefaultAtom;

pub type ArityType = u32;

/**
  The `Functor` struct represents a symbol f/n. Clones are cheap. As with all strings in this
  codebase, `Functor::name` is interned. Note that f/2 != f/3, i.e. functors are the same if and
  only if both their name and their arity are the same. Atoms are functors of arity 0.
*/
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Functor {
  pub name  : DefaultAtom,
  pub arity : ArityType,
}

impl Functor {
  pub fn new(name: &str, arity: ArityType) -> Functor {
    Functor{ name: DefaultAtom::from(name), arity }
  }
}

impl Display for Functor{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.name, self.arity)
  }
}

/// The interned id of a `Functor`. Ids are dense and start at zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FunctorId(pub u32);

impl Display for FunctorId{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// `[]/0`, the empty list. Every `Interner` reserves this id.
pub const NIL: FunctorId = FunctorId(0);
/// `'.'/2`, the list constructor. Every `Interner` reserves this id.
pub const CONS: FunctorId = FunctorId(1);

/// The functors every interner is seeded with, in id order.
pub const WELL_KNOWN: [(&str, ArityType); 2] = [("[]", 0), (".", 2)];
