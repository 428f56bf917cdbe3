use std::fmt::{Display, Formatter};

use crate::bytecode::Constant;
use crate::functor::FunctorId;

/// An index into the heap.
pub type HeapAddress = usize;

/// Concrete in-memory representation of terms in the heap, the registers, and environment slots.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Cell {
  /// `<STR, k>` where `k` is the heap address of a functor `f/n`; a pointer to a structure.
  STR(HeapAddress),
  /// `<REF, k>`, a pointer to a heap cell. An unbound variable is a `REF` to its own address.
  REF(HeapAddress),
  /// A functor, the header of a structure; the `n` argument cells follow it on the heap.
  Functor(FunctorId),
  /// An atom or a number.
  Constant(Constant),
  /// A saved choice point level, the target of a cut. Only ever held in an environment slot.
  Level(usize),
  /// Unfilled cell.
  Empty
}

impl Cell {
  pub fn is_empty(&self) -> bool {
    matches!(self, Cell::Empty)
  }
}

impl Display for Cell{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self{
      Cell::REF(a)            => write!(f, "<REF, {}>", a),
      Cell::STR(a)            => write!(f, "<STR, {}>", a),
      Cell::Functor(functor)  => write!(f, "{}", functor),
      Cell::Constant(c)       => write!(f, "<CON, {}>", c),
      Cell::Level(b)          => write!(f, "<LVL, {}>", b),
      Cell::Empty             => write!(f, "`"),
    }
  }
}
