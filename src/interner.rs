/*!
  A bidirectional mapping between textual names and dense integer ids. Functors (name and arity)
  and variable names are interned separately. Every other component refers to symbols by id, so
  comparisons in the compiler and the machine never touch strings.

  An `Interner` is an ordinary value owned by whoever needs it, usually a `ResolutionEngine`.
  Collaborators that only need to display ids (e.g. a debugger or a disassembly view) receive the
  read-only `InternerView` trait object instead.
*/

use bimap::BiMap;
use string_cache::DefaultAtom;

use crate::functor::{ArityType, Functor, FunctorId, WELL_KNOWN};
use crate::term::VarId;

/// Read-only lookup from ids to names.
pub trait InternerView {
  fn functor(&self, id: FunctorId) -> Option<&Functor>;
  fn variable_name(&self, id: VarId) -> Option<&DefaultAtom>;

  fn functor_name(&self, id: FunctorId) -> Option<&DefaultAtom> {
    self.functor(id).map(|functor| &functor.name)
  }
}

#[derive(Debug, Clone)]
pub struct Interner {
  functors  : BiMap<Functor, FunctorId>,
  variables : BiMap<DefaultAtom, VarId>,
}

impl Interner {

  pub fn new() -> Interner {
    let mut interner = Interner{
      functors  : BiMap::new(),
      variables : BiMap::new(),
    };
    for (name, arity) in WELL_KNOWN.iter() {
      interner.intern_functor(name, *arity);
    }
    interner
  }

  pub fn intern_functor(&mut self, name: &str, arity: ArityType) -> FunctorId {
    let functor = Functor::new(name, arity);
    if let Some(id) = self.functors.get_by_left(&functor) {
      return *id;
    }
    let id = FunctorId(self.functors.len() as u32);
    self.functors.insert(functor, id);
    id
  }

  pub fn intern_atom(&mut self, name: &str) -> FunctorId {
    self.intern_functor(name, 0)
  }

  pub fn intern_variable(&mut self, name: &str) -> VarId {
    let atom = DefaultAtom::from(name);
    if let Some(id) = self.variables.get_by_left(&atom) {
      return *id;
    }
    let id = VarId(self.variables.len() as u32);
    self.variables.insert(atom, id);
    id
  }

  /// Looks up a functor without interning it.
  pub fn lookup_functor(&self, name: &str, arity: ArityType) -> Option<FunctorId> {
    self.functors.get_by_left(&Functor::new(name, arity)).copied()
  }

  pub fn arity(&self, id: FunctorId) -> Option<ArityType> {
    self.functors.get_by_right(&id).map(|functor| functor.arity)
  }
}

impl Default for Interner {
  fn default() -> Self {
    Interner::new()
  }
}

impl InternerView for Interner {
  fn functor(&self, id: FunctorId) -> Option<&Functor> {
    self.functors.get_by_right(&id)
  }

  fn variable_name(&self, id: VarId) -> Option<&DefaultAtom> {
    self.variables.get_by_right(&id)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::functor::{CONS, NIL};

  #[test]
  fn well_known_functors_have_reserved_ids() {
    let interner = Interner::new();
    assert_eq!(interner.lookup_functor("[]", 0), Some(NIL));
    assert_eq!(interner.lookup_functor(".", 2), Some(CONS));
  }

  #[test]
  fn interning_is_idempotent_and_arity_sensitive() {
    let mut interner = Interner::new();
    let f2 = interner.intern_functor("f", 2);
    let f3 = interner.intern_functor("f", 3);
    assert_ne!(f2, f3);
    assert_eq!(interner.intern_functor("f", 2), f2);
    assert_eq!(interner.arity(f3), Some(3));
    assert_eq!(interner.functor(f2).unwrap().to_string(), "f/2");
  }

  #[test]
  fn variables_round_trip() {
    let mut interner = Interner::new();
    let x = interner.intern_variable("X");
    let y = interner.intern_variable("Y");
    assert_ne!(x, y);
    assert_eq!(interner.intern_variable("X"), x);
    assert_eq!(&**interner.variable_name(y).unwrap(), "Y");
  }
}
