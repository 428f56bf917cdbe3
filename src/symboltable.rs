/*!
  A scoped symbol table that carries compile-time facts between compiler passes. Entries are keyed
  by an interned id together with the scope that was current when the entry was made. The root
  scope holds one entry per compiled predicate with its call point; each clause being compiled
  opens a nested scope holding the register allocation of every one of its variables.

  A symbol table is really just a convenience wrapper around a map.
*/

use std::collections::HashMap;

use string_cache::DefaultAtom;

use crate::address::Address;
use crate::codearea::CallPoint;
use crate::functor::FunctorId;
use crate::term::VarId;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SymbolKey {
  Functor(FunctorId),
  Variable(VarId),
}

/// The path from the root scope to a nested scope.
pub type ScopePath = Vec<DefaultAtom>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SymbolEntry {
  /// The register or environment slot assigned to a variable.
  pub allocation : Option<Address>,
  /// The code region of a compiled predicate.
  pub call_point : Option<CallPoint>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
  scope   : ScopePath,
  entries : HashMap<(ScopePath, SymbolKey), SymbolEntry>,
}

impl SymbolTable {

  pub fn new() -> SymbolTable {
    SymbolTable::default()
  }

  pub fn current_scope(&self) -> &ScopePath {
    &self.scope
  }

  pub fn enter_scope(&mut self, name: &str) {
    self.scope.push(DefaultAtom::from(name));
  }

  /// Leaves the current scope, dropping every entry made in it or in scopes nested inside it.
  /// Leaving the root scope does nothing.
  pub fn leave_scope(&mut self) {
    if self.scope.is_empty() {
      return;
    }
    let scope = self.scope.clone();
    self.entries.retain(|(path, _), _| !path.starts_with(&scope));
    self.scope.pop();
  }

  /// Looks `key` up in the current scope, then in each enclosing scope out to the root.
  pub fn get(&self, key: &SymbolKey) -> Option<&SymbolEntry> {
    let mut path = self.scope.clone();
    loop {
      if let Some(entry) = self.entries.get(&(path.clone(), *key)) {
        return Some(entry);
      }
      if path.pop().is_none() {
        return None;
      }
    }
  }

  /// Inserts or replaces the entry for `key` in the current scope.
  pub fn insert(&mut self, key: SymbolKey, entry: SymbolEntry) -> Option<SymbolEntry> {
    self.entries.insert((self.scope.clone(), key), entry)
  }

  // region Convenience accessors

  pub fn set_allocation(&mut self, variable: VarId, address: Address) {
    self.entries
        .entry((self.scope.clone(), SymbolKey::Variable(variable)))
        .or_default()
        .allocation = Some(address);
  }

  pub fn allocation(&self, variable: VarId) -> Option<Address> {
    self.get(&SymbolKey::Variable(variable)).and_then(|entry| entry.allocation)
  }

  /// Records a call point in the root scope regardless of the current scope.
  pub fn set_call_point(&mut self, call_point: CallPoint) {
    self.entries
        .entry((ScopePath::new(), SymbolKey::Functor(call_point.name)))
        .or_default()
        .call_point = Some(call_point);
  }

  pub fn call_point(&self, functor: FunctorId) -> Option<&CallPoint> {
    self.entries
        .get(&(ScopePath::new(), SymbolKey::Functor(functor)))
        .and_then(|entry| entry.call_point.as_ref())
  }

  pub fn remove_call_point(&mut self, functor: FunctorId) {
    self.entries.remove(&(ScopePath::new(), SymbolKey::Functor(functor)));
  }

  // endregion
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_scopes_shadow_and_drop() {
    let mut table = SymbolTable::new();
    let x = VarId(0);
    table.set_allocation(x, Address::Register(1));

    table.enter_scope("p/1");
    assert_eq!(table.allocation(x), Some(Address::Register(1)));
    table.set_allocation(x, Address::Stack(2));
    assert_eq!(table.allocation(x), Some(Address::Stack(2)));

    table.enter_scope("clause 1");
    assert_eq!(table.allocation(x), Some(Address::Stack(2)));
    table.leave_scope();
    table.leave_scope();

    assert_eq!(table.allocation(x), Some(Address::Register(1)));
    assert!(table.current_scope().is_empty());
  }

  #[test]
  fn call_points_live_in_the_root_scope() {
    let mut table = SymbolTable::new();
    let p = FunctorId(7);
    table.enter_scope("clause");
    table.set_call_point(CallPoint{ entry: 16, length: 8, name: p });
    table.leave_scope();
    assert_eq!(table.call_point(p).map(|cp| cp.entry), Some(16));
    table.remove_call_point(p);
    assert!(table.call_point(p).is_none());
  }
}
