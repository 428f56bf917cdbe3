/*!
  The code area is the loader side of the machine. It owns code memory, a byte buffer of fixed
  capacity with a single insertion point, and the call table that maps every loaded predicate to
  its `CallPoint`. The insertion point only moves back when the newest region is released, which
  is how query code is reclaimed.

  Loading a predicate that is already loaded places the new code at the insertion point and
  replaces the call point; the old bytes stay where they are. Because `call` and `execute` name
  their callee by functor id and the machine looks the call point up every time, code that was
  loaded earlier keeps working. Only one loader may write at a time.
*/

use std::collections::{BTreeMap, HashMap};

use bimap::BiMap;
use tracing::debug;

use crate::bytecode::{decode_instruction, disassemble, encode_instruction, CodeAddress,
                      DisassembledInstruction, Instruction};
use crate::error::{CompileError, DecodeError, MachineError};
use crate::functor::FunctorId;
use crate::interner::InternerView;

/// The code region of one compiled predicate.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CallPoint {
  pub entry  : CodeAddress,
  pub length : u32,
  pub name   : FunctorId,
}

impl CallPoint {
  pub fn contains(&self, address: CodeAddress) -> bool {
    address >= self.entry && address - self.entry < self.length
  }
}

/// Read-only mapping from code addresses to the predicates they belong to, for debuggers and
/// disassembly.
pub trait CodeView {
  /// The predicate whose entry point is exactly `address`.
  fn label_at(&self, address: CodeAddress) -> Option<FunctorId>;
  /// The predicate whose code region contains `address`.
  fn predicate_at(&self, address: CodeAddress) -> Option<FunctorId>;
}

#[derive(Debug)]
pub struct CodeArea {
  code       : Vec<u8>,
  capacity   : usize,
  call_table : HashMap<FunctorId, CallPoint>,
  /// Entry addresses of the current call points.
  labels     : BiMap<CodeAddress, FunctorId>,
  /// Every region ever loaded, including superseded ones, by entry address.
  regions    : BTreeMap<CodeAddress, CallPoint>,
}

impl CodeArea {

  pub fn new(capacity: usize) -> CodeArea {
    CodeArea{
      code       : Vec::new(),
      capacity,
      call_table : HashMap::new(),
      labels     : BiMap::new(),
      regions    : BTreeMap::new(),
    }
  }

  pub fn insertion_point(&self) -> CodeAddress {
    self.code.len() as CodeAddress
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Reserves `n` zeroed bytes at the insertion point and returns their address.
  pub fn advance(&mut self, n: usize) -> Result<CodeAddress, CompileError> {
    let available = self.capacity - self.code.len();
    if n > available {
      return Err(CompileError::CodeAreaFull{ requested: n, available });
    }
    let start = self.insertion_point();
    self.code.resize(self.code.len() + n, 0);
    Ok(start)
  }

  /**
    Encodes `instructions` at the insertion point and makes them the code of predicate `name`.
    Code addresses in `instructions` are relative to the first instruction and are relocated to
    the load address.
  */
  pub fn load(&mut self, name: FunctorId, instructions: Vec<Instruction>) -> Result<CallPoint, CompileError> {
    let base = self.insertion_point();
    let mut bytes = Vec::new();
    for mut instruction in instructions {
      instruction.map_code_addresses(|address| address + base);
      encode_instruction(&instruction, &mut bytes);
    }

    let start = self.advance(bytes.len())?;
    self.code[start as usize..].copy_from_slice(&bytes);

    let call_point = CallPoint{ entry: start, length: bytes.len() as u32, name };
    self.install(call_point);
    debug!(predicate = %name, entry = start, length = bytes.len(), "loaded call point");
    Ok(call_point)
  }

  fn install(&mut self, call_point: CallPoint) {
    self.labels.remove_by_right(&call_point.name);
    self.labels.insert(call_point.entry, call_point.name);
    self.regions.insert(call_point.entry, call_point);
    self.call_table.insert(call_point.name, call_point);
  }

  pub fn call_point(&self, name: FunctorId) -> Option<&CallPoint> {
    self.call_table.get(&name)
  }

  pub fn is_defined(&self, name: FunctorId) -> bool {
    self.call_table.contains_key(&name)
  }

  /// The current call points in address order.
  pub fn call_points(&self) -> Vec<CallPoint> {
    let mut call_points: Vec<CallPoint> = self.call_table.values().copied().collect();
    call_points.sort_by_key(|call_point| call_point.entry);
    call_points
  }

  /// The bytes of one call point's code region.
  pub fn code_buffer(&self, call_point: &CallPoint) -> &[u8] {
    let start = call_point.entry as usize;
    let end = (start + call_point.length as usize).min(self.code.len());
    &self.code[start.min(end)..end]
  }

  /// All of code memory up to the insertion point.
  pub fn memory(&self) -> &[u8] {
    &self.code
  }

  /// Decodes the instruction at `address`.
  pub fn fetch(&self, address: CodeAddress) -> Result<(Instruction, usize), MachineError> {
    let start = address as usize;
    if start >= self.code.len() {
      return Err(MachineError::CodeAddressOutOfRange(address));
    }
    Ok(decode_instruction(&self.code[start..], address)?)
  }

  /// Disassembles every current call point in address order.
  pub fn disassemble(&self, interner: Option<&dyn InternerView>) -> Result<Vec<DisassembledInstruction>, DecodeError> {
    let mut listing = Vec::new();
    for call_point in self.call_points() {
      listing.extend(
        disassemble(&self.code, call_point.entry, call_point.length as usize, interner, Some(self))?
      );
    }
    Ok(listing)
  }

  /**
    Takes back the code of `call_point` and forgets the call point, provided nothing was loaded
    after it. Returns whether the bytes were reclaimed.
  */
  pub fn release(&mut self, call_point: &CallPoint) -> bool {
    let end = call_point.entry as usize + call_point.length as usize;
    if end != self.code.len() {
      return false;
    }
    self.code.truncate(call_point.entry as usize);
    if self.call_table.get(&call_point.name) == Some(call_point) {
      self.call_table.remove(&call_point.name);
    }
    self.labels.remove_by_left(&call_point.entry);
    self.regions.remove(&call_point.entry);
    true
  }

  /// Discards all code and call points.
  pub fn reset(&mut self) {
    self.code.clear();
    self.call_table.clear();
    self.labels.clear();
    self.regions.clear();
  }
}

impl CodeView for CodeArea {
  fn label_at(&self, address: CodeAddress) -> Option<FunctorId> {
    self.labels.get_by_left(&address).copied()
  }

  fn predicate_at(&self, address: CodeAddress) -> Option<FunctorId> {
    self.regions
        .range(..=address)
        .next_back()
        .filter(|(_, call_point)| call_point.contains(address))
        .map(|(_, call_point)| call_point.name)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loading_relocates_and_registers_call_points() {
    let mut area = CodeArea::new(1024);
    let p = FunctorId(5);
    let q = FunctorId(6);

    let first = area.load(p, vec![Instruction::Proceed]).unwrap();
    assert_eq!(first, CallPoint{ entry: 0, length: 1, name: p });

    let second = area.load(q, vec![Instruction::TryMeElse(5), Instruction::Proceed, Instruction::TrustMe]).unwrap();
    assert_eq!(second.entry, 1);
    assert_eq!(area.insertion_point(), 8);
    assert_eq!(area.fetch(1).unwrap(), (Instruction::TryMeElse(6), 5));

    assert_eq!(area.label_at(1), Some(q));
    assert_eq!(area.predicate_at(7), Some(q));
    assert_eq!(area.predicate_at(0), Some(p));
    assert_eq!(area.code_buffer(&second).len(), 7);
  }

  #[test]
  fn reloading_replaces_the_call_point_but_keeps_old_code() {
    let mut area = CodeArea::new(64);
    let p = FunctorId(5);
    area.load(p, vec![Instruction::Fail]).unwrap();
    area.load(p, vec![Instruction::Proceed]).unwrap();
    assert_eq!(area.call_point(p).map(|cp| cp.entry), Some(1));
    assert_eq!(area.label_at(0), None);
    assert_eq!(area.predicate_at(0), Some(p));
    assert_eq!(area.fetch(0).unwrap().0, Instruction::Fail);
    assert_eq!(area.call_points().len(), 1);
  }

  #[test]
  fn capacity_is_enforced_and_reset_empties() {
    let mut area = CodeArea::new(4);
    assert!(area.load(FunctorId(2), vec![Instruction::Call(FunctorId(3))]).is_err());
    assert_eq!(area.insertion_point(), 0);
    area.advance(4).unwrap();
    assert_eq!(area.advance(1), Err(CompileError::CodeAreaFull{ requested: 1, available: 0 }));
    area.reset();
    assert_eq!(area.insertion_point(), 0);
    assert!(matches!(area.fetch(0), Err(MachineError::CodeAddressOutOfRange(0))));
  }

  #[test]
  fn releasing_the_newest_code_reclaims_it() {
    let mut area = CodeArea::new(64);
    let p = FunctorId(5);
    let q = FunctorId(6);
    area.load(p, vec![Instruction::Proceed]).unwrap();
    let query = area.load(q, vec![Instruction::Call(p), Instruction::Halt]).unwrap();
    assert!(area.release(&query));
    assert_eq!(area.insertion_point(), 1);
    assert!(!area.is_defined(q));
    assert_eq!(area.label_at(1), None);
    assert_eq!(area.predicate_at(1), None);

    let query = area.load(q, vec![Instruction::Halt]).unwrap();
    area.load(FunctorId(7), vec![Instruction::Proceed]).unwrap();
    assert!(!area.release(&query));
    assert!(area.is_defined(q));
  }
}
