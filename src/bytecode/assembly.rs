/*!
  Assembles a sequence of instructions with symbolic labels into code whose addresses are byte
  offsets from the first instruction.

  While code is being emitted, a label is just a small integer handed out by `new_label` and
  written into the code address fields of instructions. `finish` measures the encoded size of
  every instruction, works out the offset each label is bound to, and rewrites the label ids into
  offsets. A label that was never bound becomes `FAIL_ADDRESS`, so jumping to it fails.

  The result is relative to offset 0; `CodeArea::load` relocates it to its load address.
*/

use super::{CodeAddress, Instruction, FAIL_ADDRESS};

#[derive(Debug, Default)]
pub struct Assembler {
  instructions : Vec<Instruction>,
  /// The instruction index each label is bound to.
  labels       : Vec<Option<usize>>,
}

impl Assembler {

  pub fn new() -> Assembler {
    Assembler::default()
  }

  pub fn new_label(&mut self) -> CodeAddress {
    self.labels.push(None);
    (self.labels.len() - 1) as CodeAddress
  }

  /// Binds `label` to the next instruction to be emitted.
  pub fn bind(&mut self, label: CodeAddress) {
    if let Some(slot) = self.labels.get_mut(label as usize) {
      *slot = Some(self.instructions.len());
    }
  }

  /// Appends an instruction and returns its index, which `patch` accepts.
  pub fn emit(&mut self, instruction: Instruction) -> usize {
    self.instructions.push(instruction);
    self.instructions.len() - 1
  }

  /// Replaces the instruction at `index`, e.g. an `allocate` whose size is only known at the end.
  pub fn patch(&mut self, index: usize, instruction: Instruction) {
    if let Some(slot) = self.instructions.get_mut(index) {
      *slot = instruction;
    }
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  /// Resolves labels to byte offsets and returns the instructions.
  pub fn finish(self) -> Vec<Instruction> {
    let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
    let mut offset: CodeAddress = 0;
    for instruction in self.instructions.iter() {
      offsets.push(offset);
      offset += instruction.size() as CodeAddress;
    }
    offsets.push(offset);

    let resolved: Vec<CodeAddress> =
      self.labels
          .iter()
          .map(|bound| bound.map_or(FAIL_ADDRESS, |index| offsets[index]))
          .collect();

    let mut instructions = self.instructions;
    for instruction in instructions.iter_mut() {
      instruction.map_code_addresses(
        |label| resolved.get(label as usize).copied().unwrap_or(FAIL_ADDRESS)
      );
    }
    instructions
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::functor::FunctorId;

  #[test]
  fn labels_resolve_to_byte_offsets() {
    let mut assembler = Assembler::new();
    let else_label = assembler.new_label();
    let end_label = assembler.new_label();

    assembler.emit(Instruction::TryMeElse(else_label));
    assembler.emit(Instruction::Call(FunctorId(7)));
    assembler.emit(Instruction::Jump(end_label));
    assembler.bind(else_label);
    assembler.emit(Instruction::TrustMe);
    assembler.bind(end_label);
    assembler.emit(Instruction::Proceed);

    let code = assembler.finish();
    // try_me_else and jump are 5 bytes each, call is 5, trust_me is 1.
    assert_eq!(code[0], Instruction::TryMeElse(15));
    assert_eq!(code[2], Instruction::Jump(16));
  }

  #[test]
  fn unbound_labels_fail() {
    let mut assembler = Assembler::new();
    let nowhere = assembler.new_label();
    let index = assembler.emit(Instruction::Allocate(0));
    assembler.emit(Instruction::Jump(nowhere));
    assembler.patch(index, Instruction::Allocate(3));

    let code = assembler.finish();
    assert_eq!(code, vec![Instruction::Allocate(3), Instruction::Jump(FAIL_ADDRESS)]);
  }
}
