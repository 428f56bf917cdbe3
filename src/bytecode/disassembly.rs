//! Turns code memory back into readable instructions for listings and debuggers.

use std::fmt::{Display, Formatter};

use prettytable::Table;

use super::{decode_instruction, CodeAddress, Instruction};
use crate::codearea::CodeView;
use crate::error::DecodeError;
use crate::interner::InternerView;
use crate::wvm::TABLE_DISPLAY_FORMAT;

/// One decoded instruction with its address and the textual columns of a listing.
#[derive(Clone, Debug, PartialEq)]
pub struct DisassembledInstruction {
  pub address     : CodeAddress,
  /// The name of the predicate whose code starts at `address`, if any.
  pub label       : Option<String>,
  pub instruction : Instruction,
  pub mnemonic    : &'static str,
  pub args        : String,
}

impl Display for DisassembledInstruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:08x} ", self.address)?;
    if let Some(label) = &self.label {
      write!(f, "{}: ", label)?;
    }
    write!(f, "{}", self.mnemonic)?;
    if !self.args.is_empty() {
      write!(f, " {}", self.args)?;
    }
    Ok(())
  }
}

/**
  Decodes the `length` bytes of `buffer` beginning at address `start`. `buffer` is the whole code
  memory, so that addresses in the result are absolute.

  With an interner, functor ids are shown as `name/arity`. With a code view as well, code
  addresses that are the entry point of a predicate are shown with that predicate's name, and the
  instruction at such an address gets the name as its label.
*/
pub fn disassemble(
  buffer    : &[u8],
  start     : CodeAddress,
  length    : usize,
  interner  : Option<&dyn InternerView>,
  code_view : Option<&dyn CodeView>
) -> Result<Vec<DisassembledInstruction>, DecodeError> {
  let begin = start as usize;
  let end = begin + length;
  if end > buffer.len() {
    return Err(DecodeError::Truncated{ address: start });
  }

  let mut listing = Vec::new();
  let mut offset = begin;
  while offset < end {
    let address = offset as CodeAddress;
    let (instruction, size) = decode_instruction(&buffer[offset..end], address)?;

    let label =
      code_view
        .and_then(|view| view.label_at(address))
        .map(|id| {
          interner
            .and_then(|interner| interner.functor(id))
            .map(|functor| functor.to_string())
            .unwrap_or_else(|| id.to_string())
        });

    listing.push(DisassembledInstruction{
      address,
      label,
      mnemonic : instruction.operation().mnemonic(),
      args     : instruction.operands_text(interner, code_view),
      instruction,
    });
    offset += size;
  }

  Ok(listing)
}

/// Lays out a listing in the address/label/mnemonic/args columns of a byte-code monitor.
pub fn listing_table(listing: &[DisassembledInstruction]) -> Table {
  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(row![ubr->"Address", ubl->"Label", ubl->"Mnemonic", ubl->"Args"]);
  for line in listing {
    table.add_row(row![
      r->format!("{:08x}", line.address),
      line.label.as_deref().unwrap_or(""),
      line.mnemonic,
      line.args
    ]);
  }
  table
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::address::Address;
  use crate::bytecode::{encode_all, Constant};
  use crate::functor::FunctorId;
  use crate::interner::Interner;

  struct OnePredicate(FunctorId);

  impl CodeView for OnePredicate {
    fn label_at(&self, address: CodeAddress) -> Option<FunctorId> {
      if address == 0 { Some(self.0) } else { None }
    }

    fn predicate_at(&self, _address: CodeAddress) -> Option<FunctorId> {
      Some(self.0)
    }
  }

  #[test]
  fn resolves_names_when_collaborators_are_supplied() {
    let mut interner = Interner::new();
    let p = interner.intern_functor("p", 1);
    let a = interner.intern_atom("a");
    let program = vec![
      Instruction::TryMeElse(0),
      Instruction::GetConstant{ constant: Constant::Atom(a), argument: 1 },
      Instruction::Execute(p),
    ];
    let code = encode_all(&program);
    let view = OnePredicate(p);

    let listing = disassemble(&code, 0, code.len(), Some(&interner), Some(&view)).unwrap();
    assert_eq!(listing.len(), 3);
    assert_eq!(listing[0].to_string(), "00000000 p/1: try_me_else 00000000<p/1>");
    assert_eq!(listing[1].label, None);
    assert_eq!(listing[1].args, "a, A1");
    assert_eq!(listing[2].address, 1 + 4 + 1 + 9 + 1);
    assert_eq!(listing[2].args, "p/1");
  }

  #[test]
  fn falls_back_to_ids_without_collaborators() {
    let program = vec![
      Instruction::PutValue{ register: Address::Stack(1), argument: 2 },
      Instruction::Call(FunctorId(6)),
    ];
    let code = encode_all(&program);
    let listing = disassemble(&code, 0, code.len(), None, None).unwrap();
    let instructions: Vec<Instruction> = listing.iter().map(|line| line.instruction.clone()).collect();
    assert_eq!(instructions, program);
    assert_eq!(listing[1].to_string(), "00000004 call #6");
  }

  #[test]
  fn disassembles_a_window_of_code_memory() {
    let program = vec![Instruction::Proceed, Instruction::Fail, Instruction::Halt];
    let code = encode_all(&program);
    let listing = disassemble(&code, 1, 2, None, None).unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].address, 1);
    assert_eq!(listing[1].instruction, Instruction::Halt);
    assert_eq!(listing[1].to_string(), "00000002 halt");
    assert!(disassemble(&code, 2, 5, None, None).is_err());
  }
}
