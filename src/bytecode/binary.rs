/*!
  This module is responsible for the encoding and decoding of binary instructions.

  All multi-byte fields are little-endian. Every instruction starts with its opcode byte:

    register      [kind:8][number:8]         kind 0 is X, kind 1 is Y
    argument      [number:8]
    functor       [id:32]
    constant      [tag:8][payload:64]        tag 0 atom (functor id), 1 integer, 2 float bits
    code address  [offset:32]
    table         [count:16] count × (key, code address)
    count         [n:8]

  If you change the layout you must change `encode_instruction`, `decode_instruction` and
  `instruction_size` together.
*/
use std::convert::TryFrom;

use bytes::{Buf, BufMut};
use ordered_float::OrderedFloat;

use super::{CodeAddress, Constant, Instruction, Operation};
use crate::address::Address;
use crate::error::DecodeError;
use crate::functor::FunctorId;
use crate::library::NativePredicate;

const ADDRESS_SIZE   : usize = 2;
const ARGUMENT_SIZE  : usize = 1;
const FUNCTOR_SIZE   : usize = 4;
const CONSTANT_SIZE  : usize = 9;
const LOCATION_SIZE  : usize = 4;
const COUNT_SIZE     : usize = 2;

const CONSTANT_ATOM    : u8 = 0;
const CONSTANT_INTEGER : u8 = 1;
const CONSTANT_FLOAT   : u8 = 2;

// region Encoding

fn put_address(buffer: &mut Vec<u8>, address: &Address) {
  buffer.put_u8(address.kind());
  buffer.put_u8(address.number());
}

fn put_constant(buffer: &mut Vec<u8>, constant: &Constant) {
  match constant {
    Constant::Atom(functor) => {
      buffer.put_u8(CONSTANT_ATOM);
      buffer.put_u64_le(functor.0 as u64);
    }
    Constant::Integer(i) => {
      buffer.put_u8(CONSTANT_INTEGER);
      buffer.put_i64_le(*i);
    }
    Constant::Float(x) => {
      buffer.put_u8(CONSTANT_FLOAT);
      buffer.put_f64_le(x.0);
    }
  }
}

/// Appends the binary form of `instruction` to `buffer`.
pub fn encode_instruction(instruction: &Instruction, buffer: &mut Vec<u8>) {
  buffer.put_u8(instruction.operation().code());

  match instruction {
    | Instruction::GetVariable{ register, argument }
    | Instruction::GetValue{ register, argument }
    | Instruction::PutVariable{ register, argument }
    | Instruction::PutValue{ register, argument } => {
      put_address(buffer, register);
      buffer.put_u8(*argument);
    }

    | Instruction::GetStructure{ functor, argument }
    | Instruction::PutStructure{ functor, argument } => {
      buffer.put_u32_le(functor.0);
      buffer.put_u8(*argument);
    }

    | Instruction::GetConstant{ constant, argument }
    | Instruction::PutConstant{ constant, argument } => {
      put_constant(buffer, constant);
      buffer.put_u8(*argument);
    }

    | Instruction::UnifyVariable(register)
    | Instruction::UnifyValue(register)
    | Instruction::SetVariable(register)
    | Instruction::SetValue(register)
    | Instruction::GetLevel(register)
    | Instruction::MarkChoice(register)
    | Instruction::Cut(register) => put_address(buffer, register),

    | Instruction::UnifyConstant(constant)
    | Instruction::SetConstant(constant) => put_constant(buffer, constant),

    | Instruction::UnifyVoid(n)
    | Instruction::SetVoid(n)
    | Instruction::Allocate(n) => buffer.put_u8(*n),

    | Instruction::Call(functor)
    | Instruction::Execute(functor) => buffer.put_u32_le(functor.0),

    | Instruction::TryMeElse(address)
    | Instruction::RetryMeElse(address)
    | Instruction::Try(address)
    | Instruction::Retry(address)
    | Instruction::Trust(address)
    | Instruction::Jump(address) => buffer.put_u32_le(*address),

    Instruction::SwitchOnTerm{ variable, constant, structure } => {
      buffer.put_u32_le(*variable);
      buffer.put_u32_le(*constant);
      buffer.put_u32_le(*structure);
    }

    Instruction::SwitchOnConstant(table) => {
      buffer.put_u16_le(table.len() as u16);
      for (constant, address) in table.iter() {
        put_constant(buffer, constant);
        buffer.put_u32_le(*address);
      }
    }

    Instruction::SwitchOnStructure(table) => {
      buffer.put_u16_le(table.len() as u16);
      for (functor, address) in table.iter() {
        buffer.put_u32_le(functor.0);
        buffer.put_u32_le(*address);
      }
    }

    Instruction::CallBuiltin(native) => buffer.put_u8((*native).into()),

    | Instruction::Deallocate
    | Instruction::Proceed
    | Instruction::TrustMe
    | Instruction::MetaCall
    | Instruction::Fail
    | Instruction::Halt => {}
  }
}

/// Encodes a sequence of instructions into a fresh buffer.
pub fn encode_all(instructions: &[Instruction]) -> Vec<u8> {
  let mut buffer = Vec::new();
  for instruction in instructions {
    encode_instruction(instruction, &mut buffer);
  }
  buffer
}

// endregion

// region Decoding

/// A read cursor over code memory that reports truncation in terms of the instruction's address.
struct Reader<'a> {
  bytes   : &'a [u8],
  address : CodeAddress,
}

impl<'a> Reader<'a> {

  fn need(&self, n: usize) -> Result<(), DecodeError> {
    if self.bytes.remaining() < n {
      Err(DecodeError::Truncated{ address: self.address })
    } else {
      Ok(())
    }
  }

  fn u8(&mut self) -> Result<u8, DecodeError> {
    self.need(1)?;
    Ok(self.bytes.get_u8())
  }

  fn u16(&mut self) -> Result<u16, DecodeError> {
    self.need(2)?;
    Ok(self.bytes.get_u16_le())
  }

  fn u32(&mut self) -> Result<u32, DecodeError> {
    self.need(4)?;
    Ok(self.bytes.get_u32_le())
  }

  fn functor(&mut self) -> Result<FunctorId, DecodeError> {
    Ok(FunctorId(self.u32()?))
  }

  fn register(&mut self) -> Result<Address, DecodeError> {
    self.need(ADDRESS_SIZE)?;
    let kind = self.bytes.get_u8();
    let number = self.bytes.get_u8();
    Address::from_parts(kind, number).ok_or(DecodeError::InvalidOperand{ address: self.address })
  }

  fn constant(&mut self) -> Result<Constant, DecodeError> {
    self.need(CONSTANT_SIZE)?;
    let tag = self.bytes.get_u8();
    match tag {
      CONSTANT_ATOM    => Ok(Constant::Atom(FunctorId(self.bytes.get_u64_le() as u32))),
      CONSTANT_INTEGER => Ok(Constant::Integer(self.bytes.get_i64_le())),
      CONSTANT_FLOAT   => Ok(Constant::Float(OrderedFloat(self.bytes.get_f64_le()))),
      _                => Err(DecodeError::InvalidOperand{ address: self.address })
    }
  }
}

/**
  Decodes the instruction that begins at the start of `bytes`, which is code memory from `address`
  onward. Returns the instruction together with its encoded size in bytes, so the caller can step
  to the next instruction.
*/
pub fn decode_instruction(bytes: &[u8], address: CodeAddress) -> Result<(Instruction, usize), DecodeError> {
  let total = bytes.len();
  let mut reader = Reader{ bytes, address };
  let opcode = reader.u8()?;
  let operation =
    Operation::try_from(opcode).map_err(|_| DecodeError::UnknownOpcode{ opcode, address })?;

  let instruction =
    match operation {
      Operation::GetVariable => {
        let register = reader.register()?;
        Instruction::GetVariable{ register, argument: reader.u8()? }
      }
      Operation::GetValue => {
        let register = reader.register()?;
        Instruction::GetValue{ register, argument: reader.u8()? }
      }
      Operation::PutVariable => {
        let register = reader.register()?;
        Instruction::PutVariable{ register, argument: reader.u8()? }
      }
      Operation::PutValue => {
        let register = reader.register()?;
        Instruction::PutValue{ register, argument: reader.u8()? }
      }
      Operation::GetStructure => {
        let functor = reader.functor()?;
        Instruction::GetStructure{ functor, argument: reader.u8()? }
      }
      Operation::PutStructure => {
        let functor = reader.functor()?;
        Instruction::PutStructure{ functor, argument: reader.u8()? }
      }
      Operation::GetConstant => {
        let constant = reader.constant()?;
        Instruction::GetConstant{ constant, argument: reader.u8()? }
      }
      Operation::PutConstant => {
        let constant = reader.constant()?;
        Instruction::PutConstant{ constant, argument: reader.u8()? }
      }

      Operation::UnifyVariable => Instruction::UnifyVariable(reader.register()?),
      Operation::UnifyValue    => Instruction::UnifyValue(reader.register()?),
      Operation::SetVariable   => Instruction::SetVariable(reader.register()?),
      Operation::SetValue      => Instruction::SetValue(reader.register()?),
      Operation::GetLevel      => Instruction::GetLevel(reader.register()?),
      Operation::MarkChoice    => Instruction::MarkChoice(reader.register()?),
      Operation::Cut           => Instruction::Cut(reader.register()?),

      Operation::UnifyConstant => Instruction::UnifyConstant(reader.constant()?),
      Operation::SetConstant   => Instruction::SetConstant(reader.constant()?),

      Operation::UnifyVoid     => Instruction::UnifyVoid(reader.u8()?),
      Operation::SetVoid       => Instruction::SetVoid(reader.u8()?),
      Operation::Allocate      => Instruction::Allocate(reader.u8()?),

      Operation::Call          => Instruction::Call(reader.functor()?),
      Operation::Execute       => Instruction::Execute(reader.functor()?),

      Operation::TryMeElse     => Instruction::TryMeElse(reader.u32()?),
      Operation::RetryMeElse   => Instruction::RetryMeElse(reader.u32()?),
      Operation::Try           => Instruction::Try(reader.u32()?),
      Operation::Retry         => Instruction::Retry(reader.u32()?),
      Operation::Trust         => Instruction::Trust(reader.u32()?),
      Operation::Jump          => Instruction::Jump(reader.u32()?),

      Operation::SwitchOnTerm => {
        let variable  = reader.u32()?;
        let constant  = reader.u32()?;
        let structure = reader.u32()?;
        Instruction::SwitchOnTerm{ variable, constant, structure }
      }

      Operation::SwitchOnConstant => {
        let count = reader.u16()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
          let constant = reader.constant()?;
          table.push((constant, reader.u32()?));
        }
        Instruction::SwitchOnConstant(table)
      }

      Operation::SwitchOnStructure => {
        let count = reader.u16()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
          let functor = reader.functor()?;
          table.push((functor, reader.u32()?));
        }
        Instruction::SwitchOnStructure(table)
      }

      Operation::CallBuiltin => {
        let code = reader.u8()?;
        let native =
          NativePredicate::try_from(code).map_err(|_| DecodeError::InvalidOperand{ address })?;
        Instruction::CallBuiltin(native)
      }

      Operation::Deallocate  => Instruction::Deallocate,
      Operation::Proceed     => Instruction::Proceed,
      Operation::TrustMe     => Instruction::TrustMe,
      Operation::MetaCall    => Instruction::MetaCall,
      Operation::Fail        => Instruction::Fail,
      Operation::Halt        => Instruction::Halt,
    };

  Ok((instruction, total - reader.bytes.remaining()))
}

// endregion

/// Returns the size in bytes of the encoded instruction.
pub fn instruction_size(instruction: &Instruction) -> usize {
  let operands =
    match instruction {
      | Instruction::GetVariable{..}
      | Instruction::GetValue{..}
      | Instruction::PutVariable{..}
      | Instruction::PutValue{..} => ADDRESS_SIZE + ARGUMENT_SIZE,

      | Instruction::GetStructure{..}
      | Instruction::PutStructure{..} => FUNCTOR_SIZE + ARGUMENT_SIZE,

      | Instruction::GetConstant{..}
      | Instruction::PutConstant{..} => CONSTANT_SIZE + ARGUMENT_SIZE,

      | Instruction::UnifyVariable(_)
      | Instruction::UnifyValue(_)
      | Instruction::SetVariable(_)
      | Instruction::SetValue(_)
      | Instruction::GetLevel(_)
      | Instruction::MarkChoice(_)
      | Instruction::Cut(_) => ADDRESS_SIZE,

      | Instruction::UnifyConstant(_)
      | Instruction::SetConstant(_) => CONSTANT_SIZE,

      | Instruction::UnifyVoid(_)
      | Instruction::SetVoid(_)
      | Instruction::Allocate(_)
      | Instruction::CallBuiltin(_) => 1,

      | Instruction::Call(_)
      | Instruction::Execute(_) => FUNCTOR_SIZE,

      | Instruction::TryMeElse(_)
      | Instruction::RetryMeElse(_)
      | Instruction::Try(_)
      | Instruction::Retry(_)
      | Instruction::Trust(_)
      | Instruction::Jump(_) => LOCATION_SIZE,

      Instruction::SwitchOnTerm{..} => 3 * LOCATION_SIZE,
      Instruction::SwitchOnConstant(table) => COUNT_SIZE + table.len() * (CONSTANT_SIZE + LOCATION_SIZE),
      Instruction::SwitchOnStructure(table) => COUNT_SIZE + table.len() * (FUNCTOR_SIZE + LOCATION_SIZE),

      | Instruction::Deallocate
      | Instruction::Proceed
      | Instruction::TrustMe
      | Instruction::MetaCall
      | Instruction::Fail
      | Instruction::Halt => 0,
    };
  1 + operands
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::FAIL_ADDRESS;

  fn sample_program() -> Vec<Instruction> {
    vec![
      Instruction::SwitchOnTerm{ variable: 12, constant: FAIL_ADDRESS, structure: 40 },
      Instruction::SwitchOnConstant(vec![
        (Constant::Atom(FunctorId(3)), 8),
        (Constant::Integer(-42), 16),
        (Constant::Float(OrderedFloat(2.5)), 24),
      ]),
      Instruction::SwitchOnStructure(vec![(FunctorId(1), 64)]),
      Instruction::Allocate(3),
      Instruction::GetVariable{ register: Address::Stack(2), argument: 1 },
      Instruction::GetStructure{ functor: FunctorId(7), argument: 2 },
      Instruction::UnifyVoid(2),
      Instruction::PutConstant{ constant: Constant::Integer(i64::MIN), argument: 3 },
      Instruction::CallBuiltin(NativePredicate::Is),
      Instruction::Execute(FunctorId(9)),
      Instruction::Halt,
    ]
  }

  #[test]
  fn decodes_what_it_encodes() {
    let program = sample_program();
    let bytes = encode_all(&program);

    let mut offset = 0usize;
    let mut decoded = Vec::new();
    while offset < bytes.len() {
      let (instruction, size) = decode_instruction(&bytes[offset..], offset as CodeAddress).unwrap();
      assert_eq!(size, instruction_size(&instruction));
      decoded.push(instruction);
      offset += size;
    }
    assert_eq!(decoded, program);
  }

  #[test]
  fn sizes_are_fixed_per_opcode() {
    assert_eq!(instruction_size(&Instruction::Proceed), 1);
    assert_eq!(instruction_size(&Instruction::Call(FunctorId(0))), 5);
    assert_eq!(instruction_size(&Instruction::GetVariable{ register: Address::Register(4), argument: 1 }), 4);
    assert_eq!(encode_all(&[Instruction::UnifyConstant(Constant::Integer(1))]).len(), 10);
  }

  #[test]
  fn rejects_unknown_opcodes() {
    assert_eq!(
      decode_instruction(&[0xEE], 7),
      Err(DecodeError::UnknownOpcode{ opcode: 0xEE, address: 7 })
    );
  }

  #[test]
  fn rejects_truncated_instructions() {
    let bytes = encode_all(&[Instruction::Call(FunctorId(12))]);
    assert_eq!(
      decode_instruction(&bytes[..3], 0),
      Err(DecodeError::Truncated{ address: 0 })
    );
    assert_eq!(decode_instruction(&[], 5), Err(DecodeError::Truncated{ address: 5 }));
  }
}
