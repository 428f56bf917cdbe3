use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::address::Address;
use crate::codearea::CodeView;
use crate::functor::FunctorId;
use crate::interner::InternerView;
use crate::library::NativePredicate;

/// A byte offset into code memory.
pub type CodeAddress = u32;

/// The target of an indexing branch that has no matching clause.
pub const FAIL_ADDRESS: CodeAddress = CodeAddress::MAX;

/**
  Opcodes of the virtual machine.

  Rust stores fieldless enum variants as bytes. As in C, enum values are represented by
  consecutive natural numbers, so the opcode byte in code memory is just the discriminant. The
  order of the variants is therefore part of the binary format.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug,        Hash
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Operation {
  // Head unification //
  GetVariable,       // get_variable( Vn, Ai )
  GetValue,          // get_value( Vn, Ai )
  GetStructure,      // get_structure( f/n, Ai )
  GetConstant,       // get_constant( c, Ai )
  UnifyVariable,     // unify_variable( Vn )
  UnifyValue,        // unify_value( Vn )
  UnifyConstant,     // unify_constant( c )
  UnifyVoid,         // unify_void( n )

  // Argument construction //
  PutVariable,       // put_variable( Vn, Ai )
  PutValue,          // put_value( Vn, Ai )
  PutStructure,      // put_structure( f/n, Ai )
  PutConstant,       // put_constant( c, Ai )
  SetVariable,       // set_variable( Vn )
  SetValue,          // set_value( Vn )
  SetConstant,       // set_constant( c )
  SetVoid,           // set_void( n )

  // Control //
  Allocate,          // allocate( n )
  Deallocate,        // deallocate
  Call,              // call( f/n )
  Execute,           // execute( f/n )
  Proceed,           // proceed

  // Choice //
  TryMeElse,         // try_me_else( L )
  RetryMeElse,       // retry_me_else( L )
  TrustMe,           // trust_me
  Try,               // try( L )
  Retry,             // retry( L )
  Trust,             // trust( L )

  // Indexing //
  SwitchOnTerm,      // switch_on_term( Lv, Lc, Ls )
  SwitchOnConstant,  // switch_on_constant( { c: L } )
  SwitchOnStructure, // switch_on_structure( { f/n: L } )

  // Inline control constructs and built-ins //
  Jump,              // jump( L )
  GetLevel,          // get_level( Yn )
  MarkChoice,        // mark_choice( Yn )
  Cut,               // cut( Yn )
  CallBuiltin,       // call_builtin( p )
  MetaCall,          // meta_call
  Fail,              // fail
  Halt,              // halt
}

impl Operation {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  pub fn mnemonic(&self) -> &'static str {
    self.into()
  }
}

/// An atomic value: an atom (a functor of arity zero), an integer, or a float.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Constant {
  Atom(FunctorId),
  Integer(i64),
  Float(OrderedFloat<f64>),
}

impl Display for Constant{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Constant::Atom(functor) => write!(f, "{}", functor),
      Constant::Integer(i)    => write!(f, "{}", i),
      Constant::Float(x)      => write!(f, "{:?}", x.0),
    }
  }
}

/// Holds the unencoded components of an instruction, one variant per operation.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  GetVariable       { register: Address, argument: u8 },
  GetValue          { register: Address, argument: u8 },
  GetStructure      { functor: FunctorId, argument: u8 },
  GetConstant       { constant: Constant, argument: u8 },
  UnifyVariable     (Address),
  UnifyValue        (Address),
  UnifyConstant     (Constant),
  UnifyVoid         (u8),

  PutVariable       { register: Address, argument: u8 },
  PutValue          { register: Address, argument: u8 },
  PutStructure      { functor: FunctorId, argument: u8 },
  PutConstant       { constant: Constant, argument: u8 },
  SetVariable       (Address),
  SetValue          (Address),
  SetConstant       (Constant),
  SetVoid           (u8),

  /// Pushes an environment with the given number of permanent variable slots.
  Allocate          (u8),
  Deallocate,
  Call              (FunctorId),
  Execute           (FunctorId),
  Proceed,

  TryMeElse         (CodeAddress),
  RetryMeElse       (CodeAddress),
  TrustMe,
  Try               (CodeAddress),
  Retry             (CodeAddress),
  Trust             (CodeAddress),

  SwitchOnTerm      { variable: CodeAddress, constant: CodeAddress, structure: CodeAddress },
  SwitchOnConstant  (Vec<(Constant, CodeAddress)>),
  SwitchOnStructure (Vec<(FunctorId, CodeAddress)>),

  Jump              (CodeAddress),
  /// Saves the cut barrier of the current call, the choice point height on entry.
  GetLevel          (Address),
  /// Saves the current choice point height, for cuts local to an if-then-else or a negation.
  MarkChoice        (Address),
  Cut               (Address),
  CallBuiltin       (NativePredicate),
  MetaCall,
  Fail,
  Halt,
}

impl Instruction {

  pub fn operation(&self) -> Operation {
    match self {
      Instruction::GetVariable{..}       => Operation::GetVariable,
      Instruction::GetValue{..}          => Operation::GetValue,
      Instruction::GetStructure{..}      => Operation::GetStructure,
      Instruction::GetConstant{..}       => Operation::GetConstant,
      Instruction::UnifyVariable(_)      => Operation::UnifyVariable,
      Instruction::UnifyValue(_)         => Operation::UnifyValue,
      Instruction::UnifyConstant(_)      => Operation::UnifyConstant,
      Instruction::UnifyVoid(_)          => Operation::UnifyVoid,
      Instruction::PutVariable{..}       => Operation::PutVariable,
      Instruction::PutValue{..}          => Operation::PutValue,
      Instruction::PutStructure{..}      => Operation::PutStructure,
      Instruction::PutConstant{..}       => Operation::PutConstant,
      Instruction::SetVariable(_)        => Operation::SetVariable,
      Instruction::SetValue(_)           => Operation::SetValue,
      Instruction::SetConstant(_)        => Operation::SetConstant,
      Instruction::SetVoid(_)            => Operation::SetVoid,
      Instruction::Allocate(_)           => Operation::Allocate,
      Instruction::Deallocate            => Operation::Deallocate,
      Instruction::Call(_)               => Operation::Call,
      Instruction::Execute(_)            => Operation::Execute,
      Instruction::Proceed               => Operation::Proceed,
      Instruction::TryMeElse(_)          => Operation::TryMeElse,
      Instruction::RetryMeElse(_)        => Operation::RetryMeElse,
      Instruction::TrustMe               => Operation::TrustMe,
      Instruction::Try(_)                => Operation::Try,
      Instruction::Retry(_)              => Operation::Retry,
      Instruction::Trust(_)              => Operation::Trust,
      Instruction::SwitchOnTerm{..}      => Operation::SwitchOnTerm,
      Instruction::SwitchOnConstant(_)   => Operation::SwitchOnConstant,
      Instruction::SwitchOnStructure(_)  => Operation::SwitchOnStructure,
      Instruction::Jump(_)               => Operation::Jump,
      Instruction::GetLevel(_)           => Operation::GetLevel,
      Instruction::MarkChoice(_)         => Operation::MarkChoice,
      Instruction::Cut(_)                => Operation::Cut,
      Instruction::CallBuiltin(_)        => Operation::CallBuiltin,
      Instruction::MetaCall              => Operation::MetaCall,
      Instruction::Fail                  => Operation::Fail,
      Instruction::Halt                  => Operation::Halt,
    }
  }

  /// The size in bytes of the encoded instruction.
  pub fn size(&self) -> usize {
    super::binary::instruction_size(self)
  }

  /// Applies `f` to every code address operand. Used to resolve labels and to relocate code.
  /// `FAIL_ADDRESS` is never passed to `f`.
  pub fn map_code_addresses<F>(&mut self, mut f: F)
    where F: FnMut(CodeAddress) -> CodeAddress
  {
    let mut apply = |address: &mut CodeAddress| {
      if *address != FAIL_ADDRESS {
        *address = f(*address);
      }
    };
    match self {
      | Instruction::TryMeElse(address)
      | Instruction::RetryMeElse(address)
      | Instruction::Try(address)
      | Instruction::Retry(address)
      | Instruction::Trust(address)
      | Instruction::Jump(address) => apply(address),

      Instruction::SwitchOnTerm{ variable, constant, structure } => {
        apply(variable);
        apply(constant);
        apply(structure);
      }
      Instruction::SwitchOnConstant(table) => {
        for (_, address) in table.iter_mut() {
          apply(address);
        }
      }
      Instruction::SwitchOnStructure(table) => {
        for (_, address) in table.iter_mut() {
          apply(address);
        }
      }
      _ => {}
    }
  }

  /// The operands of the instruction as text, with names resolved where the collaborators are
  /// supplied.
  pub fn operands_text(
    &self,
    interner  : Option<&dyn InternerView>,
    code_view : Option<&dyn CodeView>
  ) -> String {
    let functor = |id: &FunctorId| -> String {
      interner
        .and_then(|interner| interner.functor(*id))
        .map(|functor| functor.to_string())
        .unwrap_or_else(|| id.to_string())
    };
    let constant = |c: &Constant| -> String {
      match c {
        Constant::Atom(id) => {
          interner
            .and_then(|interner| interner.functor_name(*id))
            .map(|name| name.to_string())
            .unwrap_or_else(|| id.to_string())
        }
        other => other.to_string()
      }
    };
    let label = |address: &CodeAddress| -> String {
      if *address == FAIL_ADDRESS {
        return "fail".to_string();
      }
      let name =
        code_view
          .and_then(|view| view.label_at(*address))
          .and_then(|id| interner.and_then(|interner| interner.functor(id)).map(|f| f.to_string()));
      match name {
        Some(name) => format!("{:08x}<{}>", address, name),
        None       => format!("{:08x}", address)
      }
    };

    match self {
      | Instruction::GetVariable{ register, argument }
      | Instruction::GetValue{ register, argument }
      | Instruction::PutVariable{ register, argument }
      | Instruction::PutValue{ register, argument } => format!("{}, A{}", register, argument),

      | Instruction::GetStructure{ functor: f, argument }
      | Instruction::PutStructure{ functor: f, argument } => format!("{}, A{}", functor(f), argument),

      | Instruction::GetConstant{ constant: c, argument }
      | Instruction::PutConstant{ constant: c, argument } => format!("{}, A{}", constant(c), argument),

      | Instruction::UnifyVariable(register)
      | Instruction::UnifyValue(register)
      | Instruction::SetVariable(register)
      | Instruction::SetValue(register)
      | Instruction::GetLevel(register)
      | Instruction::MarkChoice(register)
      | Instruction::Cut(register) => register.to_string(),

      | Instruction::UnifyConstant(c)
      | Instruction::SetConstant(c) => constant(c),

      | Instruction::UnifyVoid(n)
      | Instruction::SetVoid(n)
      | Instruction::Allocate(n) => n.to_string(),

      | Instruction::Call(f)
      | Instruction::Execute(f) => functor(f),

      | Instruction::TryMeElse(address)
      | Instruction::RetryMeElse(address)
      | Instruction::Try(address)
      | Instruction::Retry(address)
      | Instruction::Trust(address)
      | Instruction::Jump(address) => label(address),

      Instruction::SwitchOnTerm{ variable, constant, structure } => {
        format!("{}, {}, {}", label(variable), label(constant), label(structure))
      }

      Instruction::SwitchOnConstant(table) => {
        let entries: Vec<String> =
          table.iter().map(|(c, address)| format!("{}: {}", constant(c), label(address))).collect();
        format!("{{{}}}", entries.join(", "))
      }

      Instruction::SwitchOnStructure(table) => {
        let entries: Vec<String> =
          table.iter().map(|(f, address)| format!("{}: {}", functor(f), label(address))).collect();
        format!("{{{}}}", entries.join(", "))
      }

      Instruction::CallBuiltin(native) => native.to_string(),

      | Instruction::Deallocate
      | Instruction::Proceed
      | Instruction::TrustMe
      | Instruction::MetaCall
      | Instruction::Fail
      | Instruction::Halt => String::new(),
    }
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let operands = self.operands_text(None, None);
    if operands.is_empty() {
      write!(f, "{}", self.operation())
    } else {
      write!(f, "{} {}", self.operation(), operands)
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryFrom;
  use std::str::FromStr;

  #[test]
  fn opcodes_and_mnemonics_agree() {
    assert_eq!(Operation::GetVariable.code(), 0);
    assert_eq!(Operation::try_from(Operation::Halt.code()).unwrap(), Operation::Halt);
    assert_eq!(Operation::SwitchOnTerm.mnemonic(), "switch_on_term");
    assert_eq!(Operation::from_str("try_me_else").unwrap(), Operation::TryMeElse);
    assert!(Operation::try_from(0xFFu8).is_err());
  }

  #[test]
  fn relocation_skips_fail_targets() {
    let mut instruction = Instruction::SwitchOnTerm{ variable: 4, constant: FAIL_ADDRESS, structure: 10 };
    instruction.map_code_addresses(|address| address + 100);
    assert_eq!(
      instruction,
      Instruction::SwitchOnTerm{ variable: 104, constant: FAIL_ADDRESS, structure: 110 }
    );
  }

  #[test]
  fn displays_without_collaborators() {
    let instruction = Instruction::GetStructure{ functor: FunctorId(5), argument: 1 };
    assert_eq!(instruction.to_string(), "get_structure #5, A1");
    assert_eq!(Instruction::Proceed.to_string(), "proceed");
    assert_eq!(Instruction::UnifyValue(Address::Stack(2)).to_string(), "unify_value Y2");
  }
}
