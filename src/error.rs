/*!
  The error taxonomy.

  Logical failure, the normal "no (more) solutions" outcome of resolution, is not an error and has
  no variant here. Compile errors concern the program text. Machine errors mean the engine itself
  broke: malformed byte-code or an exhausted memory area.
*/

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::bytecode::CodeAddress;
use crate::functor::FunctorId;

/// A 1-based position in source text.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SourcePosition {
  pub line   : usize,
  pub column : usize,
}

impl Display for SourcePosition {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CompileError {
  #[error("syntax error at {position}: {message}")]
  SourceCode { position: SourcePosition, message: String },

  /// Raised at the end of a compilation scope for a predicate that is called but never defined.
  #[error("call to undefined predicate {predicate}")]
  UnresolvedReference { predicate: String },

  #[error("clause for {predicate} needs more than 255 registers")]
  RegisterOverflow { predicate: String },

  #[error("code area is full: {requested} bytes requested, {available} available")]
  CodeAreaFull { requested: usize, available: usize },

  #[error("{what} exceeds the encodable limit of {limit}")]
  Capacity { what: &'static str, limit: usize },

  #[error("{0} cannot be used as a clause head or goal")]
  NotCallable(String),

  #[error("cannot redefine built-in predicate {0}")]
  BuiltInRedefinition(String),
}

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
  #[error("unknown opcode {opcode:#04x} at {address:08x}")]
  UnknownOpcode { opcode: u8, address: CodeAddress },

  #[error("instruction at {address:08x} runs past the end of code memory")]
  Truncated { address: CodeAddress },

  #[error("invalid operand in instruction at {address:08x}")]
  InvalidOperand { address: CodeAddress },
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MachineError {
  #[error(transparent)]
  Decode(#[from] DecodeError),

  #[error("program counter {0:08x} is outside code memory")]
  CodeAddressOutOfRange(CodeAddress),

  #[error("register {0} is out of range")]
  RegisterOutOfRange(String),

  #[error("permanent variable {0} used before it was initialized")]
  UninitializedSlot(String),

  #[error("no active environment for {0}")]
  NoEnvironment(&'static str),

  #[error("heap overflow (limit {0} cells)")]
  HeapOverflow(usize),

  #[error("trail overflow (limit {0} entries)")]
  TrailOverflow(usize),

  #[error("choice point stack overflow (limit {0})")]
  ChoicePointOverflow(usize),

  #[error("environment stack overflow (limit {0})")]
  EnvironmentOverflow(usize),

  #[error("unknown functor id {0}")]
  UnknownFunctor(FunctorId),

  #[error("term nesting deeper than {0}")]
  TermDepth(usize),

  #[error("malformed heap cell {0}")]
  MalformedHeap(String),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
  /// Every error found in one load batch. Clauses without errors were still loaded.
  #[error("{}", render_compile_errors(.0))]
  Compile(Vec<CompileError>),

  #[error(transparent)]
  Machine(#[from] MachineError),
}

impl From<CompileError> for EngineError {
  fn from(error: CompileError) -> Self {
    EngineError::Compile(vec![error])
  }
}

fn render_compile_errors(errors: &[CompileError]) -> String {
  errors.iter().map(|error| error.to_string()).collect::<Vec<String>>().join("\n")
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_carry_positions_and_addresses() {
    let error = CompileError::SourceCode{
      position: SourcePosition{ line: 3, column: 14 },
      message: "expected `.`".to_string()
    };
    assert_eq!(error.to_string(), "syntax error at 3:14: expected `.`");

    let machine: MachineError = DecodeError::UnknownOpcode{ opcode: 0xEE, address: 0x20 }.into();
    assert_eq!(machine.to_string(), "unknown opcode 0xee at 00000020");
  }

  #[test]
  fn batches_render_one_error_per_line() {
    let batch = EngineError::Compile(vec![
      CompileError::UnresolvedReference{ predicate: "q/0".to_string() },
      CompileError::NotCallable("3".to_string()),
    ]);
    assert_eq!(
      batch.to_string(),
      "call to undefined predicate q/0\n3 cannot be used as a clause head or goal"
    );
  }
}
