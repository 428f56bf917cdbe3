/*!
  Predicates with a native implementation, arithmetic, and the library every engine starts with.

  A native predicate reads its arguments from the argument registers and either succeeds, possibly
  binding variables, or fails. Natives have no way to raise an exception, so an arithmetic error
  such as an unbound operand or a division by zero is a logical failure and is reported with a
  warning.
*/

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;
use strum::IntoEnumIterator;
use strum_macros::{EnumCount, EnumIter};
use thiserror::Error;
use tracing::warn;

use crate::address::Address;
use crate::bytecode::{Constant, Instruction};
use crate::cell::Cell;
use crate::error::MachineError;
use crate::functor::{ArityType, FunctorId};
use crate::interner::{Interner, InternerView};
use crate::wvm::WVM;

#[derive(
  EnumIter, EnumCount, TryFromPrimitive, IntoPrimitive,
  Copy,     Clone,     Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum NativePredicate {
  True,
  Fail,
  False,
  Unify,
  NotUnifiable,
  Identical,
  NotIdentical,
  Var,
  Nonvar,
  Atom,
  Number,
  Integer,
  Float,
  Atomic,
  Compound,
  Is,
  ArithmeticEqual,
  ArithmeticNotEqual,
  Less,
  Greater,
  LessOrEqual,
  GreaterOrEqual,
  /// `'$cut'/1`: removes the choice points younger than the level in its argument.
  CutTo,
}

lazy_static! {
  static ref NATIVE_SIGNATURES: HashMap<NativePredicate, (&'static str, ArityType)> = {
    use NativePredicate::*;
    let mut table = HashMap::new();
    table.insert(True,               ("true",   0));
    table.insert(Fail,               ("fail",   0));
    table.insert(False,              ("false",  0));
    table.insert(Unify,              ("=",      2));
    table.insert(NotUnifiable,       ("\\=",    2));
    table.insert(Identical,          ("==",     2));
    table.insert(NotIdentical,       ("\\==",   2));
    table.insert(Var,                ("var",    1));
    table.insert(Nonvar,             ("nonvar", 1));
    table.insert(Atom,               ("atom",   1));
    table.insert(Number,             ("number", 1));
    table.insert(Integer,            ("integer",1));
    table.insert(Float,              ("float",  1));
    table.insert(Atomic,             ("atomic", 1));
    table.insert(Compound,           ("compound", 1));
    table.insert(Is,                 ("is",     2));
    table.insert(ArithmeticEqual,    ("=:=",    2));
    table.insert(ArithmeticNotEqual, ("=\\=",   2));
    table.insert(Less,               ("<",      2));
    table.insert(Greater,            (">",      2));
    table.insert(LessOrEqual,        ("=<",     2));
    table.insert(GreaterOrEqual,     (">=",     2));
    table.insert(CutTo,              ("$cut",   1));
    table
  };
}

impl NativePredicate {
  pub fn name(&self) -> &'static str {
    NATIVE_SIGNATURES[self].0
  }

  pub fn arity(&self) -> ArityType {
    NATIVE_SIGNATURES[self].1
  }

  /// Every native predicate with the id of its functor.
  pub fn intern_all(interner: &mut Interner) -> Vec<(FunctorId, NativePredicate)> {
    NativePredicate::iter()
      .map(|native| (interner.intern_functor(native.name(), native.arity()), native))
      .collect()
  }
}

impl Display for NativePredicate {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.name(), self.arity())
  }
}

// region Library code

/**
  Control constructs defined as ordinary predicates, so that they also work when they are not
  compiled inline, e.g. when they are meta-called.

  `call/1` records the choice point level at its entry and hands the goal to `'$call'/2` with that
  level. A cut met anywhere in the transparent parts of the goal cuts back to the level, which
  makes it local to the `call/1`. Conditions and negated goals are opaque and get a level of their
  own through a nested `call/1`.
*/
pub const LIBRARY_SOURCE: &str = r"
','(A, B) :- call((A, B)).
';'(A, B) :- call((A ; B)).
'->'(C, T) :- call((C -> T)).
'\+'(G) :- call(\+ G).

'$call'(G, _) :- var(G), !, '$meta_call'(G).
'$call'((A, B), L) :- !, '$call'(A, L), '$call'(B, L).
'$call'((C -> T ; E), L) :- !, ( call(C) -> '$call'(T, L) ; '$call'(E, L) ).
'$call'((A ; B), L) :- !, ( '$call'(A, L) ; '$call'(B, L) ).
'$call'((C -> T), L) :- !, ( call(C) -> '$call'(T, L) ).
'$call'(\+ G, _) :- !, \+ call(G).
'$call'(!, L) :- !, '$cut'(L).
'$call'(G, _) :- '$meta_call'(G).
";

/// The code of the predicate that makes a native callable by functor.
pub fn native_code(native: NativePredicate) -> Vec<Instruction> {
  vec![Instruction::CallBuiltin(native), Instruction::Proceed]
}

/// The code of `call/1`: the level at entry becomes the second argument of `dispatch`, which is
/// `'$call'/2`.
pub fn call_code(dispatch: FunctorId) -> Vec<Instruction> {
  vec![Instruction::GetLevel(Address::Register(2)), Instruction::Execute(dispatch)]
}

/// The code of `'$meta_call'/1`, which calls the goal in `A1` as it is.
pub fn meta_call_code() -> Vec<Instruction> {
  vec![Instruction::MetaCall]
}

/// The code of `!/0` when it is called rather than compiled inline. It is only called as the
/// whole of a condition or a negated goal, where there is nothing for it to cut.
pub fn cut_code() -> Vec<Instruction> {
  vec![Instruction::Proceed]
}

// endregion

// region Arithmetic

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Numeric {
  Integer(i64),
  Float(f64),
}

impl Numeric {
  fn as_f64(self) -> f64 {
    match self {
      Numeric::Integer(i) => i as f64,
      Numeric::Float(x)   => x,
    }
  }

  pub fn to_cell(self) -> Cell {
    match self {
      Numeric::Integer(i) => Cell::Constant(Constant::Integer(i)),
      Numeric::Float(x)   => Cell::Constant(Constant::Float(OrderedFloat(x))),
    }
  }

  fn compare(self, other: Numeric) -> Option<Ordering> {
    match (self, other) {
      (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(&b)),
      (a, b)                                   => a.as_f64().partial_cmp(&b.as_f64()),
    }
  }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ArithmeticError {
  #[error("arguments are not sufficiently instantiated")]
  Unbound,
  #[error("{0} is not evaluable")]
  NotEvaluable(String),
  #[error("division by zero")]
  DivisionByZero,
  #[error("integer overflow")]
  Overflow,
  #[error("{0} expects integer arguments")]
  IntegerExpected(&'static str),
  #[error("expression nested too deeply")]
  TooDeep,
  #[error(transparent)]
  Machine(#[from] MachineError),
}

fn integer_op<F>(name: &'static str, a: Numeric, b: Numeric, op: F) -> Result<Numeric, ArithmeticError>
  where F: Fn(i64, i64) -> Result<i64, ArithmeticError>
{
  match (a, b) {
    (Numeric::Integer(a), Numeric::Integer(b)) => op(a, b).map(Numeric::Integer),
    _                                        => Err(ArithmeticError::IntegerExpected(name)),
  }
}

fn apply_binary(name: &str, a: Numeric, b: Numeric) -> Result<Numeric, ArithmeticError> {
  use Numeric::{Float, Integer};
  let result =
    match (name, a, b) {
      ("+", Integer(a), Integer(b)) => Integer(a.checked_add(b).ok_or(ArithmeticError::Overflow)?),
      ("-", Integer(a), Integer(b)) => Integer(a.checked_sub(b).ok_or(ArithmeticError::Overflow)?),
      ("*", Integer(a), Integer(b)) => Integer(a.checked_mul(b).ok_or(ArithmeticError::Overflow)?),
      ("+", a, b) => Float(a.as_f64() + b.as_f64()),
      ("-", a, b) => Float(a.as_f64() - b.as_f64()),
      ("*", a, b) => Float(a.as_f64() * b.as_f64()),

      ("/", Integer(_), Integer(0)) => return Err(ArithmeticError::DivisionByZero),
      ("/", Integer(a), Integer(b)) => {
        match a.checked_rem(b) {
          Some(0) => Integer(a.checked_div(b).ok_or(ArithmeticError::Overflow)?),
          Some(_) => Float(a as f64 / b as f64),
          None    => return Err(ArithmeticError::Overflow),
        }
      }
      ("/", a, b) => {
        if b.as_f64() == 0.0 {
          return Err(ArithmeticError::DivisionByZero);
        }
        Float(a.as_f64() / b.as_f64())
      }

      ("//", a, b) => integer_op("//", a, b, |a, b| {
        if b == 0 { return Err(ArithmeticError::DivisionByZero); }
        a.checked_div(b).ok_or(ArithmeticError::Overflow)
      })?,
      ("mod", a, b) => integer_op("mod", a, b, |a, b| {
        if b == 0 { return Err(ArithmeticError::DivisionByZero); }
        // The result takes the sign of the divisor.
        a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
         .ok_or(ArithmeticError::Overflow)
      })?,

      ("min", a, b) => if b.compare(a) == Some(Ordering::Less) { b } else { a },
      ("max", a, b) => if b.compare(a) == Some(Ordering::Greater) { b } else { a },

      (other, _, _) => return Err(ArithmeticError::NotEvaluable(format!("{}/2", other))),
    };
  Ok(result)
}

fn apply_unary(name: &str, a: Numeric) -> Result<Numeric, ArithmeticError> {
  match (name, a) {
    ("-", Numeric::Integer(i))   => i.checked_neg().map(Numeric::Integer).ok_or(ArithmeticError::Overflow),
    ("-", Numeric::Float(x))     => Ok(Numeric::Float(-x)),
    ("+", a)                    => Ok(a),
    ("abs", Numeric::Integer(i)) => i.checked_abs().map(Numeric::Integer).ok_or(ArithmeticError::Overflow),
    ("abs", Numeric::Float(x))   => Ok(Numeric::Float(x.abs())),
    (other, _)                  => Err(ArithmeticError::NotEvaluable(format!("{}/1", other))),
  }
}

/// A step of the explicit stack `evaluate` walks an expression with.
enum EvalStep {
  Visit(Cell, usize),
  /// Apply the function to the last `arity` values.
  Apply(FunctorId, ArityType),
}

/// Evaluates the arithmetic expression in `cell`.
pub fn evaluate(machine: &WVM, interner: &dyn InternerView, cell: &Cell) -> Result<Numeric, ArithmeticError> {
  let mut values: Vec<Numeric> = Vec::new();
  let mut work = vec![EvalStep::Visit(cell.clone(), 0)];

  while let Some(step) = work.pop() {
    match step {
      EvalStep::Visit(cell, depth) => {
        if depth > machine.config().max_term_depth {
          return Err(ArithmeticError::TooDeep);
        }
        match machine.deref(&cell) {
          Cell::Constant(Constant::Integer(i)) => values.push(Numeric::Integer(i)),
          Cell::Constant(Constant::Float(x))   => values.push(Numeric::Float(x.0)),
          Cell::Constant(Constant::Atom(id))   => {
            return Err(ArithmeticError::NotEvaluable(format!("{}/0", function_name(interner, id))));
          }
          Cell::REF(_) => return Err(ArithmeticError::Unbound),
          Cell::STR(address) => {
            let (functor, arity) = machine.functor_at(address, interner)?;
            if arity > 2 {
              return Err(ArithmeticError::NotEvaluable(format!("{}/{}", function_name(interner, functor), arity)));
            }
            work.push(EvalStep::Apply(functor, arity));
            for i in (1..=arity as usize).rev() {
              work.push(EvalStep::Visit(machine.heap_cell(address + i)?, depth + 1));
            }
          }
          other => return Err(MachineError::MalformedHeap(other.to_string()).into()),
        }
      }
      EvalStep::Apply(functor, arity) => {
        let name = function_name(interner, functor);
        let result =
          if arity == 1 {
            let a = operand(&mut values)?;
            apply_unary(&name, a)?
          } else {
            let b = operand(&mut values)?;
            let a = operand(&mut values)?;
            apply_binary(&name, a, b)?
          };
        values.push(result);
      }
    }
  }

  operand(&mut values)
}

fn operand(values: &mut Vec<Numeric>) -> Result<Numeric, ArithmeticError> {
  values.pop().ok_or_else(|| MachineError::MalformedHeap("missing arithmetic operand".to_string()).into())
}

fn function_name(interner: &dyn InternerView, functor: FunctorId) -> String {
  interner.functor_name(functor).map(|name| name.to_string()).unwrap_or_else(|| functor.to_string())
}

// endregion

// region Native dispatch

/// Runs a native predicate. `Ok(false)` is logical failure.
pub fn call_native(
  native   : NativePredicate,
  machine  : &mut WVM,
  interner : &dyn InternerView
) -> Result<bool, MachineError> {
  use NativePredicate::*;

  match native {
    True => Ok(true),
    Fail | False => Ok(false),

    Unify => {
      let (a, b) = (machine.argument(1)?, machine.argument(2)?);
      machine.unify(a, b, interner)
    }
    NotUnifiable => {
      let (a, b) = (machine.argument(1)?, machine.argument(2)?);
      Ok(!machine.unifiable(a, b, interner)?)
    }
    Identical => {
      let (a, b) = (machine.argument(1)?, machine.argument(2)?);
      machine.identical(&a, &b, interner)
    }
    NotIdentical => {
      let (a, b) = (machine.argument(1)?, machine.argument(2)?);
      Ok(!machine.identical(&a, &b, interner)?)
    }

    Var | Nonvar | Atom | Number | Integer | Float | Atomic | Compound => {
      let cell = machine.deref(&machine.argument(1)?);
      Ok(type_check(native, &cell))
    }

    Is => {
      let expression = machine.argument(2)?;
      match evaluate(machine, interner, &expression) {
        Ok(value) => {
          let target = machine.argument(1)?;
          machine.unify(target, value.to_cell(), interner)
        }
        Err(error) => arithmetic_failure(native, error),
      }
    }

    ArithmeticEqual | ArithmeticNotEqual | Less | Greater | LessOrEqual | GreaterOrEqual => {
      let (a, b) = (machine.argument(1)?, machine.argument(2)?);
      let values = (evaluate(machine, interner, &a), evaluate(machine, interner, &b));
      match values {
        (Ok(a), Ok(b)) => {
          let ordering = a.compare(b);
          Ok(match native {
            ArithmeticEqual    => ordering == Some(Ordering::Equal),
            ArithmeticNotEqual => ordering != Some(Ordering::Equal),
            Less               => ordering == Some(Ordering::Less),
            Greater            => ordering == Some(Ordering::Greater),
            LessOrEqual        => matches!(ordering, Some(Ordering::Less) | Some(Ordering::Equal)),
            _                  => matches!(ordering, Some(Ordering::Greater) | Some(Ordering::Equal)),
          })
        }
        (Err(error), _) | (_, Err(error)) => arithmetic_failure(native, error),
      }
    }

    CutTo => {
      let level = machine.argument(1)?;
      machine.cut_to(&level)?;
      Ok(true)
    }
  }
}

fn arithmetic_failure(native: NativePredicate, error: ArithmeticError) -> Result<bool, MachineError> {
  match error {
    ArithmeticError::Machine(error) => Err(error),
    error => {
      warn!(predicate = %native, %error, "arithmetic failed");
      Ok(false)
    }
  }
}

fn type_check(native: NativePredicate, cell: &Cell) -> bool {
  match (native, cell) {
    (NativePredicate::Var, Cell::REF(_))                             => true,
    (NativePredicate::Nonvar, cell)                                  => !matches!(cell, Cell::REF(_)),
    (NativePredicate::Atom, Cell::Constant(Constant::Atom(_)))       => true,
    (NativePredicate::Number, Cell::Constant(Constant::Integer(_)))  => true,
    (NativePredicate::Number, Cell::Constant(Constant::Float(_)))    => true,
    (NativePredicate::Integer, Cell::Constant(Constant::Integer(_))) => true,
    (NativePredicate::Float, Cell::Constant(Constant::Float(_)))     => true,
    (NativePredicate::Atomic, Cell::Constant(_))                     => true,
    (NativePredicate::Compound, Cell::STR(_))                        => true,
    _                                                                => false,
  }
}

// endregion
