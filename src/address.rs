//! An `Either` type that holds the address of a register operand, either a temporary register in
//! the register bank `X` or a permanent variable slot `Y` in the current environment, with some
//! convenience functions.
//!
//! Registers count from 1 in instructions and in listings. Argument registers `A_i` are the first
//! registers of the `X` bank; instructions name them by a bare `u8`.

use std::fmt::{Display, Formatter};
use std::ops::Add;

pub type AddressNumberType = u8;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Address{
  /// A "pointer" to a register is an index into the register vector `X`.
  Register(AddressNumberType),
  /// A "pointer" to a permanent variable is an index into the current environment's slots `Y`.
  Stack(AddressNumberType)
}

impl Address {
  /// Converts the address to an index into the corresponding vector.
  pub fn idx(&self) -> usize {
    // Registers count from 1, so subtract 1 to convert to index.
    match self{
      Address::Register(i) => (*i as usize).saturating_sub(1),
      Address::Stack(i)    => (*i as usize).saturating_sub(1),
    }
  }

  /// Converts an index into the register vector to a register address.
  pub fn from_reg_idx(reg_idx: usize) -> Address{
    Address::Register((reg_idx + 1) as AddressNumberType)
  }

  /// Converts an index into an environment's slots to a stack address.
  pub fn from_stack_idx(stack_idx: usize) -> Address{
    Address::Stack((stack_idx + 1) as AddressNumberType)
  }

  pub fn is_permanent(&self) -> bool {
    matches!(self, Address::Stack(_))
  }

  /// The tag byte used by the binary encoding.
  pub fn kind(&self) -> u8 {
    match self {
      Address::Register(_) => 0,
      Address::Stack(_)    => 1,
    }
  }

  /// The 1-based register or slot number.
  pub fn number(&self) -> AddressNumberType {
    match self {
      | Address::Register(i)
      | Address::Stack(i) => *i
    }
  }

  /// Inverse of `kind` and `number`.
  pub fn from_parts(kind: u8, number: AddressNumberType) -> Option<Address> {
    match kind {
      0 => Some(Address::Register(number)),
      1 => Some(Address::Stack(number)),
      _ => None
    }
  }
}


impl Display for Address{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self{
      Address::Register(i) => write!(f, "X{}", i),
      Address::Stack(i)    => write!(f, "Y{}", i),
    }
  }
}

// Increment an address
impl Add<AddressNumberType> for Address{
  type Output = Address;
  fn add(self, rhs: AddressNumberType) -> Address{
    match self{
      Address::Register(i) => Address::Register(i+rhs),
      Address::Stack(i)    => Address::Stack(i+rhs),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registers_count_from_one() {
    assert_eq!(Address::Register(1).idx(), 0);
    assert_eq!(Address::from_reg_idx(4), Address::Register(5));
    assert_eq!(Address::from_stack_idx(0), Address::Stack(1));
    assert_eq!(Address::Stack(2) + 1, Address::Stack(3));
    assert_eq!(format!("{} {}", Address::Register(3), Address::Stack(1)), "X3 Y1");
  }

  #[test]
  fn parts_round_trip() {
    for address in [Address::Register(7), Address::Stack(200)].iter() {
      assert_eq!(Address::from_parts(address.kind(), address.number()), Some(*address));
    }
    assert_eq!(Address::from_parts(9, 1), None);
  }
}
