//! Structures and functions for the Warren Virtual Machine, what I'm calling an
//! implementation of Warren's Abstract Machine.
//!
//! The machine executes byte-code straight out of a `CodeArea`. Its state is the heap, the
//! argument/temporary registers `X`, the trail, an arena of environments holding permanent
//! variables `Y`, and an arena of choice points. Environments and choice points refer to each
//! other by index, so cutting or backtracking is a truncation.
//!
//! Unbound variables only ever live on the heap, as a `REF` cell pointing at itself. Registers
//! and environment slots hold references into the heap or constants, never variables of their
//! own, so no binding ever points from the heap into an environment.
#![allow(non_snake_case)]

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use prettytable::{format as TableFormat, Table};
use strum_macros::Display as StrumDisplay;
use tracing::{trace, warn};

use crate::address::Address;
use crate::bytecode::{CodeAddress, Constant, Instruction, FAIL_ADDRESS};
use crate::cell::{Cell, HeapAddress};
use crate::codearea::CodeArea;
use crate::config::MachineConfig;
use crate::error::MachineError;
use crate::functor::{ArityType, FunctorId};
use crate::interner::InternerView;
use crate::library::call_native;
use crate::term::Term;

/// Size of the `X` register bank. Register numbers count from 1 and fit in a byte.
pub const REGISTER_COUNT: usize = 256;

#[derive(StrumDisplay, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
  /// Nothing loaded to run.
  Idle,
  Running,
  /// Restoring the most recent choice point after a failure.
  Backtracking,
  /// Reached `halt`: the query has a solution.
  Succeeded,
  /// Every alternative is exhausted: the query has no (more) solutions.
  Failed,
  /// Stopped by an internal error.
  Halted,
}

#[derive(StrumDisplay, Copy, Clone, Debug, Eq, PartialEq)]
enum Mode {
  Read,
  Write,
}

/// A frame of permanent variables together with the continuation of the clause that owns it.
#[derive(Clone, Debug)]
struct Environment {
  ce    : Option<usize>,
  cp    : CodeAddress,
  slots : Vec<Cell>,
}

/// The machine state to go back to when the alternatives tried since it was pushed fail.
#[derive(Clone, Debug)]
struct ChoicePoint {
  args             : Vec<Cell>,
  e                : Option<usize>,
  cp               : CodeAddress,
  b0               : usize,
  trail_top        : usize,
  heap_top         : usize,
  /// Environments below this index may still be needed after backtracking.
  env_top          : usize,
  next_alternative : CodeAddress,
}

pub struct WVM {
  config : MachineConfig,
  status : Status,
  fail   : bool, // Indication of unification failure
  mode   : Mode, // Read or Write mode

  // Memory Stores
  heap          : Vec<Cell>,
  registers     : Vec<Cell>,
  trail         : Vec<HeapAddress>,
  environments  : Vec<Environment>,
  choice_points : Vec<ChoicePoint>,

  // Registers //
  P        : CodeAddress,   // Program counter
  CP       : CodeAddress,   // Continuation
  E        : Option<usize>, // Current environment
  B0       : usize,         // Cut barrier of the current call
  S        : HeapAddress,   // Next subterm to match in read mode
  num_args : usize,         // Arity of the most recent call
}

impl WVM {

  pub fn new(config: MachineConfig) -> WVM {
    WVM{
      config,
      status        : Status::Idle,
      fail          : false,
      mode          : Mode::Read,
      heap          : Vec::new(),
      registers     : vec![Cell::Empty; REGISTER_COUNT],
      trail         : Vec::new(),
      environments  : Vec::new(),
      choice_points : Vec::new(),
      P             : 0,
      CP            : FAIL_ADDRESS,
      E             : None,
      B0            : 0,
      S             : 0,
      num_args      : 0,
    }
  }

  pub fn config(&self) -> &MachineConfig {
    &self.config
  }

  pub fn status(&self) -> Status {
    self.status
  }

  pub fn trail_len(&self) -> usize {
    self.trail.len()
  }

  pub fn choice_point_count(&self) -> usize {
    self.choice_points.len()
  }

  // region Display methods

  fn make_register_table<T> (
      name      : char,
      registers : &[T],
      highlight : usize,
      start     : usize
    ) -> Table
    where T: Display
  {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (i, cell) in registers.iter().enumerate() {
      if i == highlight {
        table.add_row(row![r->format!("* --> {}[{}] =", name, i+start), format!("{}", cell)]);
      } else {
        table.add_row(row![r->format!("{}[{}] =", name, i+start), format!("{}", cell)]);
      }
    }

    table
  }

  // endregion

  // region Lifecycle

  /// Clears all machine state and prepares to run the code at `entry`.
  pub fn start(&mut self, entry: CodeAddress) {
    self.heap.clear();
    self.trail.clear();
    self.environments.clear();
    self.choice_points.clear();
    for register in self.registers.iter_mut() {
      *register = Cell::Empty;
    }
    self.P        = entry;
    self.CP       = FAIL_ADDRESS;
    self.E        = None;
    self.B0       = 0;
    self.S        = 0;
    self.num_args = 0;
    self.mode     = Mode::Read;
    self.fail     = false;
    self.status   = Status::Running;
  }

  /**
    Runs until `halt` (a solution), until every alternative has failed, or until an internal error.
    Call `resume` to look for the next solution after a success.
  */
  pub fn run(&mut self, code: &CodeArea, interner: &dyn InternerView) -> Result<Status, MachineError> {
    match self.status {
      Status::Running | Status::Backtracking => {}
      other => return Ok(other),
    }
    match self.execute_loop(code, interner) {
      Ok(status) => {
        self.status = status;
        Ok(status)
      }
      Err(error) => {
        warn!(%error, address = self.P, "machine halted");
        self.status = Status::Halted;
        Err(error)
      }
    }
  }

  /// Forces a backtrack into the most recent choice point and runs on from there.
  pub fn resume(&mut self, code: &CodeArea, interner: &dyn InternerView) -> Result<Status, MachineError> {
    if self.status != Status::Succeeded {
      return Ok(self.status);
    }
    self.status = Status::Running;
    self.fail = true;
    self.run(code, interner)
  }

  fn execute_loop(&mut self, code: &CodeArea, interner: &dyn InternerView) -> Result<Status, MachineError> {
    loop {
      if self.fail {
        self.fail = false;
        if !self.backtrack() {
          return Ok(Status::Failed);
        }
      }

      let (instruction, size) = code.fetch(self.P)?;
      trace!(address = self.P, %instruction, "dispatch");
      self.P += size as CodeAddress;

      if let Instruction::Halt = instruction {
        return Ok(Status::Succeeded);
      }
      self.execute(instruction, code, interner)?;

      #[cfg(feature = "trace_computation")]
      trace!("\n{}", self);
    }
  }

  // endregion

  // region Instruction execution

  fn execute(&mut self, instruction: Instruction, code: &CodeArea, interner: &dyn InternerView)
    -> Result<(), MachineError>
  {
    match instruction {

      // Head unification //

      Instruction::GetVariable{ register, argument } => {
        let value = self.argument(argument as usize)?;
        self.set(register, value)?;
      }

      Instruction::GetValue{ register, argument } => {
        let (a, b) = (self.get(register)?, self.argument(argument as usize)?);
        if !self.unify(a, b, interner)? {
          self.fail = true;
        }
      }

      Instruction::GetStructure{ functor, argument } => {
        match self.deref(&self.argument(argument as usize)?) {
          Cell::REF(address) => {
            let structure = self.push_structure(functor)?;
            self.bind(address, structure, interner)?;
            self.mode = Mode::Write;
          }
          Cell::STR(address) => {
            if self.heap_cell(address)? == Cell::Functor(functor) {
              self.S = address + 1;
              self.mode = Mode::Read;
            } else {
              self.fail = true;
            }
          }
          _ => self.fail = true,
        }
      }

      Instruction::GetConstant{ constant, argument } => {
        let cell = self.argument(argument as usize)?;
        self.unify_constant(cell, constant, interner)?;
      }

      Instruction::UnifyVariable(register) => {
        match self.mode {
          Mode::Read => {
            let value = self.heap_cell(self.S)?;
            self.set(register, value)?;
            self.S += 1;
          }
          Mode::Write => {
            let fresh = self.push_variable()?;
            self.set(register, fresh)?;
          }
        }
      }

      Instruction::UnifyValue(register) => {
        let value = self.get(register)?;
        match self.mode {
          Mode::Read => {
            let subterm = self.heap_cell(self.S)?;
            self.S += 1;
            if !self.unify(value, subterm, interner)? {
              self.fail = true;
            }
          }
          Mode::Write => self.push(value)?,
        }
      }

      Instruction::UnifyConstant(constant) => {
        match self.mode {
          Mode::Read => {
            let subterm = self.heap_cell(self.S)?;
            self.S += 1;
            self.unify_constant(subterm, constant, interner)?;
          }
          Mode::Write => self.push(Cell::Constant(constant))?,
        }
      }

      Instruction::UnifyVoid(n) => {
        match self.mode {
          Mode::Read => self.S += n as usize,
          Mode::Write => {
            for _ in 0..n {
              self.push_variable()?;
            }
          }
        }
      }

      // Argument construction //

      Instruction::PutVariable{ register, argument } => {
        let fresh = self.push_variable()?;
        self.set(register, fresh.clone())?;
        self.set_argument(argument as usize, fresh)?;
      }

      Instruction::PutValue{ register, argument } => {
        let value = self.get(register)?;
        self.set_argument(argument as usize, value)?;
      }

      Instruction::PutStructure{ functor, argument } => {
        let structure = self.push_structure(functor)?;
        self.set_argument(argument as usize, structure)?;
      }

      Instruction::PutConstant{ constant, argument } => {
        self.set_argument(argument as usize, Cell::Constant(constant))?;
      }

      Instruction::SetVariable(register) => {
        let fresh = self.push_variable()?;
        self.set(register, fresh)?;
      }

      Instruction::SetValue(register) => {
        let value = self.get(register)?;
        self.push(value)?;
      }

      Instruction::SetConstant(constant) => self.push(Cell::Constant(constant))?,

      Instruction::SetVoid(n) => {
        for _ in 0..n {
          self.push_variable()?;
        }
      }

      // Control //

      Instruction::Allocate(n) => self.allocate(n as usize)?,

      Instruction::Deallocate => {
        let (cp, ce) = {
          let environment = self.environment()?;
          (environment.cp, environment.ce)
        };
        self.CP = cp;
        self.E = ce;
      }

      Instruction::Call(functor) => {
        self.CP = self.P;
        self.transfer(functor, code, interner)?;
      }

      Instruction::Execute(functor) => self.transfer(functor, code, interner)?,

      Instruction::Proceed => self.P = self.CP,

      // Choice //

      Instruction::TryMeElse(alternative) => self.push_choice_point(alternative)?,

      Instruction::RetryMeElse(alternative) => {
        if let Some(choice_point) = self.choice_points.last_mut() {
          choice_point.next_alternative = alternative;
        }
      }

      Instruction::TrustMe => {
        self.choice_points.pop();
      }

      Instruction::Try(clause) => {
        let next = self.P;
        self.push_choice_point(next)?;
        self.P = clause;
      }

      Instruction::Retry(clause) => {
        let next = self.P;
        if let Some(choice_point) = self.choice_points.last_mut() {
          choice_point.next_alternative = next;
        }
        self.P = clause;
      }

      Instruction::Trust(clause) => {
        self.choice_points.pop();
        self.P = clause;
      }

      // Indexing //

      Instruction::SwitchOnTerm{ variable, constant, structure } => {
        let target =
          match self.deref(&self.argument(1)?) {
            Cell::REF(_)      => variable,
            Cell::Constant(_) => constant,
            Cell::STR(_)      => structure,
            other             => return Err(MachineError::MalformedHeap(other.to_string())),
          };
        self.jump(target);
      }

      Instruction::SwitchOnConstant(table) => {
        let target =
          match self.deref(&self.argument(1)?) {
            Cell::Constant(c) => table.iter().find(|(key, _)| *key == c).map(|(_, address)| *address),
            _                 => None,
          };
        self.jump(target.unwrap_or(FAIL_ADDRESS));
      }

      Instruction::SwitchOnStructure(table) => {
        let target =
          match self.deref(&self.argument(1)?) {
            Cell::STR(address) => {
              let (functor, _) = self.functor_at(address, interner)?;
              table.iter().find(|(key, _)| *key == functor).map(|(_, address)| *address)
            }
            _ => None,
          };
        self.jump(target.unwrap_or(FAIL_ADDRESS));
      }

      // Inline control constructs and built-ins //

      Instruction::Jump(target) => self.jump(target),

      Instruction::GetLevel(register) => self.set(register, Cell::Level(self.B0))?,

      Instruction::MarkChoice(register) => self.set(register, Cell::Level(self.choice_points.len()))?,

      Instruction::Cut(register) => {
        let level = self.get(register)?;
        self.cut_to(&level)?;
      }

      Instruction::CallBuiltin(native) => {
        if !call_native(native, self, interner)? {
          self.fail = true;
        }
      }

      Instruction::MetaCall => self.meta_call(code, interner)?,

      Instruction::Fail => self.fail = true,

      Instruction::Halt => self.status = Status::Succeeded,
    }

    Ok(())
  }

  fn jump(&mut self, target: CodeAddress) {
    if target == FAIL_ADDRESS {
      self.fail = true;
    } else {
      self.P = target;
    }
  }

  /// Enters predicate `functor`. A call to an undefined predicate fails.
  fn transfer(&mut self, functor: FunctorId, code: &CodeArea, interner: &dyn InternerView)
    -> Result<(), MachineError>
  {
    match code.call_point(functor) {
      Some(call_point) => {
        self.num_args = self.arity(functor, interner)? as usize;
        self.B0 = self.choice_points.len();
        self.P = call_point.entry;
      }
      None => {
        let name = interner.functor(functor).map(|f| f.to_string()).unwrap_or_else(|| functor.to_string());
        warn!(predicate = %name, "call to undefined predicate");
        self.fail = true;
      }
    }
    Ok(())
  }

  /// Calls the goal in `A1`, spreading its arguments over the argument registers.
  fn meta_call(&mut self, code: &CodeArea, interner: &dyn InternerView) -> Result<(), MachineError> {
    match self.deref(&self.argument(1)?) {
      Cell::Constant(Constant::Atom(functor)) => self.transfer(functor, code, interner),
      Cell::STR(address) => {
        let (functor, arity) = self.functor_at(address, interner)?;
        for i in 1..=arity as usize {
          let argument = self.heap_cell(address + i)?;
          self.set_argument(i, argument)?;
        }
        self.transfer(functor, code, interner)
      }
      Cell::REF(_) => {
        warn!("call/1: goal is not sufficiently instantiated");
        self.fail = true;
        Ok(())
      }
      other => {
        warn!(goal = %other, "call/1: goal is not callable");
        self.fail = true;
        Ok(())
      }
    }
  }

  // endregion

  // region Environments and choice points

  fn allocate(&mut self, slots: usize) -> Result<(), MachineError> {
    let above_current = self.E.map_or(0, |e| e + 1);
    let protected = self.choice_points.last().map_or(0, |choice_point| choice_point.env_top);
    let index = above_current.max(protected);
    if index >= self.config.environment_limit {
      return Err(MachineError::EnvironmentOverflow(self.config.environment_limit));
    }
    self.environments.truncate(index);
    self.environments.push(Environment{
      ce    : self.E,
      cp    : self.CP,
      slots : vec![Cell::Empty; slots],
    });
    self.E = Some(index);
    Ok(())
  }

  fn push_choice_point(&mut self, next_alternative: CodeAddress) -> Result<(), MachineError> {
    if self.choice_points.len() >= self.config.choice_point_limit {
      return Err(MachineError::ChoicePointOverflow(self.config.choice_point_limit));
    }
    // Frames above the current one have been deallocated unless an older choice point holds them.
    let env_top =
      self.E
          .map_or(0, |e| e + 1)
          .max(self.choice_points.last().map_or(0, |choice_point| choice_point.env_top));
    self.choice_points.push(ChoicePoint{
      args      : self.registers[..self.num_args.min(REGISTER_COUNT)].to_vec(),
      e         : self.E,
      cp        : self.CP,
      b0        : self.B0,
      trail_top : self.trail.len(),
      heap_top  : self.heap.len(),
      env_top,
      next_alternative,
    });
    Ok(())
  }

  /**
    Restores the state saved in the most recent choice point and continues at its next
    alternative. Returns `false` if there is no choice point left, which means resolution has
    failed. The choice point itself stays in place; `retry_me_else` or `trust_me` at the
    alternative decide what becomes of it.
  */
  fn backtrack(&mut self) -> bool {
    self.status = Status::Backtracking;
    let (trail_top, heap_top) =
      match self.choice_points.last() {
        None => return false,
        Some(choice_point) => {
          self.registers[..choice_point.args.len()].clone_from_slice(&choice_point.args);
          self.num_args = choice_point.args.len();
          self.E  = choice_point.e;
          self.CP = choice_point.cp;
          self.B0 = choice_point.b0;
          self.P  = choice_point.next_alternative;
          (choice_point.trail_top, choice_point.heap_top)
        }
      };
    self.undo_trail(trail_top);
    self.heap.truncate(heap_top);
    self.status = Status::Running;
    true
  }

  /// Removes every choice point younger than the barrier a `Level` cell records.
  pub(crate) fn cut_to(&mut self, level: &Cell) -> Result<(), MachineError> {
    match self.deref(level) {
      Cell::Level(level) => {
        self.choice_points.truncate(level);
        Ok(())
      }
      other => Err(MachineError::MalformedHeap(other.to_string())),
    }
  }

  /// Unbinds every variable trailed since the trail had length `trail_top`, newest first.
  fn undo_trail(&mut self, trail_top: usize) {
    while self.trail.len() > trail_top {
      if let Some(address) = self.trail.pop() {
        if address < self.heap.len() {
          self.heap[address] = Cell::REF(address);
        }
      }
    }
  }

  // endregion

  // region Memory access

  fn environment(&self) -> Result<&Environment, MachineError> {
    self.E
        .and_then(|index| self.environments.get(index))
        .ok_or(MachineError::NoEnvironment("permanent variable"))
  }

  /// Reads argument register `A_i`, counting from 1.
  pub fn argument(&self, i: usize) -> Result<Cell, MachineError> {
    self.get(Address::Register(register_number(i)?))
  }

  fn set_argument(&mut self, i: usize, value: Cell) -> Result<(), MachineError> {
    self.set(Address::Register(register_number(i)?), value)
  }

  pub fn get(&self, address: Address) -> Result<Cell, MachineError> {
    match address {
      Address::Register(_) => {
        self.registers
            .get(address.idx())
            .cloned()
            .ok_or_else(|| MachineError::RegisterOutOfRange(address.to_string()))
      }
      Address::Stack(_) => {
        match self.environment()?.slots.get(address.idx()) {
          Some(Cell::Empty) => Err(MachineError::UninitializedSlot(address.to_string())),
          Some(cell)        => Ok(cell.clone()),
          None              => Err(MachineError::RegisterOutOfRange(address.to_string())),
        }
      }
    }
  }

  fn set(&mut self, address: Address, value: Cell) -> Result<(), MachineError> {
    let slot =
      match address {
        Address::Register(_) => self.registers.get_mut(address.idx()),
        Address::Stack(_) => {
          let index = self.E.ok_or(MachineError::NoEnvironment("permanent variable"))?;
          self.environments
              .get_mut(index)
              .ok_or(MachineError::NoEnvironment("permanent variable"))?
              .slots
              .get_mut(address.idx())
        }
      };
    match slot {
      Some(slot) => {
        *slot = value;
        Ok(())
      }
      None => Err(MachineError::RegisterOutOfRange(address.to_string())),
    }
  }

  /// Reads a permanent variable of the current environment, e.g. a query variable after `halt`.
  pub fn permanent(&self, address: Address) -> Result<Cell, MachineError> {
    self.get(address)
  }

  pub fn heap_cell(&self, address: HeapAddress) -> Result<Cell, MachineError> {
    self.heap
        .get(address)
        .cloned()
        .ok_or_else(|| MachineError::MalformedHeap(format!("address {} beyond the heap top {}", address, self.heap.len())))
  }

  fn push(&mut self, cell: Cell) -> Result<(), MachineError> {
    if self.heap.len() >= self.config.heap_limit {
      return Err(MachineError::HeapOverflow(self.config.heap_limit));
    }
    self.heap.push(cell);
    Ok(())
  }

  /// Pushes a new unbound variable and returns a reference to it.
  fn push_variable(&mut self) -> Result<Cell, MachineError> {
    let address = self.heap.len();
    self.push(Cell::REF(address))?;
    Ok(Cell::REF(address))
  }

  /// Pushes the header of a structure, `<STR, h+1>` followed by the functor, and returns the
  /// `STR` cell. The arguments are pushed afterwards.
  fn push_structure(&mut self, functor: FunctorId) -> Result<Cell, MachineError> {
    let address = self.heap.len();
    self.push(Cell::STR(address + 1))?;
    self.push(Cell::Functor(functor))?;
    Ok(Cell::STR(address + 1))
  }

  /// The functor and arity of the structure whose functor cell is at `address`.
  pub fn functor_at(&self, address: HeapAddress, interner: &dyn InternerView)
    -> Result<(FunctorId, ArityType), MachineError>
  {
    match self.heap_cell(address)? {
      Cell::Functor(functor) => Ok((functor, self.arity(functor, interner)?)),
      other => Err(MachineError::MalformedHeap(other.to_string())),
    }
  }

  fn arity(&self, functor: FunctorId, interner: &dyn InternerView) -> Result<ArityType, MachineError> {
    interner
      .functor(functor)
      .map(|f| f.arity)
      .ok_or(MachineError::UnknownFunctor(functor))
  }

  // endregion

  // region Unification

  /// Follows `REF` cells until reaching an unbound variable or a non-variable.
  pub fn deref(&self, cell: &Cell) -> Cell {
    let mut current = cell.clone();
    loop {
      match current {
        Cell::REF(address) => {
          match self.heap.get(address) {
            Some(Cell::REF(next)) if *next == address => return current,
            Some(next) => current = next.clone(),
            None       => return current,
          }
        }
        other => return other,
      }
    }
  }

  /// Binds the unbound variable at `address` to `value` and trails the binding.
  fn bind(&mut self, address: HeapAddress, value: Cell, interner: &dyn InternerView) -> Result<bool, MachineError> {
    if self.config.occurs_check && self.occurs(address, &value, interner)? {
      return Ok(false);
    }
    if self.trail.len() >= self.config.trail_limit {
      return Err(MachineError::TrailOverflow(self.config.trail_limit));
    }
    self.heap[address] = value;
    self.trail.push(address);
    Ok(true)
  }

  fn occurs(&self, address: HeapAddress, value: &Cell, interner: &dyn InternerView) -> Result<bool, MachineError> {
    let mut pending = vec![value.clone()];
    while let Some(cell) = pending.pop() {
      match self.deref(&cell) {
        Cell::REF(other) if other == address => return Ok(true),
        Cell::STR(structure) => {
          let (_, arity) = self.functor_at(structure, interner)?;
          for i in 1..=arity as usize {
            pending.push(self.heap_cell(structure + i)?);
          }
        }
        _ => {}
      }
    }
    Ok(false)
  }

  fn unify_constant(&mut self, cell: Cell, constant: Constant, interner: &dyn InternerView) -> Result<(), MachineError> {
    match self.deref(&cell) {
      Cell::REF(address) => {
        if !self.bind(address, Cell::Constant(constant), interner)? {
          self.fail = true;
        }
      }
      Cell::Constant(other) if other == constant => {}
      _ => self.fail = true,
    }
    Ok(())
  }

  /**
    Unifies two terms, binding variables as needed. Every binding is trailed. On failure some
    bindings may already have been made; the caller backtracks, which undoes them.

    When two unbound variables meet, the younger one, at the higher heap address, is bound to the
    older one.
  */
  pub fn unify(&mut self, a: Cell, b: Cell, interner: &dyn InternerView) -> Result<bool, MachineError> {
    let mut pdl: Vec<(Cell, Cell)> = vec![(a, b)];

    while let Some((a, b)) = pdl.pop() {
      let a = self.deref(&a);
      let b = self.deref(&b);
      if a == b {
        continue;
      }
      match (a, b) {
        (Cell::REF(x), Cell::REF(y)) => {
          let bound = if x < y { self.bind(y, Cell::REF(x), interner)? } else { self.bind(x, Cell::REF(y), interner)? };
          if !bound {
            return Ok(false);
          }
        }
        (Cell::REF(x), other) | (other, Cell::REF(x)) => {
          if !self.bind(x, other, interner)? {
            return Ok(false);
          }
        }
        (Cell::STR(p), Cell::STR(q)) => {
          let (f, n) = self.functor_at(p, interner)?;
          let (g, _) = self.functor_at(q, interner)?;
          if f != g {
            return Ok(false);
          }
          for i in (1..=n as usize).rev() {
            pdl.push((self.heap_cell(p + i)?, self.heap_cell(q + i)?));
          }
        }
        _ => return Ok(false),
      }
    }

    Ok(true)
  }

  /// Whether `a` and `b` unify, leaving no bindings behind.
  pub fn unifiable(&mut self, a: Cell, b: Cell, interner: &dyn InternerView) -> Result<bool, MachineError> {
    let trail_top = self.trail.len();
    let result = self.unify(a, b, interner);
    self.undo_trail(trail_top);
    result
  }

  /// Whether `a` and `b` are the same term without binding anything: the same unbound variables,
  /// equal constants, and identical structures.
  pub fn identical(&self, a: &Cell, b: &Cell, interner: &dyn InternerView) -> Result<bool, MachineError> {
    let mut pending = vec![(a.clone(), b.clone())];
    while let Some((a, b)) = pending.pop() {
      match (self.deref(&a), self.deref(&b)) {
        (Cell::REF(x), Cell::REF(y)) if x == y => {}
        (Cell::Constant(x), Cell::Constant(y)) if x == y => {}
        (Cell::STR(p), Cell::STR(q)) => {
          let (f, n) = self.functor_at(p, interner)?;
          let (g, _) = self.functor_at(q, interner)?;
          if f != g {
            return Ok(false);
          }
          for i in 1..=n as usize {
            pending.push((self.heap_cell(p + i)?, self.heap_cell(q + i)?));
          }
        }
        _ => return Ok(false),
      }
    }
    Ok(true)
  }

  // endregion

  // region Reading terms back

  /**
    Reconstructs the term that `cell` refers to. Each unbound variable is handed to `variable`,
    which decides what term stands for it; the same address is only asked for once.

    The heap is walked with an explicit stack, so long lists cost no native stack. A term nested
    deeper than `max_term_depth`, which includes every cyclic term, is a `TermDepth` error.
  */
  pub fn read_term(
    &self,
    cell     : &Cell,
    interner : &dyn InternerView,
    variable : &mut dyn FnMut(HeapAddress) -> Term
  ) -> Result<Term, MachineError> {
    let mut seen: HashMap<HeapAddress, Term> = HashMap::new();
    let mut built: Vec<Term> = Vec::new();
    let mut work = vec![ReadStep::Visit(cell.clone(), 0)];

    while let Some(step) = work.pop() {
      match step {
        ReadStep::Visit(cell, depth) => {
          if depth > self.config.max_term_depth {
            return Err(MachineError::TermDepth(self.config.max_term_depth));
          }
          match self.deref(&cell) {
            Cell::REF(address) => {
              built.push(seen.entry(address).or_insert_with(|| variable(address)).clone());
            }
            Cell::Constant(Constant::Atom(functor)) => built.push(Term::Atom(functor)),
            Cell::Constant(Constant::Integer(i))    => built.push(Term::Integer(i)),
            Cell::Constant(Constant::Float(x))      => built.push(Term::Float(x)),
            Cell::STR(address) => {
              let (functor, arity) = self.functor_at(address, interner)?;
              work.push(ReadStep::Build(functor, arity as usize));
              for i in (1..=arity as usize).rev() {
                work.push(ReadStep::Visit(self.heap_cell(address + i)?, depth + 1));
              }
            }
            other => return Err(MachineError::MalformedHeap(other.to_string())),
          }
        }
        ReadStep::Build(functor, arity) => {
          let args = built.split_off(built.len().saturating_sub(arity));
          built.push(Term::structure(functor, args));
        }
      }
    }

    built.pop().ok_or_else(|| MachineError::MalformedHeap(cell.to_string()))
  }

  // endregion
}

/// A step of the explicit stack `read_term` walks the heap with.
enum ReadStep {
  Visit(Cell, usize),
  /// Replace the last `arity` terms read by a structure over them.
  Build(FunctorId, usize),
}

fn register_number(i: usize) -> Result<u8, MachineError> {
  if i == 0 || i > u8::MAX as usize {
    return Err(MachineError::RegisterOutOfRange(format!("A{}", i)));
  }
  Ok(i as u8)
}


lazy_static! {
  pub(crate) static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl Display for WVM {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let used_registers =
      self.registers.iter().rposition(|cell| !cell.is_empty()).map_or(0, |last| last + 1);
    let slots: &[Cell] =
      match self.environment() {
        Ok(environment) => &environment.slots,
        Err(_)          => &[],
      };

    let h_table = WVM::make_register_table('H', &self.heap,                       self.S, 0);
    let x_table = WVM::make_register_table('X', &self.registers[..used_registers], usize::MAX, 1);
    let y_table = WVM::make_register_table('Y', slots,                            usize::MAX, 1);

    let mut combined_table = table!([h_table, x_table, y_table]);

    combined_table.set_titles(row![ub->"Heap", ub->"Registers", ub->"Environment"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(
      f,
      "Status: {}\tMode: {}\tP: {:08x}\tCP: {:08x}\tB: {}\tB0: {}\tTrail: {}\n{}",
      self.status,
      self.mode,
      self.P,
      self.CP,
      self.choice_points.len(),
      self.B0,
      self.trail.len(),
      combined_table
    )
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::functor::{Functor, CONS, NIL};
  use crate::interner::Interner;

  fn machine() -> WVM {
    WVM::new(MachineConfig::default())
  }

  #[test]
  fn unifying_ground_structures_compares_them() {
    let mut interner = Interner::new();
    let f = interner.intern_functor("f", 2);
    let mut wvm = machine();

    let s = wvm.push_structure(f).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(1))).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(2))).unwrap();
    let t = wvm.push_structure(f).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(1))).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(3))).unwrap();
    let u = wvm.push_structure(f).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(1))).unwrap();
    wvm.push(Cell::Constant(Constant::Integer(2))).unwrap();

    assert!(!wvm.unify(s.clone(), t, &interner).unwrap());
    assert!(wvm.unify(s, u, &interner).unwrap());
    assert_eq!(wvm.trail_len(), 0);
  }

  #[test]
  fn bindings_are_trailed_and_undone_newest_first() {
    let interner = Interner::new();
    let mut wvm = machine();
    let x = wvm.push_variable().unwrap();
    let y = wvm.push_variable().unwrap();
    let z = wvm.push_variable().unwrap();

    assert!(wvm.unify(x.clone(), Cell::Constant(Constant::Integer(5)), &interner).unwrap());
    let mark = wvm.trail_len();
    assert!(wvm.unify(y.clone(), z.clone(), &interner).unwrap());
    assert!(wvm.unify(z.clone(), Cell::Constant(Constant::Integer(6)), &interner).unwrap());
    assert_eq!(wvm.trail_len(), 3);

    wvm.undo_trail(mark);
    assert_eq!(wvm.deref(&x), Cell::Constant(Constant::Integer(5)));
    assert_eq!(wvm.deref(&y), Cell::REF(1));
    assert_eq!(wvm.deref(&z), Cell::REF(2));
  }

  #[test]
  fn younger_variable_is_bound_to_older() {
    let interner = Interner::new();
    let mut wvm = machine();
    let x = wvm.push_variable().unwrap();
    let y = wvm.push_variable().unwrap();
    assert!(wvm.unify(x.clone(), y.clone(), &interner).unwrap());
    assert_eq!(wvm.heap_cell(1).unwrap(), Cell::REF(0));
    assert_eq!(wvm.deref(&y), x);
  }

  #[test]
  fn occurs_check_is_configurable() {
    let mut interner = Interner::new();
    let f = interner.intern_functor("f", 1);

    for &occurs_check in [false, true].iter() {
      let mut wvm = WVM::new(MachineConfig::default().with_occurs_check(occurs_check));
      let x = wvm.push_variable().unwrap();
      let s = wvm.push_structure(f).unwrap();
      wvm.push(x.clone()).unwrap();
      assert_eq!(wvm.unify(x, s, &interner).unwrap(), !occurs_check);
    }
  }

  #[test]
  fn unifiable_leaves_no_bindings() {
    let interner = Interner::new();
    let mut wvm = machine();
    let x = wvm.push_variable().unwrap();
    assert!(wvm.unifiable(x.clone(), Cell::Constant(Constant::Integer(1)), &interner).unwrap());
    assert_eq!(wvm.deref(&x), Cell::REF(0));
    assert!(wvm.identical(&x, &x, &interner).unwrap());
    assert!(!wvm.identical(&x, &Cell::Constant(Constant::Integer(1)), &interner).unwrap());
  }

  #[test]
  fn reads_terms_back_with_shared_variables() {
    let mut interner = Interner::new();
    let g = interner.intern_functor("g", 2);
    let mut wvm = machine();
    let x = wvm.push_variable().unwrap();
    let s = wvm.push_structure(g).unwrap();
    wvm.push(x.clone()).unwrap();
    wvm.push(x).unwrap();

    let mut asked = Vec::new();
    let term = wvm.read_term(&s, &interner, &mut |address| {
      asked.push(address);
      Term::Integer(address as i64 + 100)
    }).unwrap();
    assert_eq!(asked, vec![0]);
    assert_eq!(term, Term::structure(g, vec![Term::Integer(100), Term::Integer(100)]));
    assert_eq!(interner.functor(g), Some(&Functor::new("g", 2)));
  }

  #[test]
  fn heap_limit_is_an_internal_error() {
    let mut wvm = WVM::new(MachineConfig::default().with_heap_limit(2));
    wvm.push_variable().unwrap();
    wvm.push_variable().unwrap();
    assert_eq!(wvm.push_variable(), Err(MachineError::HeapOverflow(2)));
  }

  #[test]
  fn cyclic_terms_are_too_deep_to_read() {
    let mut interner = Interner::new();
    let f = interner.intern_functor("f", 1);
    let mut wvm = WVM::new(MachineConfig::default().with_max_term_depth(1000));
    let x = wvm.push_variable().unwrap();
    let s = wvm.push_structure(f).unwrap();
    wvm.push(x.clone()).unwrap();
    assert!(wvm.unify(x.clone(), s, &interner).unwrap());
    assert_eq!(wvm.read_term(&x, &interner, &mut |_| Term::nil()), Err(MachineError::TermDepth(1000)));
  }

  #[test]
  fn long_lists_read_back_without_recursion() {
    let interner = Interner::new();
    let mut wvm = machine();
    let mut list = Cell::Constant(Constant::Atom(NIL));
    for i in 0..100_000 {
      let cell = wvm.push_structure(CONS).unwrap();
      wvm.push(Cell::Constant(Constant::Integer(i))).unwrap();
      wvm.push(list).unwrap();
      list = cell;
    }
    let term = wvm.read_term(&list, &interner, &mut |_| Term::nil()).unwrap();
    assert_eq!(term.args()[0], Term::Integer(99_999));
    assert!(term.is_ground());
  }
}
