/*!
  Compiles clauses, predicates and queries to instructions.

  The pipeline for a predicate is this:
  ```text
  `Clause`s -> [`BuiltIns::transform_body`] -> `Goal`s -> [`Variables`] -> allocation ->⋯

  ⋯-> head and body code -> [`Assembler`] -> instructions with offsets from 0
  ```
  and `CodeArea::load` relocates the result into code memory.

  A clause whose flattened body holds only calls and natives is compiled the classic way: an
  environment only if some call is not the last goal, temporaries in `X` registers numbered above
  every argument register the clause touches, permanent variables from chunk analysis, and last
  call optimisation. A clause with a top-level cut, disjunction, if-then or negation always gets an
  environment with every variable in it, and its control constructs are compiled inline:

  ```text
  ( A ; B )          try_me_else Lelse; A; jump Lend; Lelse: trust_me; B; Lend:
  ( C -> T ; E )     mark_choice Yk; try_me_else Lelse; C; cut Yk; T; jump Lend;
                     Lelse: trust_me; E; Lend:
  ( C -> T )         mark_choice Yk; C; cut Yk; T
  \+ G               mark_choice Yk; try_me_else Lok; G; cut Yk; fail; Lok: trust_me
  !                  cut Ycut, where get_level Ycut follows allocate
  ```

  A call in tail position, which may sit inside a branch, becomes `deallocate; execute`, and a
  branch that ends that way needs no `jump`. Registers that held a nested structure are reused once
  the structure has been consumed.
*/

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::address::Address;
use crate::bytecode::{Assembler, CodeAddress, Constant, Instruction, FAIL_ADDRESS};
use crate::codearea::CodeArea;
use crate::config::MachineConfig;
use crate::error::CompileError;
use crate::functor::FunctorId;
use crate::interner::{Interner, InternerView};
use crate::symboltable::SymbolTable;
use crate::term::{Clause, Term, Var, VarId};
use super::builtins::{BuiltInKind, BuiltIns, Goal};
use super::variables::{Lifetime, Variables};

/// The highest register or slot number an instruction can encode.
const MAX_REGISTER: usize = u8::MAX as usize;

/// A compiled query: its code and the environment slot of each query variable.
#[derive(Debug)]
pub struct CompiledQuery {
  pub code      : Vec<Instruction>,
  pub variables : Vec<(Var, Address)>,
}

/// Key of a first-argument index table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
enum IndexKey {
  Constant(Constant),
  Structure(FunctorId),
}

pub struct Compiler {
  builtins   : BuiltIns,
  symbols    : SymbolTable,
  /// Predicates called by code compiled since the last `end_scope`.
  referenced : IndexSet<FunctorId>,
  indexing   : bool,
}

impl Compiler {

  pub fn new(interner: &mut Interner, config: &MachineConfig) -> Compiler {
    Compiler{
      builtins   : BuiltIns::new(interner),
      symbols    : SymbolTable::new(),
      referenced : IndexSet::new(),
      indexing   : config.first_argument_indexing,
    }
  }

  pub fn builtins(&self) -> &BuiltIns {
    &self.builtins
  }

  pub fn symbols(&self) -> &SymbolTable {
    &self.symbols
  }

  pub fn symbols_mut(&mut self) -> &mut SymbolTable {
    &mut self.symbols
  }

  /// Compiles a single clause on its own, e.g. to check it before it joins its predicate.
  pub fn compile_clause(&mut self, clause: &Clause, interner: &dyn InternerView)
    -> Result<Vec<Instruction>, CompileError>
  {
    let mut assembler = Assembler::new();
    let called = self.compile_clause_into(&mut assembler, clause, "clause", interner)?;
    self.referenced.extend(called);
    Ok(assembler.finish())
  }

  /**
    Compiles all clauses of one predicate, in order, into one block of code. More than one clause
    gives a `try_me_else`/`retry_me_else`/`trust_me` chain, optionally preceded by a first-argument
    switch.
  */
  pub fn compile_predicate(&mut self, functor: FunctorId, clauses: &[Clause], interner: &dyn InternerView)
    -> Result<Vec<Instruction>, CompileError>
  {
    let name = predicate_name(functor, interner);
    let mut assembler = Assembler::new();
    let n = clauses.len();
    let bodies: Vec<CodeAddress> = (0..n).map(|_| assembler.new_label()).collect();
    let choices: Vec<CodeAddress> = (0..n).map(|_| assembler.new_label()).collect();

    if self.should_index(clauses) {
      self.emit_switch(&mut assembler, clauses, &bodies, choices[0])?;
    }

    let mut called = Vec::new();
    for (i, clause) in clauses.iter().enumerate() {
      if n > 1 {
        assembler.bind(choices[i]);
        if i == 0 {
          assembler.emit(Instruction::TryMeElse(choices[1]));
        } else if i + 1 < n {
          assembler.emit(Instruction::RetryMeElse(choices[i + 1]));
        } else {
          assembler.emit(Instruction::TrustMe);
        }
      }
      assembler.bind(bodies[i]);
      let scope = format!("{}#{}", name, i);
      called.extend(self.compile_clause_into(&mut assembler, clause, &scope, interner)?);
    }

    self.referenced.extend(called);
    debug!(predicate = %name, clauses = n, instructions = assembler.len(), "compiled predicate");
    Ok(assembler.finish())
  }

  /**
    Compiles a query. Every query variable lives in the query's environment, which is still in
    place when the code reaches `halt`, so the answer is read from the slots listed in the result.
  */
  pub fn compile_query(&mut self, query: &Clause, interner: &dyn InternerView)
    -> Result<CompiledQuery, CompileError>
  {
    let goals = self.builtins.transform_body(&query.body, interner)?;
    let mut assembler = Assembler::new();

    self.symbols.enter_scope("?-");
    let result = ClauseCompiler::new(&mut assembler, &mut self.symbols, interner, "query", Variables::all_permanent(None, &goals, true))
      .and_then(|mut compiler| compiler.compile_controlled(None, &goals, true));
    let variables: Vec<(Var, Address)> =
      query.variables()
           .into_iter()
           .filter_map(|var| self.symbols.allocation(var.id).map(|address| (var, address)))
           .collect();
    self.symbols.leave_scope();
    result?;

    Ok(CompiledQuery{ code: assembler.finish(), variables })
  }

  /**
    Ends a compilation scope: every predicate called by code compiled since the last call must now
    be defined in `code`. Returns one error per undefined predicate.
  */
  pub fn end_scope(&mut self, code: &CodeArea, interner: &dyn InternerView) -> Vec<CompileError> {
    let errors =
      self.referenced
          .iter()
          .filter(|functor| !code.is_defined(**functor))
          .map(|functor| CompileError::UnresolvedReference{ predicate: predicate_name(*functor, interner) })
          .collect();
    self.referenced.clear();
    errors
  }

  // region Clauses

  fn compile_clause_into(
    &mut self,
    assembler : &mut Assembler,
    clause    : &Clause,
    scope     : &str,
    interner  : &dyn InternerView
  ) -> Result<Vec<FunctorId>, CompileError> {
    let head = match &clause.head {
      Some(head) if head.is_functor() => head.value(),
      Some(head) => return Err(CompileError::NotCallable(head.display(interner).to_string())),
      None => return Err(CompileError::NotCallable("a query".to_string())),
    };
    let name = head.functor().map_or_else(String::new, |(functor, _)| predicate_name(functor, interner));
    let goals = self.builtins.transform_body(&clause.body, interner)?;
    let mut flat = Vec::new();
    flatten(&goals, &mut flat);
    let complex = flat.iter().any(|goal| goal.is_inline_control());

    self.symbols.enter_scope(scope);
    let result =
      if complex {
        let variables = Variables::all_permanent(Some(&head), &goals, false);
        ClauseCompiler::new(assembler, &mut self.symbols, interner, &name, variables).and_then(|mut compiler| {
          compiler.with_head_arity(&head);
          compiler.compile_controlled(Some(&head), &goals, false)?;
          Ok(compiler.called)
        })
      } else {
        let variables = Variables::chunked(Some(&head), &flat);
        ClauseCompiler::new(assembler, &mut self.symbols, interner, &name, variables).and_then(|mut compiler| {
          compiler.with_head_arity(&head);
          compiler.compile_chunked(&head, &flat)?;
          Ok(compiler.called)
        })
      };
    self.symbols.leave_scope();
    result
  }

  // endregion

  // region Indexing

  fn should_index(&self, clauses: &[Clause]) -> bool {
    self.indexing
      && clauses.len() > 1
      && clauses.iter().all(|clause| first_argument_key(clause).is_some())
  }

  fn emit_switch(
    &self,
    assembler : &mut Assembler,
    clauses   : &[Clause],
    bodies    : &[CodeAddress],
    chain     : CodeAddress
  ) -> Result<(), CompileError> {
    let mut groups: IndexMap<IndexKey, Vec<usize>> = IndexMap::new();
    for (i, clause) in clauses.iter().enumerate() {
      if let Some(key) = first_argument_key(clause) {
        groups.entry(key).or_default().push(i);
      }
    }

    let has_constants = groups.keys().any(|key| matches!(key, IndexKey::Constant(_)));
    let has_structures = groups.keys().any(|key| matches!(key, IndexKey::Structure(_)));
    let constant_label = if has_constants { assembler.new_label() } else { FAIL_ADDRESS };
    let structure_label = if has_structures { assembler.new_label() } else { FAIL_ADDRESS };
    assembler.emit(Instruction::SwitchOnTerm{ variable: chain, constant: constant_label, structure: structure_label });

    // Keys matched by several clauses get their own try/retry/trust block.
    let mut targets: IndexMap<IndexKey, CodeAddress> = IndexMap::new();
    let mut blocks: Vec<(CodeAddress, &Vec<usize>)> = Vec::new();
    for (key, members) in groups.iter() {
      if members.len() == 1 {
        targets.insert(*key, bodies[members[0]]);
      } else {
        let label = assembler.new_label();
        targets.insert(*key, label);
        blocks.push((label, members));
      }
    }

    if targets.len() > u16::MAX as usize {
      return Err(CompileError::Capacity{ what: "switch table", limit: u16::MAX as usize });
    }

    if has_constants {
      assembler.bind(constant_label);
      let table =
        targets.iter()
               .filter_map(|(key, target)| match key {
                 IndexKey::Constant(constant) => Some((*constant, *target)),
                 IndexKey::Structure(_)       => None,
               })
               .collect();
      assembler.emit(Instruction::SwitchOnConstant(table));
    }
    if has_structures {
      assembler.bind(structure_label);
      let table =
        targets.iter()
               .filter_map(|(key, target)| match key {
                 IndexKey::Structure(functor) => Some((*functor, *target)),
                 IndexKey::Constant(_)        => None,
               })
               .collect();
      assembler.emit(Instruction::SwitchOnStructure(table));
    }

    for (label, members) in blocks {
      assembler.bind(label);
      let last = members.len() - 1;
      for (position, clause) in members.iter().enumerate() {
        let instruction =
          match position {
            0                   => Instruction::Try(bodies[*clause]),
            p if p == last      => Instruction::Trust(bodies[*clause]),
            _                   => Instruction::Retry(bodies[*clause]),
          };
        assembler.emit(instruction);
      }
    }

    Ok(())
  }

  // endregion
}

fn predicate_name(functor: FunctorId, interner: &dyn InternerView) -> String {
  interner.functor(functor).map_or_else(|| functor.to_string(), |f| f.to_string())
}

/// Flattens top-level conjunctions into a list of goals.
fn flatten<'g>(goals: &'g [Goal], flat: &mut Vec<&'g Goal>) {
  for goal in goals {
    if goal.kind() == Some(BuiltInKind::Conjunction) && goal.is_top_level() {
      flatten(goal.sub_goals(), flat);
    } else {
      flat.push(goal);
    }
  }
}

fn constant_of(term: &Term) -> Option<Constant> {
  match term.value() {
    Term::Atom(functor) => Some(Constant::Atom(functor)),
    Term::Integer(i)    => Some(Constant::Integer(i)),
    Term::Float(x)      => Some(Constant::Float(x)),
    _                   => None,
  }
}

/// The index key of a clause's first argument, or `None` if it is a variable.
fn first_argument_key(clause: &Clause) -> Option<IndexKey> {
  let first = clause.head.as_ref()?.args().into_iter().next()?.value();
  match &first {
    Term::Variable(_)          => None,
    Term::Structure(structure) => Some(IndexKey::Structure(structure.functor)),
    other                      => constant_of(other).map(IndexKey::Constant),
  }
}

fn has_top_level_cut(goals: &[Goal]) -> bool {
  goals.iter().any(|goal| {
    goal.is_inline_control()
      && (goal.kind() == Some(BuiltInKind::Cut) || has_top_level_cut(goal.sub_goals()))
  })
}

/// The largest arity of a goal or any goal inside it.
fn goal_arity(goal: &Goal) -> usize {
  let own = goal.term().functor().map_or(0, |(_, arity)| arity as usize);
  goal.sub_goals().iter().map(goal_arity).fold(own, usize::max)
}

/// An item of a structure under construction or matching.
enum Operand {
  Void,
  Variable(VarId),
  Constant(Constant),
  /// A nested structure, held in the given register.
  Register(u8),
}

/// The state of compiling one clause or query.
struct ClauseCompiler<'a> {
  assembler : &'a mut Assembler,
  symbols   : &'a mut SymbolTable,
  interner  : &'a dyn InternerView,
  predicate : String,
  variables : Variables,
  next_temp : usize,
  /// Temporaries whose contents have been consumed.
  free_temp : Vec<u8>,
  next_slot : usize,
  cut_slot  : Option<Address>,
  called    : Vec<FunctorId>,
}

impl<'a> ClauseCompiler<'a> {

  fn new(
    assembler : &'a mut Assembler,
    symbols   : &'a mut SymbolTable,
    interner  : &'a dyn InternerView,
    predicate : &str,
    variables : Variables
  ) -> Result<ClauseCompiler<'a>, CompileError> {
    let mut compiler = ClauseCompiler{
      assembler,
      symbols,
      interner,
      predicate : predicate.to_string(),
      variables,
      next_temp : 1,
      free_temp : Vec::new(),
      next_slot : 1,
      cut_slot  : None,
      called    : Vec::new(),
    };
    for id in compiler.variables.permanent() {
      let slot = compiler.fresh_slot()?;
      compiler.symbols.set_allocation(id, slot);
    }
    Ok(compiler)
  }

  fn with_head_arity(&mut self, head: &Term) {
    let arity = head.functor().map_or(0, |(_, arity)| arity as usize);
    self.next_temp = self.next_temp.max(arity + 1);
  }

  fn overflow(&self) -> CompileError {
    CompileError::RegisterOverflow{ predicate: self.predicate.clone() }
  }

  /// Keeps temporaries clear of every argument register the goals use.
  fn reserve_arguments<'g, I>(&mut self, goals: I)
    where I: IntoIterator<Item = &'g Goal>
  {
    let arity = goals.into_iter().map(goal_arity).max().unwrap_or(0);
    self.next_temp = self.next_temp.max(arity + 1);
  }

  fn temp(&mut self) -> Result<u8, CompileError> {
    if let Some(register) = self.free_temp.pop() {
      return Ok(register);
    }
    if self.next_temp > MAX_REGISTER {
      return Err(self.overflow());
    }
    self.next_temp += 1;
    Ok((self.next_temp - 1) as u8)
  }

  /// Hands a temporary back once nothing reads it any more.
  fn release(&mut self, register: u8) {
    self.free_temp.push(register);
  }

  fn fresh_slot(&mut self) -> Result<Address, CompileError> {
    if self.next_slot > MAX_REGISTER {
      return Err(self.overflow());
    }
    self.next_slot += 1;
    Ok(Address::Stack((self.next_slot - 1) as u8))
  }

  fn slot_count(&self) -> u8 {
    (self.next_slot - 1) as u8
  }

  fn argument(&self, i: usize) -> Result<u8, CompileError> {
    if i > MAX_REGISTER {
      return Err(self.overflow());
    }
    Ok(i as u8)
  }

  /**
    The address of a variable at this occurrence and whether it is the first occurrence, or `None`
    for a void variable. Temporaries get their register on first occurrence.
  */
  fn variable(&mut self, id: VarId) -> Result<Option<(Address, bool)>, CompileError> {
    let lifetime = self.variables.lifetime(id);
    if lifetime == Lifetime::Void {
      return Ok(None);
    }
    let first = self.variables.first_occurrence(id);
    if first && lifetime == Lifetime::Temporary {
      let register = Address::Register(self.temp()?);
      self.symbols.set_allocation(id, register);
    }
    match self.symbols.allocation(id) {
      Some(address) => Ok(Some((address, first))),
      None          => Err(self.overflow()),
    }
  }

  fn emit(&mut self, instruction: Instruction) -> usize {
    self.assembler.emit(instruction)
  }

  // region Bodies

  /// A clause without inline control.
  fn compile_chunked(&mut self, head: &Term, goals: &[&Goal]) -> Result<(), CompileError> {
    self.reserve_arguments(goals.iter().copied());

    let calls: Vec<usize> =
      goals.iter()
           .enumerate()
           .filter(|(_, goal)| goal.native().is_none())
           .map(|(i, _)| i)
           .collect();
    let needs_environment = calls.iter().any(|i| i + 1 < goals.len());

    if needs_environment {
      let count = self.slot_count();
      self.emit(Instruction::Allocate(count));
    }
    self.compile_head(head)?;

    if goals.is_empty() {
      self.emit(Instruction::Proceed);
      return Ok(());
    }

    for (i, goal) in goals.iter().enumerate() {
      let last = i + 1 == goals.len();
      match goal.native() {
        Some(native) => {
          self.compile_arguments(goal.term())?;
          self.emit(Instruction::CallBuiltin(native));
          if last {
            if needs_environment {
              self.emit(Instruction::Deallocate);
            }
            self.emit(Instruction::Proceed);
          }
        }
        None => {
          let callee = self.callee(goal.term())?;
          self.compile_arguments(goal.term())?;
          if last {
            if needs_environment {
              self.emit(Instruction::Deallocate);
            }
            self.emit(Instruction::Execute(callee));
          } else {
            self.emit(Instruction::Call(callee));
          }
        }
      }
    }
    Ok(())
  }

  /// A clause with inline control, or a query when `head` is `None`.
  fn compile_controlled(&mut self, head: Option<&Term>, goals: &[Goal], query: bool) -> Result<(), CompileError> {
    self.reserve_arguments(goals);
    let allocate = self.emit(Instruction::Allocate(0));
    if has_top_level_cut(goals) {
      let slot = self.fresh_slot()?;
      self.cut_slot = Some(slot);
      self.emit(Instruction::GetLevel(slot));
    }
    if let Some(head) = head {
      self.compile_head(head)?;
    }

    // Variables first met in the body are created up front, so every later occurrence, in
    // whichever branch, is a value occurrence.
    let scratch = self.temp()?;
    for id in self.variables.permanent() {
      if self.variables.first_occurrence(id) {
        if let Some(register) = self.symbols.allocation(id) {
          self.emit(Instruction::PutVariable{ register, argument: scratch });
        }
      }
    }

    let mut exited = false;
    for (i, goal) in goals.iter().enumerate() {
      let tail = !query && i + 1 == goals.len();
      exited = self.compile_goal(goal, tail)?;
    }

    if query {
      self.emit(Instruction::Halt);
    } else if !exited {
      self.emit(Instruction::Deallocate);
      self.emit(Instruction::Proceed);
    }
    let count = self.slot_count();
    self.assembler.patch(allocate, Instruction::Allocate(count));
    Ok(())
  }

  /**
    Compiles one goal. A call in `tail` position leaves the clause with `deallocate; execute`.
    Returns whether every path through the goal has left the clause that way.
  */
  fn compile_goal(&mut self, goal: &Goal, tail: bool) -> Result<bool, CompileError> {
    if !goal.is_inline_control() {
      return match goal.native() {
        Some(native) => {
          self.compile_arguments(goal.term())?;
          self.emit(Instruction::CallBuiltin(native));
          Ok(false)
        }
        None => {
          let callee = self.callee(goal.term())?;
          self.compile_arguments(goal.term())?;
          if tail {
            self.emit(Instruction::Deallocate);
            self.emit(Instruction::Execute(callee));
          } else {
            self.emit(Instruction::Call(callee));
          }
          Ok(tail)
        }
      };
    }

    let parts = goal.sub_goals();
    match goal.kind() {
      Some(BuiltInKind::Conjunction) => {
        self.compile_goal(&parts[0], false)?;
        self.compile_goal(&parts[1], tail)
      }

      Some(BuiltInKind::Cut) => {
        let slot = self.cut_slot.ok_or_else(|| self.overflow())?;
        self.emit(Instruction::Cut(slot));
        Ok(false)
      }

      Some(BuiltInKind::Disjunction) => {
        let left = &parts[0];
        if left.kind() == Some(BuiltInKind::IfThen) && left.is_inline_control() {
          let branches = left.sub_goals();
          self.compile_if_then_else(&branches[0], &branches[1], Some(&parts[1]), tail)
        } else {
          let else_label = self.assembler.new_label();
          let end_label = self.assembler.new_label();
          self.emit(Instruction::TryMeElse(else_label));
          let left_exited = self.compile_goal(left, tail)?;
          if !left_exited {
            self.emit(Instruction::Jump(end_label));
          }
          self.assembler.bind(else_label);
          self.emit(Instruction::TrustMe);
          let right_exited = self.compile_goal(&parts[1], tail)?;
          self.assembler.bind(end_label);
          Ok(left_exited && right_exited)
        }
      }

      Some(BuiltInKind::IfThen) => self.compile_if_then_else(&parts[0], &parts[1], None, tail),

      Some(BuiltInKind::Negation) => {
        let mark = self.fresh_slot()?;
        let ok_label = self.assembler.new_label();
        self.emit(Instruction::MarkChoice(mark));
        self.emit(Instruction::TryMeElse(ok_label));
        self.compile_goal(&parts[0], false)?;
        self.emit(Instruction::Cut(mark));
        self.emit(Instruction::Fail);
        self.assembler.bind(ok_label);
        self.emit(Instruction::TrustMe);
        Ok(false)
      }

      _ => Ok(false),
    }
  }

  fn compile_if_then_else(&mut self, condition: &Goal, then: &Goal, otherwise: Option<&Goal>, tail: bool)
    -> Result<bool, CompileError>
  {
    let mark = self.fresh_slot()?;
    self.emit(Instruction::MarkChoice(mark));
    match otherwise {
      Some(otherwise) => {
        let else_label = self.assembler.new_label();
        let end_label = self.assembler.new_label();
        self.emit(Instruction::TryMeElse(else_label));
        self.compile_goal(condition, false)?;
        self.emit(Instruction::Cut(mark));
        let then_exited = self.compile_goal(then, tail)?;
        if !then_exited {
          self.emit(Instruction::Jump(end_label));
        }
        self.assembler.bind(else_label);
        self.emit(Instruction::TrustMe);
        let else_exited = self.compile_goal(otherwise, tail)?;
        self.assembler.bind(end_label);
        Ok(then_exited && else_exited)
      }
      None => {
        self.compile_goal(condition, false)?;
        self.emit(Instruction::Cut(mark));
        self.compile_goal(then, tail)
      }
    }
  }

  fn callee(&mut self, goal: &Term) -> Result<FunctorId, CompileError> {
    match goal.functor() {
      Some((functor, _)) => {
        self.called.push(functor);
        Ok(functor)
      }
      None => Err(CompileError::NotCallable(goal.display(self.interner).to_string())),
    }
  }

  // endregion

  // region Heads

  fn compile_head(&mut self, head: &Term) -> Result<(), CompileError> {
    for (i, arg) in head.args().iter().enumerate() {
      let argument = self.argument(i + 1)?;
      match arg.value() {
        Term::Variable(var) => {
          match self.variable(var.id)? {
            None                    => {}
            Some((register, true))  => { self.emit(Instruction::GetVariable{ register, argument }); }
            Some((register, false)) => { self.emit(Instruction::GetValue{ register, argument }); }
          }
        }
        Term::Structure(structure) => {
          let mut pending = VecDeque::new();
          pending.push_back((argument, structure));
          while let Some((register, structure)) = pending.pop_front() {
            self.emit(Instruction::GetStructure{ functor: structure.functor, argument: register });
            if register != argument {
              self.release(register);
            }
            let mut operands = Vec::with_capacity(structure.args.len());
            for sub in structure.args.iter() {
              let operand =
                match sub.value() {
                  Term::Structure(nested) => {
                    let register = self.temp()?;
                    pending.push_back((register, nested));
                    Operand::Register(register)
                  }
                  other => self.operand(&other),
                };
              operands.push(operand);
            }
            self.emit_operands(operands, true)?;
          }
        }
        other => {
          if let Some(constant) = constant_of(&other) {
            self.emit(Instruction::GetConstant{ constant, argument });
          }
        }
      }
    }
    Ok(())
  }

  // endregion

  // region Arguments

  fn compile_arguments(&mut self, goal: &Term) -> Result<(), CompileError> {
    for (i, arg) in goal.args().iter().enumerate() {
      let argument = self.argument(i + 1)?;
      match arg.value() {
        Term::Variable(var) => {
          match self.variable(var.id)? {
            None => {
              let scratch = self.temp()?;
              self.emit(Instruction::PutVariable{ register: Address::Register(scratch), argument });
              self.release(scratch);
            }
            Some((register, true))  => { self.emit(Instruction::PutVariable{ register, argument }); }
            Some((register, false)) => { self.emit(Instruction::PutValue{ register, argument }); }
          }
        }
        Term::Structure(structure) => {
          self.build_structure(structure.functor, &structure.args, Some(argument))?;
        }
        other => {
          if let Some(constant) = constant_of(&other) {
            self.emit(Instruction::PutConstant{ constant, argument });
          }
        }
      }
    }
    Ok(())
  }

  /**
    Builds a structure into register `target`, or into a fresh temporary, and returns the register.
    Nested structures are built first and their registers are released once the parent refers to
    them, so a long list needs only two temporaries.
  */
  fn build_structure(&mut self, functor: FunctorId, args: &[Term], target: Option<u8>) -> Result<u8, CompileError> {
    let mut nested = Vec::with_capacity(args.len());
    for arg in args {
      match arg.value() {
        Term::Structure(structure) => {
          let register = self.build_structure(structure.functor, &structure.args, None)?;
          nested.push(Some(register));
        }
        _ => nested.push(None),
      }
    }

    let target = match target {
      Some(register) => register,
      None           => self.temp()?,
    };
    self.emit(Instruction::PutStructure{ functor, argument: target });
    let operands: Vec<Operand> =
      args.iter()
          .zip(nested.iter())
          .map(|(arg, nested)| match nested {
            Some(register) => Operand::Register(*register),
            None           => self.operand(&arg.value()),
          })
          .collect();
    self.emit_operands(operands, false)?;
    for register in nested.into_iter().flatten() {
      self.release(register);
    }
    Ok(target)
  }

  fn operand(&self, term: &Term) -> Operand {
    match term {
      Term::Variable(var) if self.variables.lifetime(var.id) == Lifetime::Void => Operand::Void,
      Term::Variable(var) => Operand::Variable(var.id),
      other => constant_of(other).map_or(Operand::Void, Operand::Constant),
    }
  }

  /// Emits the `unify_*` (`head`) or `set_*` instructions for the arguments of a structure,
  /// merging runs of void variables.
  fn emit_operands(&mut self, operands: Vec<Operand>, head: bool) -> Result<(), CompileError> {
    let mut voids: usize = 0;
    for operand in operands {
      if let Operand::Void = operand {
        voids += 1;
        if voids == MAX_REGISTER {
          self.emit_voids(voids, head);
          voids = 0;
        }
        continue;
      }
      if voids > 0 {
        self.emit_voids(voids, head);
        voids = 0;
      }
      let instruction =
        match operand {
          Operand::Variable(id) => {
            match self.variable(id)? {
              Some((register, true))  => if head { Instruction::UnifyVariable(register) } else { Instruction::SetVariable(register) },
              Some((register, false)) => if head { Instruction::UnifyValue(register) } else { Instruction::SetValue(register) },
              None                    => if head { Instruction::UnifyVoid(1) } else { Instruction::SetVoid(1) },
            }
          }
          Operand::Constant(constant) => {
            if head { Instruction::UnifyConstant(constant) } else { Instruction::SetConstant(constant) }
          }
          Operand::Register(number) => {
            let register = Address::Register(number);
            if head { Instruction::UnifyVariable(register) } else { Instruction::SetValue(register) }
          }
          Operand::Void => continue,
        };
      self.emit(instruction);
    }
    if voids > 0 {
      self.emit_voids(voids, head);
    }
    Ok(())
  }

  fn emit_voids(&mut self, count: usize, head: bool) {
    let count = count as u8;
    if head {
      self.emit(Instruction::UnifyVoid(count));
    } else {
      self.emit(Instruction::SetVoid(count));
    }
  }

  // endregion
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::address::Address::{Register as X, Stack as Y};
  use crate::compiler::parser::Reader;
  use crate::library::NativePredicate;

  struct Fixture {
    interner : Interner,
    compiler : Compiler,
  }

  impl Fixture {
    fn new() -> Fixture {
      Fixture::with_config(MachineConfig::default())
    }

    fn with_config(config: MachineConfig) -> Fixture {
      let mut interner = Interner::new();
      let compiler = Compiler::new(&mut interner, &config);
      Fixture{ interner, compiler }
    }

    fn clauses(&mut self, text: &str) -> Vec<Clause> {
      Reader::new(&mut self.interner).read_program(text).unwrap()
    }

    fn functor(&mut self, name: &str, arity: u32) -> FunctorId {
      self.interner.intern_functor(name, arity)
    }

    fn predicate(&mut self, text: &str) -> Vec<Instruction> {
      let clauses = self.clauses(text);
      let functor = clauses[0].predicate().unwrap().0;
      self.compiler.compile_predicate(functor, &clauses, &self.interner).unwrap()
    }
  }

  #[test]
  fn facts_unify_their_arguments_and_proceed() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("parent(tom, bob).");
    let tom = fixture.functor("tom", 0);
    let bob = fixture.functor("bob", 0);
    assert_eq!(code, vec![
      Instruction::GetConstant{ constant: Constant::Atom(tom), argument: 1 },
      Instruction::GetConstant{ constant: Constant::Atom(bob), argument: 2 },
      Instruction::Proceed,
    ]);
  }

  #[test]
  fn rules_keep_shared_variables_in_the_environment() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("grandparent(X, Z) :- parent(X, Y), parent(Y, Z).");
    let parent = fixture.functor("parent", 2);
    assert_eq!(code, vec![
      Instruction::Allocate(2),
      Instruction::GetVariable{ register: X(3), argument: 1 },
      Instruction::GetVariable{ register: Y(1), argument: 2 },
      Instruction::PutValue{ register: X(3), argument: 1 },
      Instruction::PutVariable{ register: Y(2), argument: 2 },
      Instruction::Call(parent),
      Instruction::PutValue{ register: Y(2), argument: 1 },
      Instruction::PutValue{ register: Y(1), argument: 2 },
      Instruction::Deallocate,
      Instruction::Execute(parent),
    ]);
  }

  #[test]
  fn lists_in_heads_use_unify_instructions_and_voids() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("member(X, [X|_]).\nmember(X, [_|T]) :- member(X, T).");
    let member = fixture.functor("member", 2);
    let cons = crate::functor::CONS;
    // try_me_else is 5 bytes; the first clause is get_variable (4), get_structure (6),
    // unify_value (3), unify_void (2) and proceed (1).
    assert_eq!(code, vec![
      Instruction::TryMeElse(21),
      Instruction::GetVariable{ register: X(3), argument: 1 },
      Instruction::GetStructure{ functor: cons, argument: 2 },
      Instruction::UnifyValue(X(3)),
      Instruction::UnifyVoid(1),
      Instruction::Proceed,
      Instruction::TrustMe,
      Instruction::GetVariable{ register: X(3), argument: 1 },
      Instruction::GetStructure{ functor: cons, argument: 2 },
      Instruction::UnifyVoid(1),
      Instruction::UnifyVariable(X(4)),
      Instruction::PutValue{ register: X(3), argument: 1 },
      Instruction::PutValue{ register: X(4), argument: 2 },
      Instruction::Execute(member),
    ]);
  }

  #[test]
  fn natives_are_inlined_without_ending_a_chunk() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("succ(X, Y) :- Y is X + 1.");
    let plus = fixture.functor("+", 2);
    assert_eq!(code, vec![
      Instruction::GetVariable{ register: X(3), argument: 1 },
      Instruction::GetVariable{ register: X(4), argument: 2 },
      Instruction::PutValue{ register: X(4), argument: 1 },
      Instruction::PutStructure{ functor: plus, argument: 2 },
      Instruction::SetValue(X(3)),
      Instruction::SetConstant(Constant::Integer(1)),
      Instruction::CallBuiltin(NativePredicate::Is),
      Instruction::Proceed,
    ]);
  }

  #[test]
  fn constant_first_arguments_get_a_switch() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("colour(red).\ncolour(green).\ncolour(red).");
    match &code[0] {
      Instruction::SwitchOnTerm{ variable, constant, structure } => {
        assert_ne!(*variable, FAIL_ADDRESS);
        assert_ne!(*constant, FAIL_ADDRESS);
        assert_eq!(*structure, FAIL_ADDRESS);
      }
      other => panic!("expected switch_on_term, found {}", other),
    }
    match &code[1] {
      Instruction::SwitchOnConstant(table) => assert_eq!(table.len(), 2),
      other => panic!("expected switch_on_constant, found {}", other),
    }
    assert!(matches!(code[2], Instruction::Try(_)));
    assert!(matches!(code[3], Instruction::Trust(_)));
    assert!(matches!(code[4], Instruction::TryMeElse(_)));
  }

  #[test]
  fn indexing_can_be_switched_off() {
    let mut fixture = Fixture::with_config(MachineConfig::default().with_first_argument_indexing(false));
    let code = fixture.predicate("colour(red).\ncolour(green).");
    assert!(matches!(code[0], Instruction::TryMeElse(_)));
  }

  #[test]
  fn cut_saves_the_level_after_allocate() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("first(X) :- q(X), !.");
    let q = fixture.functor("q", 1);
    assert_eq!(code, vec![
      Instruction::Allocate(2),
      Instruction::GetLevel(Y(2)),
      Instruction::GetVariable{ register: Y(1), argument: 1 },
      Instruction::PutValue{ register: Y(1), argument: 1 },
      Instruction::Call(q),
      Instruction::Cut(Y(2)),
      Instruction::Deallocate,
      Instruction::Proceed,
    ]);
  }

  #[test]
  fn if_then_else_compiles_inline() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("max(X, Y, Z) :- ( X >= Y -> Z = X ; Z = Y ).");
    let operations: Vec<&'static str> = code.iter().map(|i| i.operation().mnemonic()).collect();
    assert_eq!(operations, vec![
      "allocate", "get_variable", "get_variable", "get_variable",
      "mark_choice", "try_me_else",
      "put_value", "put_value", "call_builtin", "cut",
      "put_value", "put_value", "call_builtin", "jump",
      "trust_me", "put_value", "put_value", "call_builtin",
      "deallocate", "proceed",
    ]);
    assert_eq!(code[0], Instruction::Allocate(4));
  }

  #[test]
  fn calls_in_tail_branches_are_last_calls() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("loop(I, N) :- ( I >= N -> done ; J is I + 1, loop(J, N) ).");
    let looped = fixture.functor("loop", 2);
    let done = fixture.functor("done", 0);
    let operations: Vec<&'static str> = code.iter().map(|i| i.operation().mnemonic()).collect();
    assert_eq!(operations, vec![
      "allocate", "get_variable", "get_variable", "put_variable",
      "mark_choice", "try_me_else",
      "put_value", "put_value", "call_builtin", "cut",
      "deallocate", "execute",
      "trust_me", "put_value", "put_structure", "set_value", "set_constant", "call_builtin",
      "put_value", "put_value", "deallocate", "execute",
    ]);
    assert_eq!(code[11], Instruction::Execute(done));
    assert_eq!(code.last(), Some(&Instruction::Execute(looped)));
  }

  #[test]
  fn long_lists_reuse_their_registers() {
    let mut fixture = Fixture::new();
    let items: Vec<String> = (0..600).map(|i| i.to_string()).collect();
    let text = format!("long([{}]).\nlong(X) :- p([{}], X).", items.join(", "), items.join(", "));
    let code = fixture.predicate(&text);
    let highest = code.iter().filter_map(|instruction| match instruction {
      Instruction::UnifyVariable(X(n)) | Instruction::SetValue(X(n)) => Some(*n),
      Instruction::PutStructure{ argument, .. } | Instruction::GetStructure{ argument, .. } => Some(*argument),
      _ => None,
    }).max();
    assert!(highest.map_or(false, |n| n <= 5), "{:?}", highest);
  }

  #[test]
  fn compilation_is_deterministic() {
    let text = "p(X, f(Y, g(X))) :- q(Y, [a, b | Z]), \\+ r(Z), (s(X) ; t(Y)).";
    let mut first = Fixture::new();
    let mut second = Fixture::new();
    assert_eq!(first.predicate(text), second.predicate(text));
  }

  #[test]
  fn queries_report_their_variable_slots() {
    let mut fixture = Fixture::new();
    let query = Reader::new(&mut fixture.interner).read_query("member(X, [1, 2]), Y = X.").unwrap();
    let compiled = fixture.compiler.compile_query(&query, &fixture.interner).unwrap();
    assert_eq!(compiled.variables.len(), 2);
    assert_eq!(compiled.variables[0].1, Y(1));
    assert_eq!(compiled.variables[1].1, Y(2));
    assert_eq!(compiled.code.last(), Some(&Instruction::Halt));
    assert_eq!(compiled.code[0], Instruction::Allocate(2));
  }

  #[test]
  fn unresolved_references_are_reported_at_the_end_of_scope() {
    let mut fixture = Fixture::new();
    let code = fixture.predicate("p :- q, r.");
    let mut area = CodeArea::new(1024);
    let r = fixture.functor("r", 0);
    area.load(r, vec![Instruction::Proceed]).unwrap();
    assert!(!code.is_empty());

    let errors = fixture.compiler.end_scope(&area, &fixture.interner);
    assert_eq!(errors, vec![CompileError::UnresolvedReference{ predicate: "q/0".to_string() }]);
    assert!(fixture.compiler.end_scope(&area, &fixture.interner).is_empty());
  }

  #[test]
  fn numbers_are_not_callable() {
    let mut fixture = Fixture::new();
    let clauses = fixture.clauses("p :- 3.");
    let result = fixture.compiler.compile_clause(&clauses[0], &fixture.interner);
    assert_eq!(result, Err(CompileError::NotCallable("3".to_string())));
  }
}
