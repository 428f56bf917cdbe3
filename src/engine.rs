/*!
  The resolution engine: the façade that owns an interner, a compiler, a code area and a machine,
  loads programs, and answers queries.

  Every engine is independent. Nothing is shared between engines, so several can coexist in one
  process. An engine starts out with the native predicates, `call/1`, `!/0` and the library
  definitions of the control constructs already loaded; none of them can be redefined.

  Loading is incremental. Clauses for a predicate that is already defined are appended to it, and
  the whole predicate is recompiled at the insertion point of the code area. A query is loaded the
  same way and its code is released again when its `Solutions` is dropped.
*/

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use tracing::debug;

use crate::address::Address;
use crate::bytecode::{listing_table, Instruction};
use crate::cell::{Cell, HeapAddress};
use crate::codearea::{CallPoint, CodeArea, CodeView};
use crate::compiler::{Compiler, Reader};
use crate::config::MachineConfig;
use crate::error::{CompileError, EngineError, MachineError};
use crate::functor::FunctorId;
use crate::interner::{Interner, InternerView};
use crate::library::{call_code, cut_code, meta_call_code, native_code, NativePredicate, LIBRARY_SOURCE};
use crate::term::{Clause, ClauseKind, Term, Var, VarId};
use crate::wvm::{Status, WVM};

pub struct ResolutionEngine {
  config        : MachineConfig,
  interner      : Interner,
  compiler      : Compiler,
  code          : CodeArea,
  machine       : WVM,
  /// The clauses of every user predicate, in the order they were loaded.
  program       : IndexMap<FunctorId, Vec<Clause>>,
  /// Predicates a program may not define.
  protected     : HashSet<FunctorId>,
  query_functor : FunctorId,
}

impl ResolutionEngine {

  pub fn new() -> Result<ResolutionEngine, EngineError> {
    ResolutionEngine::with_config(MachineConfig::default())
  }

  pub fn with_config(config: MachineConfig) -> Result<ResolutionEngine, EngineError> {
    let mut interner = Interner::new();
    let compiler = Compiler::new(&mut interner, &config);
    let query_functor = interner.intern_atom("$query");

    let mut engine = ResolutionEngine{
      config,
      interner,
      compiler,
      code      : CodeArea::new(config.code_capacity),
      machine   : WVM::new(config),
      program   : IndexMap::new(),
      protected : HashSet::new(),
      query_functor,
    };
    engine.bootstrap()?;
    Ok(engine)
  }

  fn bootstrap(&mut self) -> Result<(), EngineError> {
    for (functor, native) in NativePredicate::intern_all(&mut self.interner) {
      self.install(functor, native_code(native))?;
    }
    let call = self.compiler.builtins().call_functor();
    let dispatch = self.interner.intern_functor("$call", 2);
    self.install(call, call_code(dispatch))?;
    let meta_call = self.interner.intern_functor("$meta_call", 1);
    self.install(meta_call, meta_call_code())?;
    let cut = self.interner.intern_atom("!");
    self.install(cut, cut_code())?;

    self.consult(LIBRARY_SOURCE)?;
    self.protected.extend(self.program.drain(..).map(|(functor, _)| functor));
    self.protected.insert(meta_call);
    self.protected.extend(self.compiler.builtins().functors().copied());
    debug!(predicates = self.protected.len(), bytes = self.code.insertion_point(), "library loaded");
    Ok(())
  }

  fn install(&mut self, functor: FunctorId, instructions: Vec<Instruction>) -> Result<(), CompileError> {
    let call_point = self.code.load(functor, instructions)?;
    self.compiler.symbols_mut().set_call_point(call_point);
    Ok(())
  }

  pub fn config(&self) -> &MachineConfig {
    &self.config
  }

  pub fn interner(&self) -> &Interner {
    &self.interner
  }

  /// Maps code addresses back to predicates, for debuggers and listings.
  pub fn code_view(&self) -> &dyn CodeView {
    &self.code
  }

  pub fn code_area(&self) -> &CodeArea {
    &self.code
  }

  // region Loading

  /**
    Reads and loads program text. Queries and directives in the text are not run; they are returned
    in order so the caller can decide what to do with them.

    A clause with an error does not stop the rest of the text from loading. All errors of the text
    are returned together.
  */
  pub fn consult(&mut self, text: &str) -> Result<Vec<Clause>, EngineError> {
    let (clauses, mut errors) = Reader::new(&mut self.interner).read_clauses(text);
    let (queries, program): (Vec<Clause>, Vec<Clause>) =
      clauses.into_iter().partition(|clause| clause.kind == ClauseKind::Query);

    if let Err(EngineError::Compile(more)) = self.add_clauses(program) {
      errors.extend(more);
    }

    if errors.is_empty() {
      Ok(queries)
    } else {
      Err(EngineError::Compile(errors))
    }
  }

  /// Appends clauses to their predicates and reloads every predicate that changed.
  pub fn add_clauses(&mut self, clauses: Vec<Clause>) -> Result<(), EngineError> {
    let mut errors = Vec::new();
    let mut changed: Vec<FunctorId> = Vec::new();

    for clause in clauses {
      let functor =
        match clause.predicate() {
          Some((functor, _)) => functor,
          None => {
            let text = clause.head.as_ref().map_or_else(
              || "a query".to_string(),
              |head| head.display(&self.interner).to_string()
            );
            errors.push(CompileError::NotCallable(text));
            continue;
          }
        };
      if self.protected.contains(&functor) {
        errors.push(CompileError::BuiltInRedefinition(self.predicate_name(functor)));
        continue;
      }
      // Compiling the clause alone catches its errors before it joins the predicate.
      if let Err(error) = self.compiler.compile_clause(&clause, &self.interner) {
        errors.push(error);
        continue;
      }
      self.program.entry(functor).or_default().push(clause);
      if !changed.contains(&functor) {
        changed.push(functor);
      }
    }

    for functor in changed {
      if let Err(error) = self.reload(functor) {
        errors.push(error);
      }
    }
    errors.extend(self.compiler.end_scope(&self.code, &self.interner));

    if errors.is_empty() {
      Ok(())
    } else {
      Err(EngineError::Compile(errors))
    }
  }

  fn reload(&mut self, functor: FunctorId) -> Result<(), CompileError> {
    let clauses = self.program.get(&functor).map(Vec::as_slice).unwrap_or(&[]);
    let instructions = self.compiler.compile_predicate(functor, clauses, &self.interner)?;
    let call_point = self.code.load(functor, instructions)?;
    self.compiler.symbols_mut().set_call_point(call_point);
    debug!(predicate = %self.predicate_name(functor), clauses = clauses.len(), entry = call_point.entry, "predicate loaded");
    Ok(())
  }

  fn predicate_name(&self, functor: FunctorId) -> String {
    self.interner.functor(functor).map_or_else(|| functor.to_string(), |f| f.to_string())
  }

  // endregion

  // region Queries

  /// Reads and starts a query such as `member(X, [1, 2])`. The leading `?-` and the final full
  /// stop are optional.
  pub fn query(&mut self, text: &str) -> Result<Solutions<'_>, EngineError> {
    let query = Reader::new(&mut self.interner).read_query(text)?;
    self.query_clause(&query)
  }

  /**
    Starts a query. The query is copied first, so its variables are left untouched.

    The query's code lives at the insertion point of the code area for as long as the returned
    `Solutions` does, and is taken back when it is dropped.
  */
  pub fn query_clause(&mut self, query: &Clause) -> Result<Solutions<'_>, EngineError> {
    let query = query.fresh_copy();
    let compiled = self.compiler.compile_query(&query, &self.interner)?;
    let call_point = self.code.load(self.query_functor, compiled.code)?;
    debug!(entry = call_point.entry, length = call_point.length, "query loaded");

    self.machine.start(call_point.entry);
    Ok(Solutions{
      engine    : self,
      query,
      variables : compiled.variables,
      call_point,
      started   : false,
      done      : false,
    })
  }

  /**
    Reads the answer off the query environment after `halt`. The query variables are bound to
    their values just long enough to take an instantiated copy of the goals.
  */
  fn solution(&mut self, query: &Clause, variables: &[(Var, Address)]) -> Result<Solution, MachineError> {
    // An unbound variable is named after the first query variable that refers to it.
    let mut names: HashMap<HeapAddress, VarId> = HashMap::new();
    let mut cells = Vec::with_capacity(variables.len());
    for (var, address) in variables {
      let cell = self.machine.deref(&self.machine.permanent(*address)?);
      if let Cell::REF(heap_address) = cell {
        names.entry(heap_address).or_insert(var.id);
      }
      cells.push((var, cell));
    }

    let mut anonymous = Vec::new();
    for (_, cell) in cells.iter() {
      self.machine.read_term(cell, &self.interner, &mut |address| {
        anonymous.push(address);
        Term::nil()
      })?;
    }
    for address in anonymous {
      let interner = &mut self.interner;
      names.entry(address).or_insert_with(|| interner.intern_variable(&format!("_G{}", address)));
    }

    let mut bindings = IndexMap::new();
    let mut values = Vec::with_capacity(cells.len());
    for (var, cell) in cells {
      let name =
        match self.interner.variable_name(var.id) {
          Some(name) => name.to_string(),
          None       => var.id.to_string(),
        };
      let term = self.machine.read_term(&cell, &self.interner, &mut |address| {
        names.get(&address).map_or_else(Term::nil, |id| Term::variable(*id))
      })?;
      let unbound_self = matches!(cell, Cell::REF(address) if names.get(&address) == Some(&var.id));
      if unbound_self {
        continue;
      }
      values.push((var, term.clone()));
      if !name.starts_with('_') {
        let text = term.display(&self.interner).to_string();
        bindings.insert(name, (term, text));
      }
    }

    for (var, term) in values.iter() {
      var.bind(term.clone());
    }
    let goals = query.body.iter().map(Term::fresh_copy).collect();
    for (var, _) in values {
      var.free();
    }

    Ok(Solution{ bindings, goals })
  }

  // endregion

  /// The listing of all code loaded so far.
  pub fn disassemble(&self) -> Result<String, EngineError> {
    let listing = self.code.disassemble(Some(&self.interner)).map_err(MachineError::from)?;
    Ok(listing_table(&listing).to_string())
  }

  /// The machine, e.g. to inspect its registers after a solution.
  pub fn machine(&self) -> &WVM {
    &self.machine
  }
}

/// The solutions of a query, computed one at a time as the iterator advances.
pub struct Solutions<'e> {
  engine     : &'e mut ResolutionEngine,
  query      : Clause,
  variables  : Vec<(Var, Address)>,
  call_point : CallPoint,
  started    : bool,
  done       : bool,
}

impl<'e> Drop for Solutions<'e> {
  fn drop(&mut self) {
    if self.engine.code.release(&self.call_point) {
      debug!(entry = self.call_point.entry, "query released");
    }
  }
}

impl<'e> Iterator for Solutions<'e> {
  type Item = Result<Solution, MachineError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let engine = &mut *self.engine;
    let status =
      if self.started {
        engine.machine.resume(&engine.code, &engine.interner)
      } else {
        self.started = true;
        engine.machine.run(&engine.code, &engine.interner)
      };

    match status {
      Ok(Status::Succeeded) => {
        let solution = engine.solution(&self.query, &self.variables);
        if solution.is_err() {
          self.done = true;
        }
        Some(solution)
      }
      Ok(_) => {
        self.done = true;
        None
      }
      Err(error) => {
        self.done = true;
        Some(Err(error))
      }
    }
  }
}

/// One answer to a query: the value of every named query variable.
#[derive(Clone, Debug, Default)]
pub struct Solution {
  bindings : IndexMap<String, (Term, String)>,
  /// The goals of the query with the answer substituted.
  goals    : Vec<Term>,
}

impl Solution {

  pub fn get(&self, name: &str) -> Option<&Term> {
    self.bindings.get(name).map(|(term, _)| term)
  }

  /// The rendered value of a variable, e.g. `[1, 2 | T]`.
  pub fn text(&self, name: &str) -> Option<&str> {
    self.bindings.get(name).map(|(_, text)| text.as_str())
  }

  pub fn texts(&self) -> BTreeMap<String, String> {
    self.bindings
        .iter()
        .map(|(name, (_, text))| (name.clone(), text.clone()))
        .collect()
  }

  pub fn goals(&self) -> &[Term] {
    &self.goals
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
    self.bindings.iter().map(|(name, (term, _))| (name.as_str(), term))
  }

  pub fn len(&self) -> usize {
    self.bindings.len()
  }

  /// A query without named variables has empty solutions.
  pub fn is_empty(&self) -> bool {
    self.bindings.is_empty()
  }
}

impl Display for Solution {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    if self.bindings.is_empty() {
      return write!(f, "true");
    }
    let lines: Vec<String> =
      self.bindings
          .iter()
          .map(|(name, (_, text))| format!("{} = {}", name, text))
          .collect();
    write!(f, "{}", lines.join("\n"))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn the_library_is_loaded_and_protected() {
    let mut engine = ResolutionEngine::new().unwrap();
    let call = engine.interner().lookup_functor("call", 1).unwrap();
    let disjunction = engine.interner().lookup_functor(";", 2).unwrap();
    assert!(engine.code_area().is_defined(call));
    assert!(engine.code_area().is_defined(disjunction));

    match engine.consult("append([], L, L).\ntrue.") {
      Err(EngineError::Compile(errors)) => {
        assert_eq!(errors, vec![CompileError::BuiltInRedefinition("true/0".to_string())]);
      }
      other => panic!("expected a redefinition error, got {:?}", other.map(|queries| queries.len())),
    }
    let append = engine.interner().lookup_functor("append", 3).unwrap();
    assert!(engine.code_area().is_defined(append));
  }

  #[test]
  fn unbound_variables_are_named_after_query_variables() {
    let mut engine = ResolutionEngine::new().unwrap();
    engine.consult("same(X, X).\npair(f(_, _)).").unwrap();

    let solution = engine.query("same(A, B)").unwrap().next().unwrap().unwrap();
    assert_eq!(solution.to_string(), "B = A");
    assert_eq!(solution.goals()[0].display(engine.interner()).to_string(), "same(A, A)");

    let solution = engine.query("pair(P)").unwrap().next().unwrap().unwrap();
    let text = solution.text("P").unwrap().to_string();
    assert!(text.starts_with("f(_G"), "{}", text);
  }

  #[test]
  fn queries_without_variables_print_true() {
    let mut engine = ResolutionEngine::new().unwrap();
    engine.consult("ready.").unwrap();
    let solutions: Vec<String> =
      engine.query("?- ready.").unwrap().map(|solution| solution.unwrap().to_string()).collect();
    assert_eq!(solutions, vec!["true".to_string()]);
  }

  #[test]
  fn deterministic_queries_leave_no_choice_points() {
    let mut engine = ResolutionEngine::new().unwrap();
    engine.consult("len([], 0).\nlen([_ | T], N) :- len(T, M), N is M + 1.").unwrap();
    let solution = engine.query("len([a, b, c], N)").unwrap().next().unwrap().unwrap();
    assert_eq!(solution.text("N"), Some("3"));
    assert_eq!(engine.machine().choice_point_count(), 0);
  }

  #[test]
  fn control_dispatch_is_protected() {
    let mut engine = ResolutionEngine::new().unwrap();
    match engine.consult("'$call'(x, y).") {
      Err(EngineError::Compile(errors)) => {
        assert_eq!(errors, vec![CompileError::BuiltInRedefinition("$call/2".to_string())]);
      }
      other => panic!("expected a redefinition error, got {:?}", other.map(|queries| queries.len())),
    }
  }

  #[test]
  fn query_code_is_released_with_its_solutions() {
    let mut engine = ResolutionEngine::new().unwrap();
    engine.consult("p(1).\np(2).").unwrap();
    let before = engine.code_area().insertion_point();
    {
      let mut solutions = engine.query("p(X)").unwrap();
      assert!(solutions.next().is_some());
    }
    assert_eq!(engine.code_area().insertion_point(), before);
    assert!(!engine.code_area().is_defined(engine.query_functor));
  }

  #[test]
  fn consult_returns_directives() {
    let mut engine = ResolutionEngine::new().unwrap();
    let queries = engine.consult("p(1).\n:- p(X).\n?- p(1).").unwrap();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|query| query.kind == ClauseKind::Query));
  }
}
