//! The abstract syntax type for programs and queries: terms and clauses.
//!
//! Terms are immutable trees except for variables, which carry a binding slot that the runtime
//! binds and frees while it reports solutions. Everything that inspects a term looks through
//! bindings first (`Term::value`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use ordered_float::OrderedFloat;

use crate::functor::{ArityType, FunctorId, CONS, NIL};
use crate::interner::InternerView;

/// The interned id of a variable name.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VarId(pub u32);

impl Display for VarId{
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "_V{}", self.0)
  }
}

/// A logic variable. Two occurrences of the same variable share one `Rc<Variable>`.
#[derive(Debug)]
pub struct Variable {
  pub id  : VarId,
  binding : RefCell<Option<Term>>,
}

pub type Var = Rc<Variable>;

impl Variable {
  pub fn new(id: VarId) -> Var {
    Rc::new(Variable{ id, binding: RefCell::new(None) })
  }

  pub fn is_bound(&self) -> bool {
    self.binding.borrow().is_some()
  }

  pub fn binding(&self) -> Option<Term> {
    self.binding.borrow().clone()
  }

  /**
    Binds the variable to `value`. Binding a variable to a term that dereferences to the variable
    itself would create a cycle, so it is refused and `false` is returned.

    Only the runtime binds variables, when it reports a solution.
  */
  pub(crate) fn bind(self: &Rc<Self>, value: Term) -> bool {
    if let Term::Variable(other) = value.value() {
      if Rc::ptr_eq(self, &other) {
        return false;
      }
    }
    *self.binding.borrow_mut() = Some(value);
    true
  }

  /// Resets the variable to unbound.
  pub(crate) fn free(&self) {
    *self.binding.borrow_mut() = None;
  }
}

/// Characters that make up symbolic atoms such as `=..` or `\\+`.
pub(crate) const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

/// A compound term `f(t_1, …, t_n)` with `n > 0`.
#[derive(Debug)]
pub struct Structure {
  pub functor : FunctorId,
  pub args    : Vec<Term>,
}

impl Drop for Structure {
  // Long lists would otherwise be freed by one nested drop per cell.
  fn drop(&mut self) {
    let mut pending = std::mem::take(&mut self.args);
    while let Some(term) = pending.pop() {
      if let Term::Structure(shared) = term {
        if let Ok(mut structure) = Rc::try_unwrap(shared) {
          pending.append(&mut structure.args);
        }
      }
    }
  }
}

#[derive(Clone, Debug)]
pub enum Term {
  /// A functor of arity zero.
  Atom(FunctorId),
  Integer(i64),
  Float(OrderedFloat<f64>),
  Variable(Var),
  Structure(Rc<Structure>),
}

impl Term {

  // region Constructors

  pub fn atom(functor: FunctorId) -> Term {
    Term::Atom(functor)
  }

  pub fn float(value: f64) -> Term {
    Term::Float(OrderedFloat(value))
  }

  pub fn variable(id: VarId) -> Term {
    Term::Variable(Variable::new(id))
  }

  /// A structure with the given arguments, or an atom if there are none. The caller supplies a
  /// functor whose arity matches `args.len()`.
  pub fn structure(functor: FunctorId, args: Vec<Term>) -> Term {
    if args.is_empty() {
      Term::Atom(functor)
    } else {
      Term::Structure(Rc::new(Structure{ functor, args }))
    }
  }

  pub fn nil() -> Term {
    Term::Atom(NIL)
  }

  pub fn cons(head: Term, tail: Term) -> Term {
    Term::structure(CONS, vec![head, tail])
  }

  /// Builds `[items… | tail]`.
  pub fn list(items: Vec<Term>, tail: Term) -> Term {
    items.into_iter().rev().fold(tail, |tail, head| Term::cons(head, tail))
  }

  // endregion

  /**
    Dereferences the term: returns the term itself if it is not a variable, otherwise chases the
    chain of bindings until reaching a non-variable or an unbound variable.
  */
  pub fn value(&self) -> Term {
    let mut current = self.clone();
    loop {
      let next = match &current {
        Term::Variable(var) => var.binding(),
        _                   => None
      };
      match next {
        Some(term) => current = term,
        None       => return current,
      }
    }
  }

  // region Predicates over the dereferenced value

  pub fn is_var(&self) -> bool {
    matches!(self.value(), Term::Variable(_))
  }

  pub fn is_atom(&self) -> bool {
    matches!(self.value(), Term::Atom(_))
  }

  pub fn is_number(&self) -> bool {
    matches!(self.value(), Term::Integer(_) | Term::Float(_))
  }

  /// Atoms are functors of arity zero, so both atoms and structures are functors.
  pub fn is_functor(&self) -> bool {
    matches!(self.value(), Term::Atom(_) | Term::Structure(_))
  }

  /// A structure with at least one argument. Atoms are not compound.
  pub fn is_compound(&self) -> bool {
    matches!(self.value(), Term::Structure(_))
  }

  pub fn is_ground(&self) -> bool {
    let mut pending = vec![self.clone()];
    while let Some(term) = pending.pop() {
      match term.value() {
        Term::Variable(_)          => return false,
        Term::Structure(structure) => pending.extend(structure.args.iter().cloned()),
        _                          => {}
      }
    }
    true
  }

  // endregion

  /// The functor id and arity of an atom or structure.
  pub fn functor(&self) -> Option<(FunctorId, ArityType)> {
    match self.value() {
      Term::Atom(functor)        => Some((functor, 0)),
      Term::Structure(structure) => Some((structure.functor, structure.args.len() as ArityType)),
      _                          => None
    }
  }

  /// The arguments of a structure; empty for every other kind of term.
  pub fn args(&self) -> Vec<Term> {
    match self.value() {
      Term::Structure(structure) => structure.args.clone(),
      _                          => Vec::new()
    }
  }

  /// Deep comparison of dereferenced values. Unbound variables are equal only to themselves.
  pub fn structural_eq(&self, other: &Term) -> bool {
    let mut pending = vec![(self.clone(), other.clone())];
    while let Some((a, b)) = pending.pop() {
      let equal =
        match (a.value(), b.value()) {
          (Term::Atom(a), Term::Atom(b))         => a == b,
          (Term::Integer(a), Term::Integer(b))   => a == b,
          (Term::Float(a), Term::Float(b))       => a == b,
          (Term::Variable(a), Term::Variable(b)) => Rc::ptr_eq(&a, &b),
          (Term::Structure(a), Term::Structure(b)) => {
            if !Rc::ptr_eq(&a, &b) {
              if a.functor != b.functor || a.args.len() != b.args.len() {
                return false;
              }
              pending.extend(a.args.iter().cloned().zip(b.args.iter().cloned()));
            }
            true
          }
          _ => false
        };
      if !equal {
        return false;
      }
    }
    true
  }

  /**
    Produces a copy of the dereferenced term in which every unbound variable is replaced by a new,
    independent variable with the same id. Sharing is preserved: two occurrences of one variable
    become two occurrences of one new variable. Queries are copied this way before they are solved
    so that solving never disturbs the caller's term.
  */
  pub fn fresh_copy(&self) -> Term {
    let mut renaming: HashMap<*const Variable, Var> = HashMap::new();
    let mut built: Vec<Term> = Vec::new();
    let mut work = vec![CopyStep::Visit(self.clone())];

    while let Some(step) = work.pop() {
      match step {
        CopyStep::Visit(term) => {
          match term.value() {
            Term::Variable(var) => {
              let fresh = renaming
                .entry(Rc::as_ptr(&var))
                .or_insert_with(|| Variable::new(var.id));
              built.push(Term::Variable(fresh.clone()));
            }
            Term::Structure(structure) => {
              work.push(CopyStep::Build(structure.functor, structure.args.len()));
              work.extend(structure.args.iter().rev().cloned().map(CopyStep::Visit));
            }
            other => built.push(other),
          }
        }
        CopyStep::Build(functor, arity) => {
          let args = built.split_off(built.len() - arity);
          built.push(Term::structure(functor, args));
        }
      }
    }

    built.pop().unwrap_or_else(Term::nil)
  }

  /// The distinct unbound variables of the term in order of first occurrence.
  pub fn variables(&self) -> Vec<Var> {
    let mut found: Vec<Var> = Vec::new();
    self.collect_variables(&mut found);
    found
  }

  pub(crate) fn collect_variables(&self, found: &mut Vec<Var>) {
    let mut pending = vec![self.clone()];
    while let Some(term) = pending.pop() {
      match term.value() {
        Term::Variable(var) => {
          if !found.iter().any(|seen| Rc::ptr_eq(seen, &var)) {
            found.push(var);
          }
        }
        Term::Structure(structure) => pending.extend(structure.args.iter().rev().cloned()),
        _ => {}
      }
    }
  }

  pub fn display<'a>(&'a self, interner: &'a dyn InternerView) -> TermDisplay<'a> {
    TermDisplay{ term: self, interner }
  }
}

/// A step of the explicit stack `fresh_copy` walks a term with.
enum CopyStep {
  Visit(Term),
  /// Replace the last `arity` copied terms by a structure over them.
  Build(FunctorId, usize),
}

impl PartialEq for Term {
  fn eq(&self, other: &Term) -> bool {
    self.structural_eq(other)
  }
}

// region Rendering

/**
  Renders a term with names looked up in an interner, e.g. `h(f(f(a)), [1, 2 | T])`. Atoms that
  would not read back as the same atom are quoted, as in `'hello world'`.
*/
pub struct TermDisplay<'a> {
  term     : &'a Term,
  interner : &'a dyn InternerView,
}

/// What is left to write of a term, innermost last.
enum Pending {
  Term(Term),
  /// The rest of a list after its first element.
  ListTail(Term),
  Text(&'static str),
}

impl<'a> TermDisplay<'a> {

  fn write_functor(&self, f: &mut Formatter<'_>, functor: FunctorId) -> std::fmt::Result {
    match self.interner.functor_name(functor) {
      Some(name) => write_atom(f, name),
      None       => write!(f, "{}", functor)
    }
  }

  fn write_term(&self, f: &mut Formatter<'_>, term: &Term) -> std::fmt::Result {
    let mut pending = vec![Pending::Term(term.clone())];

    while let Some(item) = pending.pop() {
      match item {
        Pending::Text(text) => write!(f, "{}", text)?,

        Pending::ListTail(tail) => {
          match tail.value() {
            Term::Structure(cell) if cell.functor == CONS => {
              write!(f, ", ")?;
              pending.push(Pending::ListTail(cell.args[1].clone()));
              pending.push(Pending::Term(cell.args[0].clone()));
            }
            Term::Atom(NIL) => write!(f, "]")?,
            other => {
              write!(f, " | ")?;
              pending.push(Pending::Text("]"));
              pending.push(Pending::Term(other));
            }
          }
        }

        Pending::Term(term) => {
          match term.value() {
            Term::Atom(functor) => self.write_functor(f, functor)?,
            Term::Integer(i)    => write!(f, "{}", i)?,
            Term::Float(x)      => {
              if x.fract() == 0.0 && x.is_finite() {
                write!(f, "{:.1}", x.0)?
              } else {
                write!(f, "{}", x.0)?
              }
            }
            Term::Variable(var) => {
              match self.interner.variable_name(var.id) {
                Some(name) => write!(f, "{}", name)?,
                None       => write!(f, "{}", var.id)?
              }
            }
            Term::Structure(structure) if structure.functor == CONS => {
              write!(f, "[")?;
              pending.push(Pending::ListTail(structure.args[1].clone()));
              pending.push(Pending::Term(structure.args[0].clone()));
            }
            Term::Structure(structure) => {
              self.write_functor(f, structure.functor)?;
              write!(f, "(")?;
              pending.push(Pending::Text(")"));
              for (i, arg) in structure.args.iter().enumerate().rev() {
                pending.push(Pending::Term(arg.clone()));
                if i != 0 {
                  pending.push(Pending::Text(", "));
                }
              }
            }
          }
        }
      }
    }
    Ok(())
  }
}

/// Whether an atom reads back as itself without quotes.
fn is_plain_atom(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    None => false,
    Some(first) if first.is_lowercase() => chars.all(|c| c.is_alphanumeric() || c == '_'),
    Some(_) => {
      matches!(name, "[]" | "!" | ";" | "{}")
        || name.chars().all(|c| SYMBOL_CHARS.contains(c))
    }
  }
}

fn write_atom(f: &mut Formatter<'_>, name: &str) -> std::fmt::Result {
  if is_plain_atom(name) {
    return write!(f, "{}", name);
  }
  write!(f, "'")?;
  for c in name.chars() {
    match c {
      '\'' => write!(f, "\\'")?,
      '\\' => write!(f, "\\\\")?,
      '\n'  => write!(f, "\\n")?,
      '\t'  => write!(f, "\\t")?,
      other => write!(f, "{}", other)?,
    }
  }
  write!(f, "'")
}

impl<'a> Display for TermDisplay<'a> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    self.write_term(f, self.term)
  }
}

// endregion

// region Clauses

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClauseKind {
  /// `head.`
  Fact,
  /// `head :- goal_1, …, goal_n.`
  Rule,
  /// `?- goal_1, …, goal_n.`
  Query,
}

/// A head and a body of goals. Queries have no head; facts have an empty body.
#[derive(Clone, Debug)]
pub struct Clause {
  pub head : Option<Term>,
  pub body : Vec<Term>,
  pub kind : ClauseKind,
}

impl Clause {

  pub fn fact(head: Term) -> Clause {
    Clause{ head: Some(head), body: Vec::new(), kind: ClauseKind::Fact }
  }

  /// A rule with an empty body is a fact.
  pub fn rule(head: Term, body: Vec<Term>) -> Clause {
    let kind = if body.is_empty() { ClauseKind::Fact } else { ClauseKind::Rule };
    Clause{ head: Some(head), body, kind }
  }

  pub fn query(body: Vec<Term>) -> Clause {
    Clause{ head: None, body, kind: ClauseKind::Query }
  }

  /// The functor of the head, which names the predicate the clause belongs to.
  pub fn predicate(&self) -> Option<(FunctorId, ArityType)> {
    self.head.as_ref().and_then(Term::functor)
  }

  /// The distinct variables of the clause, head first, in order of first occurrence.
  pub fn variables(&self) -> Vec<Var> {
    let mut found = Vec::new();
    if let Some(head) = &self.head {
      head.collect_variables(&mut found);
    }
    for goal in self.body.iter() {
      goal.collect_variables(&mut found);
    }
    found
  }

  /// A copy of the clause with independent variables.
  pub fn fresh_copy(&self) -> Clause {
    // Copy head and body as one list so that sharing across goals survives the renaming.
    let parts: Vec<Term> = self.head.iter().chain(self.body.iter()).cloned().collect();
    let mut items = Vec::new();
    let mut rest = Term::list(parts, Term::nil()).fresh_copy();
    while let Some((CONS, 2)) = rest.functor() {
      let args = rest.args();
      items.push(args[0].clone());
      rest = args[1].clone();
    }
    let head = match self.head { Some(_) => Some(items.remove(0)), None => None };
    Clause{ head, body: items, kind: self.kind }
  }
}

// endregion
