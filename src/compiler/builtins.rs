/*!
  The built-in transform. A clause body arrives as a list of terms; this pass turns each goal into
  a `Goal`, recognising the control constructs (conjunction, disjunction, if-then, negation, cut,
  `call/1`) and the predicates with a native implementation, and marking which goals are
  top-level.

  A goal is top-level if it is a goal of the clause body itself, or a direct part of a top-level
  conjunction or disjunction, or the then or else branch of a top-level if-then-else. The
  condition of an if-then-else and the goal of a negation are not top-level. Only top-level
  control constructs are compiled to inline control instructions; any other occurrence is an
  ordinary call to the library predicate of the same name.

  Only terms in goal position are looked at. The arguments of an ordinary goal are data and stay
  as they are, so in `p :- q(!)` the `!` is just an atom.
*/

use std::collections::HashMap;

use crate::error::CompileError;
use crate::functor::FunctorId;
use crate::interner::{Interner, InternerView};
use crate::library::NativePredicate;
use crate::term::Term;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuiltInKind {
  Conjunction,
  Disjunction,
  IfThen,
  Negation,
  Cut,
  Call,
  Native(NativePredicate),
}

impl BuiltInKind {
  /// Whether the construct affects control flow, as opposed to a native test or a meta-call.
  pub fn is_control(&self) -> bool {
    matches!(
      self,
      BuiltInKind::Conjunction | BuiltInKind::Disjunction | BuiltInKind::IfThen
      | BuiltInKind::Negation | BuiltInKind::Cut
    )
  }
}

#[derive(Clone, Debug)]
pub enum Goal {
  /// A call to a user or library predicate.
  Predicate(Term),
  /// A recognised built-in wrapping the goal it was made from. `goals` holds the transformed
  /// sub-goals of a control construct, in order.
  BuiltIn {
    kind      : BuiltInKind,
    term      : Term,
    goals     : Vec<Goal>,
    top_level : bool,
  },
}

impl Goal {
  pub fn term(&self) -> &Term {
    match self {
      Goal::Predicate(term)        => term,
      Goal::BuiltIn{ term, .. }    => term,
    }
  }

  pub fn kind(&self) -> Option<BuiltInKind> {
    match self {
      Goal::Predicate(_)           => None,
      Goal::BuiltIn{ kind, .. }    => Some(*kind),
    }
  }

  pub fn is_top_level(&self) -> bool {
    match self {
      Goal::Predicate(_)             => false,
      Goal::BuiltIn{ top_level, .. } => *top_level,
    }
  }

  /// A control construct that is compiled to inline control instructions.
  pub fn is_inline_control(&self) -> bool {
    match self {
      Goal::BuiltIn{ kind, top_level: true, .. } => kind.is_control(),
      _                                          => false,
    }
  }

  pub fn native(&self) -> Option<NativePredicate> {
    match self.kind() {
      Some(BuiltInKind::Native(native)) => Some(native),
      _                                 => None,
    }
  }

  pub fn sub_goals(&self) -> &[Goal] {
    match self {
      Goal::Predicate(_)         => &[],
      Goal::BuiltIn{ goals, .. } => goals,
    }
  }
}

/// The functors the transform recognises, interned once per engine.
#[derive(Clone, Debug)]
pub struct BuiltIns {
  table : HashMap<FunctorId, BuiltInKind>,
  call  : FunctorId,
}

impl BuiltIns {

  pub fn new(interner: &mut Interner) -> BuiltIns {
    let mut table = HashMap::new();
    table.insert(interner.intern_functor(",", 2),   BuiltInKind::Conjunction);
    table.insert(interner.intern_functor(";", 2),   BuiltInKind::Disjunction);
    table.insert(interner.intern_functor("->", 2),  BuiltInKind::IfThen);
    table.insert(interner.intern_functor("\\+", 1), BuiltInKind::Negation);
    table.insert(interner.intern_functor("!", 0),   BuiltInKind::Cut);
    let call = interner.intern_functor("call", 1);
    table.insert(call, BuiltInKind::Call);
    for (functor, native) in NativePredicate::intern_all(interner) {
      table.insert(functor, BuiltInKind::Native(native));
    }
    BuiltIns{ table, call }
  }

  pub fn kind_of(&self, functor: FunctorId) -> Option<BuiltInKind> {
    self.table.get(&functor).copied()
  }

  /// The functor of `call/1`.
  pub fn call_functor(&self) -> FunctorId {
    self.call
  }

  /// The functors that may not be redefined by a program.
  pub fn functors(&self) -> impl Iterator<Item = &FunctorId> {
    self.table.keys()
  }

  /// Transforms a clause body. Every goal of the body is top-level.
  pub fn transform_body(&self, body: &[Term], interner: &dyn InternerView) -> Result<Vec<Goal>, CompileError> {
    body.iter().map(|goal| self.transform_goal(goal, true, interner)).collect()
  }

  /// Transforms one goal and, for control constructs, its sub-goals. The top-level flag flows from
  /// a construct to its parts.
  pub fn transform_goal(&self, term: &Term, top_level: bool, interner: &dyn InternerView)
    -> Result<Goal, CompileError>
  {
    let term = term.value();
    let (functor, _) =
      match &term {
        Term::Variable(_) => {
          // A variable goal `G` means `call(G)`.
          let call = Term::structure(self.call, vec![term.clone()]);
          return Ok(Goal::BuiltIn{ kind: BuiltInKind::Call, term: call, goals: Vec::new(), top_level });
        }
        Term::Integer(_) | Term::Float(_) => {
          return Err(CompileError::NotCallable(term.display(interner).to_string()));
        }
        _ => term.functor().ok_or_else(|| CompileError::NotCallable(term.display(interner).to_string()))?,
      };

    let kind =
      match self.kind_of(functor) {
        Some(kind) => kind,
        None       => return Ok(Goal::Predicate(term)),
      };

    let args = term.args();
    let goals =
      match kind {
        BuiltInKind::Conjunction | BuiltInKind::Disjunction => vec![
          self.transform_goal(&args[0], top_level, interner)?,
          self.transform_goal(&args[1], top_level, interner)?,
        ],
        BuiltInKind::IfThen => vec![
          self.transform_goal(&args[0], false, interner)?,
          self.transform_goal(&args[1], top_level, interner)?,
        ],
        BuiltInKind::Negation => vec![self.transform_goal(&args[0], false, interner)?],
        BuiltInKind::Cut | BuiltInKind::Call | BuiltInKind::Native(_) => Vec::new(),
      };

    Ok(Goal::BuiltIn{ kind, term, goals, top_level })
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::term::VarId;

  fn setup() -> (Interner, BuiltIns) {
    let mut interner = Interner::new();
    let builtins = BuiltIns::new(&mut interner);
    (interner, builtins)
  }

  #[test]
  fn cut_inside_a_top_level_disjunction_is_top_level() {
    // p :- (a, !, b ; c)
    let (mut interner, builtins) = setup();
    let comma = interner.intern_functor(",", 2);
    let semicolon = interner.intern_functor(";", 2);
    let cut = interner.intern_atom("!");
    let a = Term::Atom(interner.intern_atom("a"));
    let b = Term::Atom(interner.intern_atom("b"));
    let c = Term::Atom(interner.intern_atom("c"));
    let left = Term::structure(comma, vec![a, Term::structure(comma, vec![Term::Atom(cut), b])]);
    let body = Term::structure(semicolon, vec![left, c]);

    let goals = builtins.transform_body(&[body], &interner).unwrap();
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0].kind(), Some(BuiltInKind::Disjunction));
    assert!(goals[0].is_top_level());
    let conjunction = &goals[0].sub_goals()[0];
    let inner = &conjunction.sub_goals()[1];
    let cut_goal = &inner.sub_goals()[0];
    assert_eq!(cut_goal.kind(), Some(BuiltInKind::Cut));
    assert!(cut_goal.is_top_level());
    assert!(cut_goal.is_inline_control());
  }

  #[test]
  fn cut_as_an_argument_is_left_alone() {
    // p :- q(!)
    let (mut interner, builtins) = setup();
    let q = interner.intern_functor("q", 1);
    let cut = interner.intern_atom("!");
    let goal = Term::structure(q, vec![Term::Atom(cut)]);

    let goals = builtins.transform_body(&[goal], &interner).unwrap();
    match &goals[0] {
      Goal::Predicate(term) => assert_eq!(term.args()[0], Term::Atom(cut)),
      other => panic!("expected a predicate goal, got {:?}", other),
    }
  }

  #[test]
  fn conditions_and_negated_goals_are_not_top_level() {
    let (mut interner, builtins) = setup();
    let if_then = interner.intern_functor("->", 2);
    let not = interner.intern_functor("\\+", 1);
    let cut = Term::Atom(interner.intern_atom("!"));
    let ite = Term::structure(if_then, vec![cut.clone(), cut.clone()]);
    let negation = Term::structure(not, vec![cut]);

    let goals = builtins.transform_body(&[ite, negation], &interner).unwrap();
    assert!(!goals[0].sub_goals()[0].is_top_level());
    assert!(goals[0].sub_goals()[1].is_top_level());
    assert!(!goals[1].sub_goals()[0].is_top_level());
    assert!(!goals[1].sub_goals()[0].is_inline_control());
  }

  #[test]
  fn variables_become_meta_calls_and_numbers_are_rejected() {
    let (interner, builtins) = setup();
    let goals = builtins.transform_body(&[Term::variable(VarId(0))], &interner).unwrap();
    assert_eq!(goals[0].kind(), Some(BuiltInKind::Call));
    assert_eq!(goals[0].term().functor(), Some((builtins.call_functor(), 1)));
    assert!(builtins.transform_body(&[Term::Integer(3)], &interner).is_err());
  }

  #[test]
  fn natives_are_recognised() {
    let (mut interner, builtins) = setup();
    let is = interner.intern_functor("is", 2);
    let goal = Term::structure(is, vec![Term::variable(VarId(0)), Term::Integer(1)]);
    let goals = builtins.transform_body(&[goal], &interner).unwrap();
    assert_eq!(goals[0].native(), Some(NativePredicate::Is));
    assert!(!goals[0].is_inline_control());
  }
}
