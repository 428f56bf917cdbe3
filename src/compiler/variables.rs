/*!
  Occurrence analysis of the variables of a clause.

  Each variable is classified as

   * void, if it occurs exactly once: it needs no storage at all;
   * temporary, if it can live in an `X` register;
   * permanent, if it must survive a call and so lives in a slot `Y` of the clause's environment.

  For a clause without inline control the classification follows the chunks of the body. A chunk
  is the head or the goals following a call, up to and including the next call. Natives run
  inline and do not end a chunk. A variable that occurs in more than one chunk is permanent.

  Clauses with inline control constructs and queries are simpler: every variable that is not void
  is permanent. Queries have no void variables, because every query variable is reported.
*/

use indexmap::IndexMap;

use crate::term::{Term, VarId};
use super::builtins::Goal;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lifetime {
  Void,
  Temporary,
  Permanent,
}

#[derive(Clone, Debug)]
pub struct VariableInfo {
  pub id          : VarId,
  pub occurrences : usize,
  pub first_chunk : usize,
  pub last_chunk  : usize,
  pub lifetime    : Lifetime,
  seen            : bool,
}

/// The variables of one clause in order of first occurrence.
#[derive(Clone, Debug, Default)]
pub struct Variables {
  variables: IndexMap<VarId, VariableInfo>,
}

impl Variables {

  /// Chunk analysis of a clause whose flattened body has no inline control.
  pub fn chunked(head: Option<&Term>, goals: &[&Goal]) -> Variables {
    let mut variables = Variables::default();
    let mut chunk = 0;
    if let Some(head) = head {
      variables.record(head, chunk);
    }
    for goal in goals {
      variables.record(goal.term(), chunk);
      if goal.native().is_none() {
        chunk += 1;
      }
    }
    variables.classify(false, |info| info.first_chunk != info.last_chunk);
    variables
  }

  /// Every variable is permanent. Singletons stay void unless `keep_singletons` is set.
  pub fn all_permanent(head: Option<&Term>, goals: &[Goal], keep_singletons: bool) -> Variables {
    let mut variables = Variables::default();
    if let Some(head) = head {
      variables.record(head, 0);
    }
    for goal in goals {
      variables.record(goal.term(), 0);
    }
    variables.classify(keep_singletons, |_| true);
    variables
  }

  fn record(&mut self, term: &Term, chunk: usize) {
    match term.value() {
      Term::Variable(var) => {
        let info = self.variables.entry(var.id).or_insert_with(|| VariableInfo{
          id          : var.id,
          occurrences : 0,
          first_chunk : chunk,
          last_chunk  : chunk,
          lifetime    : Lifetime::Temporary,
          seen        : false,
        });
        info.occurrences += 1;
        info.last_chunk = chunk;
      }
      Term::Structure(structure) => {
        for arg in structure.args.iter() {
          self.record(arg, chunk);
        }
      }
      _ => {}
    }
  }

  fn classify<F>(&mut self, keep_singletons: bool, is_permanent: F)
    where F: Fn(&VariableInfo) -> bool
  {
    for info in self.variables.values_mut() {
      info.lifetime =
        if info.occurrences == 1 && !keep_singletons {
          Lifetime::Void
        } else if is_permanent(info) {
          Lifetime::Permanent
        } else {
          Lifetime::Temporary
        };
    }
  }

  pub fn get(&self, id: VarId) -> Option<&VariableInfo> {
    self.variables.get(&id)
  }

  pub fn lifetime(&self, id: VarId) -> Lifetime {
    self.variables.get(&id).map_or(Lifetime::Void, |info| info.lifetime)
  }

  /// Marks the variable as seen and reports whether this was its first occurrence.
  pub fn first_occurrence(&mut self, id: VarId) -> bool {
    match self.variables.get_mut(&id) {
      Some(info) => !std::mem::replace(&mut info.seen, true),
      None       => true,
    }
  }

  pub fn is_seen(&self, id: VarId) -> bool {
    self.variables.get(&id).map_or(false, |info| info.seen)
  }

  /// The permanent variables in order of first occurrence.
  pub fn permanent(&self) -> Vec<VarId> {
    self.variables
        .values()
        .filter(|info| info.lifetime == Lifetime::Permanent)
        .map(|info| info.id)
        .collect()
  }

  pub fn len(&self) -> usize {
    self.variables.len()
  }

  pub fn is_empty(&self) -> bool {
    self.variables.is_empty()
  }
}
