//! Tunables of the compiler and the machine.

/// Limits and switches shared by the compiler, the code area and the runtime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MachineConfig {
  /// Refuse to bind a variable to a term that contains it.
  pub occurs_check            : bool,
  /// Emit `switch_on_term` dispatch for predicates whose clauses all have a bound first argument.
  pub first_argument_indexing : bool,
  /// Size of code memory in bytes.
  pub code_capacity           : usize,
  pub heap_limit              : usize,
  pub trail_limit             : usize,
  pub choice_point_limit      : usize,
  pub environment_limit       : usize,
  /// Nesting bound on terms read back out of the heap and on arithmetic expressions. Every list
  /// cell counts as one level, and a cyclic term always exceeds it.
  pub max_term_depth          : usize,
}

impl Default for MachineConfig {
  fn default() -> Self {
    MachineConfig{
      occurs_check            : false,
      first_argument_indexing : true,
      code_capacity           : 1 << 20,
      heap_limit              : 1 << 22,
      trail_limit             : 1 << 22,
      choice_point_limit      : 1 << 18,
      environment_limit       : 1 << 18,
      max_term_depth          : 1 << 18,
    }
  }
}

impl MachineConfig {
  pub fn with_occurs_check(mut self, occurs_check: bool) -> Self {
    self.occurs_check = occurs_check;
    self
  }

  pub fn with_first_argument_indexing(mut self, indexing: bool) -> Self {
    self.first_argument_indexing = indexing;
    self
  }

  pub fn with_code_capacity(mut self, bytes: usize) -> Self {
    self.code_capacity = bytes;
    self
  }

  pub fn with_heap_limit(mut self, cells: usize) -> Self {
    self.heap_limit = cells;
    self
  }

  pub fn with_trail_limit(mut self, entries: usize) -> Self {
    self.trail_limit = entries;
    self
  }

  pub fn with_choice_point_limit(mut self, frames: usize) -> Self {
    self.choice_point_limit = frames;
    self
  }

  pub fn with_environment_limit(mut self, frames: usize) -> Self {
    self.environment_limit = frames;
    self
  }

  pub fn with_max_term_depth(mut self, depth: usize) -> Self {
    self.max_term_depth = depth;
    self
  }
}
