/*!
  A compiler and byte-code runtime for first-order logic clauses in the style of Warren's Abstract
  Machine.

  Programs are read into `Clause`s, compiled predicate by predicate into a `CodeArea`, and
  queries are solved by the `WVM`, which reports each solution as a set of variable bindings. The
  `ResolutionEngine` ties these together:

  ```
  use wam_resolution::ResolutionEngine;

  let mut engine = ResolutionEngine::new().unwrap();
  engine.consult("member(X, [X | _]).\nmember(X, [_ | T]) :- member(X, T).").unwrap();
  let answers: Vec<String> =
    engine.query("member(X, [1, 2, 3])")
          .unwrap()
          .map(|solution| solution.unwrap().to_string())
          .collect();
  assert_eq!(answers, vec!["X = 1", "X = 2", "X = 3"]);
  ```
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod address;
pub mod bytecode;
pub mod cell;
pub mod codearea;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod functor;
pub mod interner;
pub mod library;
pub mod symboltable;
pub mod term;
pub mod wvm;

pub use codearea::{CallPoint, CodeArea, CodeView};
pub use config::MachineConfig;
pub use engine::{ResolutionEngine, Solution, Solutions};
pub use error::{CompileError, EngineError, MachineError};
pub use interner::{Interner, InternerView};
pub use term::{Clause, ClauseKind, Term};
pub use wvm::{Status, WVM};
