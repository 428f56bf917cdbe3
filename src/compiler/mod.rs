/*!
  Source text to byte-code: the reader, the built-in transform, register allocation and code
  generation.
*/

mod builtins;
mod compile;
mod parser;
mod variables;

pub use builtins::{BuiltInKind, BuiltIns, Goal};
pub use compile::{CompiledQuery, Compiler};
pub use parser::Reader;
pub use variables::{Lifetime, Variables};
