/*!

  The instruction set of the virtual machine and its binary encoding.

  Code memory is a flat little-endian byte buffer. Every instruction begins with a single opcode
  byte followed by operand fields whose sizes are fixed per opcode (see `binary` for the layout of
  each one). Code addresses are byte offsets into code memory and are 32 bits wide.

  Functors appear in the bytecode only as interned ids. `call` and `execute` name their callee by
  functor id; the runtime resolves the id to the callee's `CallPoint` through the call table of the
  code area each time the instruction executes, so predicates may be (re)loaded in any order. For
  diagnostic or pedagogic purposes, `disassembly` resolves ids and addresses back to names.

  One design decision that needed to be made is whether to store the arguments of the
  instruction as data members of enum variants, with one variant per opcode. In memory we do
  exactly that, since it is what the compiler and the tests want to manipulate. In code memory,
  however, an enum is only used for the opcode itself, not the entire instruction, and inhabits a
  single byte, so instructions take only as much space as their operands need.

*/

mod assembly;
mod binary;
mod disassembly;
mod instruction;

pub use assembly::Assembler;
pub use binary::{decode_instruction, encode_instruction, encode_all};
pub use disassembly::{disassemble, DisassembledInstruction, listing_table};
pub use instruction::{CodeAddress, Constant, Instruction, Operation, FAIL_ADDRESS};
