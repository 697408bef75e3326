//! Stack-machine instruction set and code generator for gradsym.
//!
//! Lowers the AST to a linear program of stack-VM instructions with relative
//! jump offsets. Numeric literals travel as IEEE-754 bit patterns inside
//! 32-bit words; addresses and jump offsets travel as raw integers.

pub mod compile;
pub mod instr;
pub mod word;

pub use compile::{compile, compile_ast, CompileError, CompileResult};
pub use instr::{Instr, Opcode, Prog};
pub use word::{
    bool_to_word, float_to_word, is_integer, word_to_bool, word_to_float, word_to_int, Mem, Word,
};
