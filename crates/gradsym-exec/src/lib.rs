//! Path-sensitive symbolic execution for gradsym stack programs.
//!
//! The deterministic executor forks at every symbolic branch, accumulates
//! per-path constraints, and decides their satisfiability through the
//! gradient SMT layer, caching each decision. The probabilistic executor
//! additionally lifts path predicates over declared random inputs into
//! symbolic reach probabilities.

pub mod executor;
pub mod pexecutor;
pub mod state;
pub mod tables;
pub mod vm;

pub use executor::{is_target_pc, ExecConfig, SExecutor};
pub use pexecutor::{pbranch, PsExecutor};
pub use state::{SMem, SymState};
pub use tables::{PathConstraintsTable, ProbPathConstraintsTable, Trace};
pub use vm::sym_step;
