//! Numeric SMT layer for gradsym.
//!
//! Satisfiability of a conjunction of atoms is decided by gradient descent
//! on the differentiable losses of [`gradsym_sym::Sym`]; a DPLL procedure
//! handles the boolean structure so the numeric solver only ever sees signed
//! conjunctions. Gradient descent is a heuristic: failure to satisfy is a
//! legitimate outcome, not an error.

pub mod gd;
pub mod sat;
pub mod smt;

pub use gd::GdOptimizer;
pub use sat::{
    cnf, literal_elimination, pathconstraints_to_expr, satisfiable_dpll, unit_propagation,
    Assignments, BoolExpr, ExprRef, Polarity,
};
pub use smt::{initialize_params, smt_dpll_solver, smt_union_solver};
