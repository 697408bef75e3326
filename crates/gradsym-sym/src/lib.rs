//! Symbolic expression algebra for gradsym.
//!
//! [`Sym`] trees are immutable after construction and shared by reference
//! count, so a term popped off the VM stack stays valid for every state that
//! still points at it. Each predicate doubles as a differentiable loss whose
//! value is `<= 0` exactly when the predicate holds, which is what lets a
//! gradient optimizer decide satisfiability.

pub mod dist;
pub mod grad;
pub mod prob;
pub mod sym;

pub use dist::{cartesian_product, support_product, DiscreteDist, VarDists};
pub use grad::Grad;
pub use prob::{QueryOp, SymProb};
pub use sym::{Params, Sym, SymRef};
