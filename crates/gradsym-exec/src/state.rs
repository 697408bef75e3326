//! Symbolic machine state.

use gradsym_ir::{float_to_word, is_integer, word_to_float, Mem};
use gradsym_sym::{Sym, SymProb, SymRef};
use std::collections::HashMap;
use std::fmt;

/// Symbolic memory: variable id → symbolic term. An address holds a
/// symbolic entry only while no concrete value is known for it.
pub type SMem = HashMap<u32, SymRef>;

/// One symbolic execution state. Cloning at a fork copies the mutable
/// containers; the symbolic terms inside them stay shared.
#[derive(Debug, Clone)]
pub struct SymState {
    /// Program counter.
    pub pc: usize,
    /// Next fresh input-variable id handed out by `Read`.
    pub var_cnt: u32,
    /// Concrete memory.
    pub mem: Mem,
    /// Symbolic memory. Invariant: no address is present in both `mem` and
    /// `smem`.
    pub smem: SMem,
    /// Operand stack of symbolic terms.
    pub sym_stack: Vec<SymRef>,
    /// Conjunction of branch conditions along the current path.
    pub path_constraints: Vec<SymRef>,
    /// Symbolic probability of reaching this state.
    pub p: SymProb,
    /// Whether this path has incorporated a probabilistic branch yet; the
    /// first one conditions on nothing, later ones refine the previous
    /// condition.
    pub has_observed_p_cond: bool,
}

impl Default for SymState {
    fn default() -> Self {
        Self {
            pc: 0,
            var_cnt: 0,
            mem: Mem::new(),
            smem: SMem::new(),
            sym_stack: Vec::new(),
            path_constraints: Vec::new(),
            p: SymProb::one(),
            has_observed_p_cond: false,
        }
    }
}

impl SymState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a variable to a concrete value before execution starts.
    pub fn set_concrete_val(&mut self, var: u32, val: f32) {
        self.mem.insert(var, float_to_word(val));
        self.smem.remove(&var);
    }

    /// Canonical cache key for the current path constraints: each atom's
    /// converted rendering, joined in path order. Structurally identical
    /// constraint sequences always produce equal keys.
    pub fn constraints_key(&self) -> String {
        self.path_constraints
            .iter()
            .map(|c| c.to_text(true))
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// The path constraints folded into a single conjunction.
    pub fn path_conjunction(&self) -> Option<SymRef> {
        Sym::conj(&self.path_constraints)
    }
}

impl fmt::Display for SymState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stack: [")?;
        for term in &self.sym_stack {
            write!(f, "{}, ", term.to_text(false))?;
        }
        writeln!(f, "]")?;

        write!(f, "Memory: {{")?;
        for (&var, &word) in &self.mem {
            let val = word_to_float(word);
            if is_integer(val) {
                write!(f, "var_{}: {}, ", var, val as i64)?;
            } else {
                write!(f, "var_{}: {}, ", var, val)?;
            }
        }
        writeln!(f, "}}")?;

        write!(f, "Symbolic Memory: {{")?;
        for (&var, term) in &self.smem {
            write!(f, "var_{}: {}, ", var, term.to_text(true))?;
        }
        writeln!(f, "}}")?;

        write!(f, "Path Constraints: ")?;
        for constraint in &self.path_constraints {
            write!(f, "({}) && ", constraint.to_text(true))?;
        }
        write!(f, "1")
    }
}
