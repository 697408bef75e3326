//! Externally visible execution results.

use crate::state::SymState;
use gradsym_ir::Mem;
use gradsym_sym::{Params, SymProb, SymRef};
use std::collections::HashMap;

/// Solver cache and primary output of the deterministic executor: canonical
/// constraint string → (satisfiable, witness parameters).
pub type PathConstraintsTable = HashMap<String, (bool, Params)>;

/// Output of the probabilistic executor: for each terminal program counter,
/// the (path conjunction, concrete memory, symbolic reach probability) of
/// every final state observed there.
pub type ProbPathConstraintsTable = HashMap<usize, Vec<(SymRef, Mem, SymProb)>>;

/// Tree of visited states. Children are populated only when the executor is
/// asked to return a trace.
#[derive(Debug, Clone)]
pub struct Trace {
    pub state: SymState,
    pub children: Vec<Trace>,
}

impl Trace {
    pub fn new(state: SymState, children: Vec<Trace>) -> Self {
        Self { state, children }
    }

    pub fn leaf(state: SymState) -> Self {
        Self {
            state,
            children: Vec::new(),
        }
    }

    /// Number of states in the trace, this one included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Trace::size).sum::<usize>()
    }

    /// Depth-first iteration over the program counters of the trace.
    pub fn pcs(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_pcs(&mut out);
        out
    }

    fn collect_pcs(&self, out: &mut Vec<usize>) {
        out.push(self.state.pc);
        for child in &self.children {
            child.collect_pcs(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_size_and_pcs() {
        let mut a = SymState::new();
        a.pc = 0;
        let mut b = SymState::new();
        b.pc = 4;
        let mut c = SymState::new();
        c.pc = 7;

        let trace = Trace::new(a, vec![Trace::leaf(b), Trace::leaf(c)]);
        assert_eq!(trace.size(), 3);
        assert_eq!(trace.pcs(), vec![0, 4, 7]);
    }
}
