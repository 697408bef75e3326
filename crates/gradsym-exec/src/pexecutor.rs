//! Probabilistic path explorer.
//!
//! Extends the deterministic exploration with declared random inputs: a
//! branch whose constraints involve a random variable is not solved
//! numerically but assigned a symbolic conditional probability, and every
//! terminal state records its reach probability for later marginalisation.

use crate::executor::{assemble_trace, is_target_pc, ExecConfig};
use crate::state::SymState;
use crate::tables::{PathConstraintsTable, ProbPathConstraintsTable, Trace};
use crate::vm::sym_step;
use gradsym_ir::{Opcode, Prog};
use gradsym_solver::{initialize_params, smt_dpll_solver, smt_union_solver, GdOptimizer};
use gradsym_sym::{Params, Sym, SymProb};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Fold the path condition into the state's symbolic reach probability.
///
/// The first probabilistic branch conditions on nothing: the probability
/// becomes `(C₁ ∧ … ∧ Cₙ) / 1`. Every later branch refines the previous
/// one with `(C₁ ∧ … ∧ Cₙ) / (C₁ ∧ … ∧ Cₙ₋₁)`; the product telescopes
/// through the syntactic cancellation of [`SymProb::mul`], so a leaf ends
/// up carrying the joint probability of its whole path.
pub fn pbranch(state: &mut SymState) {
    let n = state.path_constraints.len();
    let Some(num) = Sym::conj(&state.path_constraints) else {
        return;
    };

    if state.has_observed_p_cond {
        let den = Sym::conj(&state.path_constraints[..n - 1]).unwrap_or_else(|| Sym::num(1.0));
        let cond_p = SymProb::new(num, den);
        state.p = state.p.mul(&cond_p);
    } else {
        state.p = SymProb::new(num, Sym::num(1.0));
        state.has_observed_p_cond = true;
    }
}

/// Probabilistic symbolic executor.
#[derive(Debug)]
pub struct PsExecutor {
    pub optimizer: GdOptimizer,
    pub config: ExecConfig,
    /// Ids of inputs declared as discrete random variables.
    pub random_vars: HashSet<u32>,
    pub constraints_cache: PathConstraintsTable,
    /// Terminal pc → recorded (constraint conjunction, memory, probability).
    pub prob_constraints_table: ProbPathConstraintsTable,
    max_sat: i64,
    max_unsat: i64,
}

impl PsExecutor {
    pub fn new(optimizer: GdOptimizer, config: ExecConfig) -> Self {
        let max_sat = config.max_sat as i64;
        let max_unsat = config.max_unsat as i64;
        Self {
            optimizer,
            config,
            random_vars: HashSet::new(),
            constraints_cache: PathConstraintsTable::new(),
            prob_constraints_table: ProbPathConstraintsTable::new(),
            max_sat,
            max_unsat,
        }
    }

    /// Declare an input variable as random. Its distribution is supplied
    /// when the recorded probabilities are evaluated.
    pub fn register_random_var(&mut self, var: u32) {
        self.random_vars.insert(var);
    }

    /// Explore `prog` from `init`. Identical traversal to the deterministic
    /// executor, except that probabilistic branches update `state.p`
    /// instead of consuming solver budget, and every terminal state with a
    /// non-empty path lands in the probability table.
    pub fn run(
        &mut self,
        prog: &Prog,
        target_pcs: &HashSet<i64>,
        init: SymState,
        max_depth: u32,
    ) -> Trace {
        let root_state = init.clone();
        let mut arena: Vec<(SymState, Vec<usize>)> = Vec::new();
        let mut worklist: Vec<(SymState, u32, Option<usize>)> = vec![(init, max_depth, None)];

        while let Some((mut state, depth, parent)) = worklist.pop() {
            let pc = state.pc;
            trace!(pc, depth, "visiting state");

            let mut is_sat = true;
            if !state.path_constraints.is_empty() && is_target_pc(target_pcs, pc) {
                is_sat = self.solve(pc, &mut state);
            }

            let node = if self.config.return_trace {
                arena.push((state.clone(), Vec::new()));
                let idx = arena.len() - 1;
                if let Some(parent) = parent {
                    arena[parent].1.push(idx);
                }
                Some(idx)
            } else {
                None
            };

            let Some(&instr) = prog.get(pc) else {
                debug!(pc, "program counter out of range, leaf");
                continue;
            };

            if instr.op == Opcode::Done && !state.path_constraints.is_empty() {
                self.record_final_state(pc, &state);
            }

            if instr.op == Opcode::Done || !is_sat {
                continue;
            }

            if depth > 0 && self.max_sat > 0 && self.max_unsat > 0 {
                let successors = sym_step(&state, instr);
                for successor in successors.into_iter().rev() {
                    worklist.push((successor, depth - 1, node));
                }
            }
        }

        if self.config.return_trace {
            assemble_trace(arena)
        } else {
            Trace::leaf(root_state)
        }
    }

    /// Decide the current path. A constraint set touching any random
    /// variable takes the probabilistic branch and is satisfiable by
    /// construction; everything else goes to the numeric solver. Both
    /// outcomes are cached, so the probability update runs exactly once
    /// per distinct constraint set.
    fn solve(&mut self, pc: usize, state: &mut SymState) -> bool {
        let key = state.constraints_key();

        if let Some((is_sat, _)) = self.constraints_cache.get(&key) {
            trace!(pc, is_sat, "constraint cache hit");
            return *is_sat;
        }

        let mut params = Params::new();
        initialize_params(&mut params, &state.mem, self.config.ignore_memory);

        let mut free_vars = HashSet::new();
        for constraint in &state.path_constraints {
            constraint.gather_var_ids(&mut free_vars);
        }
        let has_random_var = free_vars.iter().any(|v| self.random_vars.contains(v));

        let is_sat = if has_random_var {
            pbranch(state);
            debug!(pc, p = %state.p, constraints = %key, "probabilistic branch");
            true
        } else {
            let is_sat = if self.config.use_dpll {
                smt_dpll_solver(
                    &state.path_constraints,
                    &state.mem,
                    &mut params,
                    &mut self.optimizer,
                    self.config.max_num_trials,
                    self.config.ignore_memory,
                )
            } else {
                smt_union_solver(
                    &state.path_constraints,
                    &state.mem,
                    &mut params,
                    &mut self.optimizer,
                    self.config.max_num_trials,
                    self.config.ignore_memory,
                )
            };
            if is_sat {
                self.max_sat -= 1;
                // A path with no probabilistic content has no share of the
                // input distribution's mass.
                state.p = SymProb::zero();
            } else {
                self.max_unsat -= 1;
            }
            debug!(pc, is_sat, constraints = %key, "solved deterministic constraints");
            is_sat
        };

        self.constraints_cache.insert(key, (is_sat, params));
        is_sat
    }

    fn record_final_state(&mut self, pc: usize, state: &SymState) {
        let Some(conjunction) = state.path_conjunction() else {
            return;
        };
        self.prob_constraints_table.entry(pc).or_default().push((
            conjunction,
            state.mem.clone(),
            state.p.clone(),
        ));
    }
}
