//! Deterministic path explorer.

use crate::state::SymState;
use crate::tables::{PathConstraintsTable, Trace};
use crate::vm::sym_step;
use gradsym_ir::{Opcode, Prog};
use gradsym_solver::{initialize_params, smt_dpll_solver, smt_union_solver, GdOptimizer};
use gradsym_sym::Params;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Exploration parameters shared by both executors.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Satisfiable-constraint budget; each fresh SAT decision consumes one.
    pub max_sat: u64,
    /// Unsatisfiable-constraint budget.
    pub max_unsat: u64,
    /// Gradient-descent retries per constraint set, reseeding in between.
    pub max_num_trials: u32,
    /// Do not seed solver parameters from concrete memory.
    pub ignore_memory: bool,
    /// Decide boolean structure with DPLL before the numeric solver.
    pub use_dpll: bool,
    /// Keep every visited state and return the exploration tree.
    pub return_trace: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_sat: 256,
            max_unsat: 256,
            max_num_trials: 10,
            ignore_memory: false,
            use_dpll: false,
            return_trace: false,
        }
    }
}

/// Whether path constraints are solved at this program counter. An empty
/// target set, or the sentinel `-1`, makes every counter a target.
pub fn is_target_pc(target_pcs: &HashSet<i64>, pc: usize) -> bool {
    target_pcs.is_empty() || target_pcs.contains(&-1) || target_pcs.contains(&(pc as i64))
}

/// Deterministic symbolic executor: depth-first path exploration with a
/// per-path constraint stack and a global solver cache.
#[derive(Debug)]
pub struct SExecutor {
    pub optimizer: GdOptimizer,
    pub config: ExecConfig,
    /// Canonical constraints → (satisfiable, witness). Doubles as the
    /// solver cache and the primary run output.
    pub constraints_cache: PathConstraintsTable,
    max_sat: i64,
    max_unsat: i64,
}

impl SExecutor {
    pub fn new(optimizer: GdOptimizer, config: ExecConfig) -> Self {
        let max_sat = config.max_sat as i64;
        let max_unsat = config.max_unsat as i64;
        Self {
            optimizer,
            config,
            constraints_cache: PathConstraintsTable::new(),
            max_sat,
            max_unsat,
        }
    }

    /// Explore `prog` from `init`, depth-first, true-branch first. Returns
    /// the exploration tree (children only when configured); the constraint
    /// cache accumulates across calls.
    pub fn run(
        &mut self,
        prog: &Prog,
        target_pcs: &HashSet<i64>,
        init: SymState,
        max_depth: u32,
    ) -> Trace {
        let root_state = init.clone();
        // Arena-backed trace assembly keeps exploration iterative; default
        // depth budgets are far beyond any sane recursion limit.
        let mut arena: Vec<(SymState, Vec<usize>)> = Vec::new();
        let mut worklist: Vec<(SymState, u32, Option<usize>)> = vec![(init, max_depth, None)];

        while let Some((state, depth, parent)) = worklist.pop() {
            let pc = state.pc;
            trace!(pc, depth, "visiting state");

            let mut is_sat = true;
            if !state.path_constraints.is_empty() && is_target_pc(target_pcs, pc) {
                is_sat = self.solve(pc, &state);
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

            if instr.op == Opcode::Done || !is_sat {
                continue;
            }

            if depth > 0 && self.max_sat > 0 && self.max_unsat > 0 {
                let successors = sym_step(&state, instr);
                // LIFO worklist: push in reverse so the true branch of a
                // fork is explored first.
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

    /// Decide the current path constraints, consulting and feeding the
    /// cache. Budgets shrink only on cache misses.
    fn solve(&mut self, pc: usize, state: &SymState) -> bool {
        let key = state.constraints_key();

        if let Some((is_sat, _)) = self.constraints_cache.get(&key) {
            trace!(pc, is_sat, "constraint cache hit");
            return *is_sat;
        }

        let mut params = Params::new();
        initialize_params(&mut params, &state.mem, self.config.ignore_memory);

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
        } else {
            self.max_unsat -= 1;
        }

        debug!(pc, is_sat, constraints = %key, "solved path constraints");
        self.constraints_cache.insert(key, (is_sat, params));
        is_sat
    }
}

/// Fold a visit-ordered arena into a trace. Children were created after
/// their parents, so a reverse sweep completes every subtree before its
/// parent consumes it.
pub(crate) fn assemble_trace(arena: Vec<(SymState, Vec<usize>)>) -> Trace {
    let mut built: Vec<Option<Trace>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);

    for idx in (0..arena.len()).rev() {
        let (state, child_indices) = &arena[idx];
        let children: Vec<Trace> = child_indices
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[idx] = Some(Trace::new(state.clone(), children));
    }

    match built.into_iter().next().flatten() {
        Some(root) => root,
        None => Trace::leaf(SymState::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradsym_ir::compile;

    fn run_source(source: &str) -> SExecutor {
        let (_, prog) = compile(source).expect("compile failed");
        let mut executor = SExecutor::new(GdOptimizer::default(), ExecConfig::default());
        executor.run(&prog, &HashSet::new(), SymState::new(), 65536);
        executor
    }

    fn census(executor: &SExecutor) -> (usize, usize) {
        let sat = executor
            .constraints_cache
            .values()
            .filter(|(s, _)| *s)
            .count();
        let unsat = executor.constraints_cache.len() - sat;
        (sat, unsat)
    }

    #[test]
    fn test_single_branch_has_two_sat_paths() {
        let executor = run_source("if (a > 3) return 1;");
        let (sat, unsat) = census(&executor);
        assert_eq!(sat, 2);
        assert_eq!(unsat, 0);
        assert!(executor.constraints_cache.contains_key("(3<var_0)"));
        assert!(executor.constraints_cache.contains_key("!((3<var_0))"));
    }

    #[test]
    fn test_witness_satisfies_constraints() {
        let executor = run_source("if (a > 3) return 1;");
        let (is_sat, params) = &executor.constraints_cache["(3<var_0)"];
        assert!(is_sat);
        assert!(params[&0] > 3.0);
    }

    #[test]
    fn test_concrete_branch_is_pruned() {
        // b is concrete, so (1 == 4) is unsatisfiable and the nested
        // assignment is never reached
        let executor = run_source("b = 1; if (b == 4) { c = 3; } c = 2;");
        let (sat, unsat) = census(&executor);
        assert_eq!(unsat, 1);
        assert!(sat >= 1);
        let (is_sat, _) = &executor.constraints_cache["(1==4)"];
        assert!(!is_sat);
    }

    #[test]
    fn test_trace_when_requested() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let config = ExecConfig {
            return_trace: true,
            ..ExecConfig::default()
        };
        let mut executor = SExecutor::new(GdOptimizer::default(), config);
        let trace = executor.run(&prog, &HashSet::new(), SymState::new(), 65536);
        // Both arms are satisfiable so the tree covers both paths
        assert!(trace.size() > 4);
        let pcs = trace.pcs();
        assert_eq!(pcs[0], 0);
        // The branch at pc 6 forks to 10 (then) and 7 (else), true first
        let fork = pcs.iter().position(|&pc| pc == 10);
        let fall = pcs.iter().position(|&pc| pc == 7);
        assert!(fork.is_some() && fall.is_some());
        assert!(fork < fall);
    }

    #[test]
    fn test_depth_budget_stops_exploration() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let mut executor = SExecutor::new(GdOptimizer::default(), ExecConfig::default());
        executor.run(&prog, &HashSet::new(), SymState::new(), 3);
        // The branch at pc 6 is never reached within depth 3
        assert!(executor.constraints_cache.is_empty());
    }

    #[test]
    fn test_target_pcs_filter_solving() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let mut executor = SExecutor::new(GdOptimizer::default(), ExecConfig::default());
        // Only pc 99 is a target; nothing is ever solved, but exploration
        // still walks the whole program
        executor.run(&prog, &HashSet::from([99]), SymState::new(), 65536);
        assert!(executor.constraints_cache.is_empty());
    }

    #[test]
    fn test_sentinel_target_solves_everywhere() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let mut executor = SExecutor::new(GdOptimizer::default(), ExecConfig::default());
        executor.run(&prog, &HashSet::from([-1]), SymState::new(), 65536);
        assert_eq!(executor.constraints_cache.len(), 2);
    }

    #[test]
    fn test_cache_reused_across_runs() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let mut executor = SExecutor::new(GdOptimizer::default(), ExecConfig::default());
        executor.run(&prog, &HashSet::new(), SymState::new(), 65536);
        let used = executor.optimizer.num_used_itr;
        executor.run(&prog, &HashSet::new(), SymState::new(), 65536);
        // Second run hits the cache for every constraint set
        assert_eq!(executor.optimizer.num_used_itr, used);
    }

    #[test]
    fn test_dpll_strategy_matches_union_on_branches() {
        let (_, prog) = compile("if (a > 3) return 1;").expect("compile failed");
        let config = ExecConfig {
            use_dpll: true,
            ..ExecConfig::default()
        };
        let mut executor = SExecutor::new(GdOptimizer::default(), config);
        executor.run(&prog, &HashSet::new(), SymState::new(), 65536);
        let (sat, unsat) = census(&executor);
        assert_eq!((sat, unsat), (2, 0));
    }
}
