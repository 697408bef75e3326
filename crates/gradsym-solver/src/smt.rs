//! SMT orchestration: strategies that pair the boolean layer with the
//! gradient optimizer.

use crate::gd::GdOptimizer;
use crate::sat::{pathconstraints_to_expr, satisfiable_dpll, Assignments, BoolExpr};
use gradsym_ir::{word_to_float, Mem};
use gradsym_sym::{Params, Sym, SymRef};
use std::collections::HashMap;
use tracing::debug;

/// Seed `params` from concrete memory (unless memory is ignored), so that
/// concretised variables enter the solver as fixed values.
pub fn initialize_params(params: &mut Params, mem: &Mem, ignore_memory: bool) {
    params.clear();
    if !ignore_memory {
        for (&var, &word) in mem {
            params.insert(var, word_to_float(word));
        }
    }
}

/// Treat the whole path constraint as one conjunction and descend on its
/// unified loss, retrying with a bumped seed on failure.
pub fn smt_union_solver(
    constraints: &[SymRef],
    mem: &Mem,
    params: &mut Params,
    optimizer: &mut GdOptimizer,
    max_num_trials: u32,
    ignore_memory: bool,
) -> bool {
    let mut is_sat = false;
    for trial in 0..max_num_trials {
        is_sat = optimizer.solve(constraints, params, true);
        if is_sat {
            break;
        }
        debug!(trial, seed = optimizer.seed, "unsatisfied, retrying with next seed");
        optimizer.seed += 1;
        initialize_params(params, mem, ignore_memory);
    }
    is_sat
}

/// Let DPLL propose a polarity per atom, hand the signed conjunction to the
/// gradient optimizer, and learn a blocking clause whenever the numeric
/// solve fails. Terminates when a proposal is numerically satisfied or the
/// boolean abstraction itself becomes unsatisfiable.
pub fn smt_dpll_solver(
    constraints: &[SymRef],
    mem: &Mem,
    params: &mut Params,
    optimizer: &mut GdOptimizer,
    max_num_trials: u32,
    ignore_memory: bool,
) -> bool {
    let mut unique_terms: HashMap<String, SymRef> = HashMap::new();
    let mut expr = pathconstraints_to_expr(constraints, &mut unique_terms);

    loop {
        let mut assignments = Assignments::new();
        if !satisfiable_dpll(&expr, &mut assignments) {
            return false;
        }

        let signed: Vec<SymRef> = assignments
            .iter()
            .filter_map(|(name, &positive)| {
                unique_terms.get(name).map(|term| {
                    if positive {
                        term.clone()
                    } else {
                        Sym::not(term.clone())
                    }
                })
            })
            .collect();

        for _ in 0..max_num_trials {
            if optimizer.solve(&signed, params, true) {
                return true;
            }
            optimizer.seed += 1;
            initialize_params(params, mem, ignore_memory);
        }

        // The proposed polarities are numerically infeasible; block this
        // assignment and ask DPLL for another.
        debug!(?assignments, "numeric solve failed, learning blocking clause");
        let mut learnt = BoolExpr::constant(false);
        for (name, &positive) in &assignments {
            let literal = if positive {
                BoolExpr::not(BoolExpr::var(name.clone()))
            } else {
                BoolExpr::var(name.clone())
            };
            learnt = BoolExpr::or(learnt, literal);
        }
        expr = BoolExpr::and(expr, learnt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradsym_ir::float_to_word;

    fn default_setup() -> (GdOptimizer, Params) {
        (GdOptimizer::default(), Params::new())
    }

    #[test]
    fn test_initialize_params_from_memory() {
        let mut mem = Mem::new();
        mem.insert(2, float_to_word(5.0));
        let mut params = Params::from([(9, 1.0)]);
        initialize_params(&mut params, &mem, false);
        assert_eq!(params, Params::from([(2, 5.0)]));

        initialize_params(&mut params, &mem, true);
        assert!(params.is_empty());
    }

    #[test]
    fn test_union_solver_satisfiable() {
        let (mut opt, mut params) = default_setup();
        let constraints = vec![Sym::lt(Sym::num(2.0), Sym::any(0))];
        assert!(smt_union_solver(
            &constraints,
            &Mem::new(),
            &mut params,
            &mut opt,
            10,
            false
        ));
        assert!(params[&0] > 2.0);
    }

    #[test]
    fn test_union_solver_retries_bump_seed() {
        let (mut opt, mut params) = default_setup();
        let before = opt.seed;
        // Constant contradiction: every trial fails
        let constraints = vec![Sym::eq(Sym::num(1.0), Sym::num(4.0))];
        assert!(!smt_union_solver(
            &constraints,
            &Mem::new(),
            &mut params,
            &mut opt,
            3,
            false
        ));
        assert_eq!(opt.seed, before + 3);
    }

    #[test]
    fn test_dpll_solver_conjunction() {
        let (mut opt, mut params) = default_setup();
        let constraints = vec![
            Sym::lt(Sym::num(2.0), Sym::any(0)),
            Sym::not(Sym::eq(Sym::any(1), Sym::num(4.0))),
        ];
        assert!(smt_dpll_solver(
            &constraints,
            &Mem::new(),
            &mut params,
            &mut opt,
            10,
            false
        ));
        assert!(params[&0] > 2.0);
        assert!(params[&1] != 4.0);
    }

    #[test]
    fn test_dpll_solver_disjunction_picks_feasible_branch() {
        // (a == 1 || a == 2) as a single constraint
        let (mut opt, mut params) = default_setup();
        let constraints = vec![Sym::or(
            Sym::eq(Sym::any(0), Sym::num(1.0)),
            Sym::eq(Sym::any(0), Sym::num(2.0)),
        )];
        assert!(smt_dpll_solver(
            &constraints,
            &Mem::new(),
            &mut params,
            &mut opt,
            10,
            false
        ));
        let a = params[&0];
        assert!(a == 1.0 || a == 2.0);
    }

    #[test]
    fn test_dpll_solver_boolean_unsat() {
        // a == 1 && !(a == 1): boolean layer alone refutes it
        let (mut opt, mut params) = default_setup();
        let atom = Sym::eq(Sym::any(0), Sym::num(1.0));
        let constraints = vec![atom.clone(), Sym::not(atom)];
        assert!(!smt_dpll_solver(
            &constraints,
            &Mem::new(),
            &mut params,
            &mut opt,
            10,
            false
        ));
    }

    #[test]
    fn test_memory_seeded_params_are_pinned() {
        // Memory pins a to 1; the constraint a == 3 is then unsatisfiable
        let (mut opt, mut params) = default_setup();
        let mut mem = Mem::new();
        mem.insert(0, float_to_word(1.0));
        initialize_params(&mut params, &mem, false);
        let constraints = vec![Sym::eq(Sym::any(0), Sym::num(3.0))];
        assert!(!smt_union_solver(
            &constraints,
            &mem,
            &mut params,
            &mut opt,
            3,
            false
        ));
    }
}
