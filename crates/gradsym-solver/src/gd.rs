//! Gradient-descent optimizer over path-constraint losses.

use gradsym_sym::{Grad, Params, SymRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

/// Gradient-descent optimizer. A conjunction of atoms is satisfied when
/// every atom's loss is `<= 0`; the optimizer walks the parameters downhill
/// until that holds, the gradient vanishes, or the epoch budget runs out.
#[derive(Debug, Clone)]
pub struct GdOptimizer {
    /// Maximum inner iterations per solve call.
    pub num_epochs: u32,
    /// Step size.
    pub lr: f32,
    /// Slack for strict inequalities and negations.
    pub eps: f32,
    /// Lower bound of the initial sampling range.
    pub param_low: f32,
    /// Upper bound of the initial sampling range.
    pub param_high: f32,
    /// Step by the sign of the gradient instead of its magnitude. Sign
    /// steps are robust to loss scaling and are the default; magnitude
    /// steps converge poorly on discrete atoms.
    pub sign_grad: bool,
    /// Sample initial parameters from the integers of the range.
    pub init_param_uniform_int: bool,
    /// PRNG seed; incremented by the retry wrappers on failure.
    pub seed: u64,
    /// Total gradient-descent iterations spent across all solve calls.
    pub num_used_itr: u64,
}

impl Default for GdOptimizer {
    fn default() -> Self {
        Self {
            num_epochs: 100,
            lr: 1.0,
            eps: 1.0,
            param_low: -10.0,
            param_high: 10.0,
            sign_grad: true,
            init_param_uniform_int: true,
            seed: 42,
            num_used_itr: 0,
        }
    }
}

impl GdOptimizer {
    /// Check whether `params` satisfies every constraint.
    pub fn eval(&self, constraints: &[SymRef], params: &Params) -> bool {
        constraints.iter().all(|c| c.eval(params, self.eps) <= 0.0)
    }

    /// Minimise the summed loss of `constraints`, mutating `params` in
    /// place. Variables already present in `params` are held constant when
    /// `init_params_const` is set (they represent concretised memory); new
    /// variables are initialised by seeded uniform sampling. Returns the
    /// final satisfiability.
    pub fn solve(
        &mut self,
        constraints: &[SymRef],
        params: &mut Params,
        init_params_const: bool,
    ) -> bool {
        if constraints.is_empty() {
            return true;
        }

        let mut unique_var_ids = HashSet::new();
        for c in constraints {
            c.gather_var_ids(&mut unique_var_ids);
        }
        // Sorted so that sampling order is reproducible under a fixed seed.
        let var_ids: BTreeSet<u32> = unique_var_ids.into_iter().collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut is_const: HashMap<u32, bool> = HashMap::new();
        for &var in &var_ids {
            if params.contains_key(&var) {
                is_const.insert(var, init_params_const);
            } else {
                let init = if self.init_param_uniform_int {
                    rng.gen_range(self.param_low as i32..=self.param_high as i32) as f32
                } else {
                    rng.gen_range(self.param_low..=self.param_high)
                };
                params.insert(var, init);
                is_const.insert(var, false);
            }
        }

        let mut itr = 0;
        let mut is_sat = self.eval(constraints, params);

        while !is_sat && itr < self.num_epochs {
            let mut grads = Grad::zero();
            for c in constraints {
                if c.eval(params, self.eps) > 0.0 {
                    grads = grads + c.grad(params, self.eps);
                }
            }

            let mut converged = true;
            for (&var, &g) in &grads.val {
                if g != 0.0 {
                    converged = false;
                }
                if !is_const.get(&var).copied().unwrap_or(false) {
                    let step = if self.sign_grad {
                        self.lr * sign(g)
                    } else {
                        self.lr * g
                    };
                    if let Some(value) = params.get_mut(&var) {
                        *value -= step;
                    }
                }
            }

            is_sat = self.eval(constraints, params);
            itr += 1;

            if converged {
                break;
            }
        }

        self.num_used_itr += itr as u64;
        trace!(itr, is_sat, "gradient descent finished");
        is_sat
    }
}

fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
