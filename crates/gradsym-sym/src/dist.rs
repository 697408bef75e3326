//! Finite discrete distributions over integer values.
//!
//! Every random input has finite support; marginalisation enumerates the
//! cartesian product of the supports of all declared random variables.

use std::collections::BTreeMap;

/// A discrete distribution with enumerated support.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteDist {
    /// Support values.
    pub vals: Vec<i32>,
    /// Probability of each support value.
    pub probs: Vec<f32>,
}

impl DiscreteDist {
    /// Uniform distribution over `low..=high`.
    pub fn uniform(low: i32, high: i32) -> Self {
        let vals: Vec<i32> = (low..=high).collect();
        let p = 1.0 / vals.len() as f32;
        let probs = vec![p; vals.len()];
        Self { vals, probs }
    }

    /// Bernoulli distribution: 1 with probability `p`, 0 otherwise.
    pub fn bernoulli(p: f32) -> Self {
        Self {
            vals: vec![0, 1],
            probs: vec![1.0 - p, p],
        }
    }

    /// Binomial distribution with `n` trials of success probability `p`.
    pub fn binomial(n: u32, p: f32) -> Self {
        let vals: Vec<i32> = (0..=n as i32).collect();
        let probs = (0..=n)
            .map(|k| binom_coeff(n, k) * p.powi(k as i32) * (1.0 - p).powi((n - k) as i32))
            .collect();
        Self { vals, probs }
    }

    /// Probability of a single support value, zero if not in the support.
    pub fn prob_of(&self, val: i32) -> f32 {
        self.vals
            .iter()
            .position(|&v| v == val)
            .map(|i| self.probs[i])
            .unwrap_or(0.0)
    }
}

fn binom_coeff(n: u32, k: u32) -> f32 {
    let k = k.min(n - k);
    let mut c = 1.0f32;
    for i in 0..k {
        c = c * (n - i) as f32 / (i + 1) as f32;
    }
    c
}

/// Distributions of the declared random variables, ordered by variable id so
/// that enumeration order is deterministic.
pub type VarDists = BTreeMap<u32, DiscreteDist>;

/// Cartesian product of the given value lists. The first list varies
/// fastest in the output order.
pub fn cartesian_product(lists: &[Vec<i32>]) -> Vec<Vec<i32>> {
    let mut result: Vec<Vec<i32>> = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::with_capacity(result.len() * list.len());
        for &val in list {
            for combo in &result {
                let mut extended = combo.clone();
                extended.push(val);
                next.push(extended);
            }
        }
        result = next;
    }
    result
}

/// Enumerate the joint support of `dists` as combinations aligned with the
/// table's key order.
pub fn support_product(dists: &VarDists) -> Vec<Vec<i32>> {
    let lists: Vec<Vec<i32>> = dists.values().map(|d| d.vals.clone()).collect();
    cartesian_product(&lists)
}
