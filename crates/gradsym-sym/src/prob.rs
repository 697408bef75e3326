//! Symbolic reach probabilities as ratios of symbolic terms.

use crate::dist::VarDists;
use crate::sym::{Params, Sym, SymRef};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operator for posterior queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Lt,
    Le,
}

/// A symbolic rational `numerator / denominator`.
#[derive(Debug, Clone)]
pub struct SymProb {
    pub num: SymRef,
    pub den: SymRef,
}

impl SymProb {
    pub fn new(num: SymRef, den: SymRef) -> Self {
        Self { num, den }
    }

    /// The unit probability `1/1`.
    pub fn one() -> Self {
        Self::new(Sym::num(1.0), Sym::num(1.0))
    }

    /// The `0/0` sentinel marking a path whose constraints carry no random
    /// variable and therefore no share of the input distribution.
    pub fn zero() -> Self {
        Self::new(Sym::num(0.0), Sym::num(0.0))
    }

    /// Multiply two ratios, cancelling textually identical factors: if
    /// `self.den` equals `other.num` the product telescopes to
    /// `self.num / other.den`, and symmetrically. The cancellation is
    /// syntactic, so it is sound but not complete.
    pub fn mul(&self, other: &SymProb) -> SymProb {
        if self.den.to_text(true) == other.num.to_text(true) {
            return SymProb::new(self.num.clone(), other.den.clone());
        }
        if self.num.to_text(true) == other.den.to_text(true) {
            return SymProb::new(other.num.clone(), self.den.clone());
        }
        SymProb::new(
            Sym::mul(self.num.clone(), other.num.clone()),
            Sym::mul(self.den.clone(), other.den.clone()),
        )
    }

    /// Marginalise over the declared random variables: each side becomes a
    /// probability-weighted sum of counted copies, one per joint assignment
    /// in `product`.
    pub fn marginalize(&self, dists: &VarDists, product: &[Vec<i32>]) -> (SymRef, SymRef) {
        let var_ids: Vec<u32> = dists.keys().copied().collect();
        let mut num_sum = Sym::num(0.0);
        let mut den_sum = Sym::num(0.0);

        for combo in product {
            let mut assign = BTreeMap::new();
            let mut weight = 1.0f32;
            for (i, &var) in var_ids.iter().enumerate() {
                let val = combo[i];
                assign.insert(var, val as f32);
                weight *= dists[&var].prob_of(val);
            }
            num_sum = Sym::add(
                num_sum,
                Sym::mul(Sym::num(weight), Sym::cnt(self.num.clone(), assign.clone())),
            );
            den_sum = Sym::add(
                den_sum,
                Sym::mul(Sym::num(weight), Sym::cnt(self.den.clone(), assign)),
            );
        }
        (num_sum, den_sum)
    }

    /// Evaluate the marginalised ratio. A zero denominator yields zero.
    pub fn eval(&self, params: &Params, eps: f32, dists: &VarDists, product: &[Vec<i32>]) -> f32 {
        let (num, den) = self.marginalize(dists, product);
        let den_val = den.eval(params, eps);
        if den_val == 0.0 {
            return 0.0;
        }
        num.eval(params, eps) / den_val
    }

    /// Build the division-free comparison `op(Σnum, Σden · rhs)`, asking
    /// whether the posterior compares to `rhs` without materialising the
    /// quotient.
    pub fn query(
        &self,
        op: QueryOp,
        rhs: SymRef,
        dists: &VarDists,
        product: &[Vec<i32>],
    ) -> SymRef {
        let (num, den) = self.marginalize(dists, product);
        let scaled = Sym::mul(den, rhs);
        match op {
            QueryOp::Eq => Sym::eq(num, scaled),
            QueryOp::Lt => Sym::lt(num, scaled),
            QueryOp::Le => Sym::le(num, scaled),
        }
    }
}

impl fmt::Display for SymProb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num.to_text(true), self.den.to_text(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{support_product, DiscreteDist};

    fn atom(var: u32, val: f32) -> SymRef {
        Sym::eq(Sym::any(var), Sym::num(val))
    }

    #[test]
    fn test_mul_cancels_denominator_against_numerator() {
        // (a/b) * (c/b') where b and c are textually equal -> a/b'
        let a = atom(0, 1.0);
        let b = Sym::and(atom(0, 1.0), atom(1, 2.0));
        let c = Sym::and(atom(0, 1.0), atom(1, 2.0));
        let d = Sym::and(Sym::and(atom(0, 1.0), atom(1, 2.0)), atom(2, 3.0));

        let p = SymProb::new(b.clone(), a.clone());
        let q = SymProb::new(d.clone(), c);
        // p.num == q.den textually -> (q.num / p.den)
        let r = p.mul(&q);
        assert_eq!(r.num.to_text(true), d.to_text(true));
        assert_eq!(r.den.to_text(true), a.to_text(true));
    }

    #[test]
    fn test_mul_without_cancellation() {
        let p = SymProb::new(atom(0, 1.0), Sym::num(1.0));
        let q = SymProb::new(atom(1, 2.0), Sym::num(1.0));
        let r = p.mul(&q);
        assert_eq!(
            r.num.to_text(true),
            "((var_0==1)*(var_1==2))"
        );
    }

    #[test]
    fn test_telescoping_refinement() {
        // Successive refinements (C1/1) * (C1&&C2 / C1) telescope to C1&&C2 / 1
        let c1 = atom(0, 1.0);
        let c12 = Sym::and(c1.clone(), atom(1, 2.0));
        let p = SymProb::new(c1.clone(), Sym::num(1.0));
        let cond = SymProb::new(c12.clone(), c1);
        let r = p.mul(&cond);
        assert_eq!(r.num.to_text(true), c12.to_text(true));
        assert_eq!(r.den.to_text(true), "1");
    }

    #[test]
    fn test_eval_conditional_probability() {
        // P(var_1 == 2 | var_0 == 1) with both uniform over {1, 2} is 1/2
        let d_cond = atom(0, 1.0);
        let n_cond = Sym::and(atom(1, 2.0), d_cond.clone());

        let mut dists = VarDists::new();
        dists.insert(0, DiscreteDist::uniform(1, 2));
        dists.insert(1, DiscreteDist::uniform(1, 2));
        let product = support_product(&dists);

        let prob = SymProb::new(n_cond, d_cond);
        let params = Params::new();
        assert_eq!(prob.eval(&params, 1.0, &dists, &product), 0.5);
    }

    #[test]
    fn test_eval_zero_denominator() {
        // Conditioning on an unsatisfiable event gives probability zero
        let never = Sym::and(atom(0, 1.0), atom(0, 2.0));
        let prob = SymProb::new(never.clone(), never);
        let mut dists = VarDists::new();
        dists.insert(0, DiscreteDist::uniform(1, 2));
        let product = support_product(&dists);
        assert_eq!(prob.eval(&Params::new(), 1.0, &dists, &product), 0.0);
    }

    #[test]
    fn test_query_text_format() {
        let d_cond = atom(0, 1.0);
        let n_cond = Sym::and(atom(1, 2.0), d_cond.clone());

        let mut dists = VarDists::new();
        dists.insert(0, DiscreteDist::uniform(1, 2));
        dists.insert(1, DiscreteDist::uniform(1, 2));
        let product = support_product(&dists);

        let prob = SymProb::new(n_cond, d_cond);
        let query = prob.query(QueryOp::Le, Sym::num(1.0), &dists, &product);

        let expected = "(((((0+(0.250000*[((var_1==2)&&(var_0==1)){0->1,1->1,}]))+(0.250000*[(\
                        (var_1==2)&&(var_0==1)){0->2,1->1,}]))+(0.250000*[((var_1==2)&&(var_0=\
                        =1)){0->1,1->2,}]))+(0.250000*[((var_1==2)&&(var_0==1)){0->2,1->2,}]))\
                        <=(((((0+(0.250000*[(var_0==1){0->1,1->1,}]))+(0.250000*[(var_0==1){0-\
                        >2,1->1,}]))+(0.250000*[(var_0==1){0->1,1->2,}]))+(0.250000*[(var_0==\
                        1){0->2,1->2,}]))*1))";
        assert_eq!(query.to_text(true), expected);
    }

    #[test]
    fn test_marginalize_weights_bernoulli() {
        // A biased coin: P(heads) = 0.3; the marginalised numerator of
        // (coin == 1)/1 evaluates to 0.3
        let heads = atom(0, 1.0);
        let prob = SymProb::new(heads, Sym::num(1.0));
        let mut dists = VarDists::new();
        dists.insert(0, DiscreteDist::bernoulli(0.3));
        let product = support_product(&dists);
        let value = prob.eval(&Params::new(), 1.0, &dists, &product);
        assert!((value - 0.3).abs() < 1e-6);
    }
}
