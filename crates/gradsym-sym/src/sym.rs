//! Symbolic terms and their differentiable-loss encoding.

use crate::grad::Grad;
use gradsym_ir::{is_integer, word_to_float, Mem, Word};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Shared reference to an immutable symbolic term.
pub type SymRef = Rc<Sym>;

/// Concrete parameter assignment: variable id → value.
pub type Params = HashMap<u32, f32>;

/// A symbolic term. Children are shared, never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Sym {
    Add(SymRef, SymRef),
    Sub(SymRef, SymRef),
    Mul(SymRef, SymRef),
    Eq(SymRef, SymRef),
    Lt(SymRef, SymRef),
    Le(SymRef, SymRef),
    And(SymRef, SymRef),
    Or(SymRef, SymRef),
    Not(SymRef),
    /// Literal word, reinterpreted as a float by numeric operations.
    Con(Word),
    /// Input variable.
    Any(u32),
    /// Counted sub-term: evaluates the wrapped predicate under `assign`
    /// overlaid on the ambient parameters, yielding 1 when it holds and 0
    /// otherwise. Used by probability marginalisation.
    Cnt {
        sub: SymRef,
        assign: BTreeMap<u32, f32>,
    },
}

impl Sym {
    // === Constructors ===

    pub fn con(word: Word) -> SymRef {
        Rc::new(Sym::Con(word))
    }

    /// Constant from a float value.
    pub fn num(val: f32) -> SymRef {
        Rc::new(Sym::Con(val.to_bits()))
    }

    pub fn any(var: u32) -> SymRef {
        Rc::new(Sym::Any(var))
    }

    pub fn add(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Add(l, r))
    }

    pub fn sub(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Sub(l, r))
    }

    pub fn mul(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Mul(l, r))
    }

    pub fn eq(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Eq(l, r))
    }

    pub fn lt(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Lt(l, r))
    }

    pub fn le(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Le(l, r))
    }

    pub fn and(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::And(l, r))
    }

    pub fn or(l: SymRef, r: SymRef) -> SymRef {
        Rc::new(Sym::Or(l, r))
    }

    pub fn not(s: SymRef) -> SymRef {
        Rc::new(Sym::Not(s))
    }

    pub fn cnt(sub: SymRef, assign: BTreeMap<u32, f32>) -> SymRef {
        Rc::new(Sym::Cnt { sub, assign })
    }

    /// Left-fold a slice of atoms into a single conjunction. Empty input
    /// has no conjunction.
    pub fn conj(atoms: &[SymRef]) -> Option<SymRef> {
        let mut iter = atoms.iter();
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, atom| Sym::and(acc, atom.clone())))
    }

    /// Whether this term is a boolean predicate rather than arithmetic.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Sym::Eq(..) | Sym::Lt(..) | Sym::Le(..) | Sym::And(..) | Sym::Or(..) | Sym::Not(..)
        )
    }

    // === Differentiable loss ===

    /// Evaluate the term as a loss under `params`. For a predicate, the
    /// result is `<= 0` exactly when the predicate holds; `eps` is the slack
    /// that makes strict inequalities and negations decidable.
    pub fn eval(&self, params: &Params, eps: f32) -> f32 {
        match self {
            Sym::Add(l, r) => l.eval(params, eps) + r.eval(params, eps),
            Sym::Sub(l, r) => l.eval(params, eps) - r.eval(params, eps),
            Sym::Mul(l, r) => l.eval(params, eps) * r.eval(params, eps),
            Sym::Con(word) => word_to_float(*word),
            Sym::Any(var) => params.get(var).copied().unwrap_or_default(),
            Sym::Eq(l, r) => (l.eval(params, eps) - r.eval(params, eps)).abs(),
            Sym::Not(s) => -s.eval(params, eps) + eps,
            Sym::And(l, r) => {
                l.eval(params, eps).max(0.0) + r.eval(params, eps).max(0.0)
            }
            Sym::Or(l, r) => l.eval(params, eps).max(0.0) * r.eval(params, eps).max(0.0),
            Sym::Lt(l, r) => l.eval(params, eps) - r.eval(params, eps) + eps,
            Sym::Le(l, r) => l.eval(params, eps) - r.eval(params, eps),
            Sym::Cnt { sub, assign } => {
                if !sub.is_predicate() {
                    return 1.0;
                }
                let mut extended = params.clone();
                for (&var, &val) in assign {
                    extended.insert(var, val);
                }
                if sub.eval(&extended, eps) <= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Gradient of the loss with respect to the input variables.
    pub fn grad(&self, params: &Params, eps: f32) -> Grad {
        match self {
            Sym::Add(l, r) => l.grad(params, eps) + r.grad(params, eps),
            Sym::Sub(l, r) => l.grad(params, eps) - r.grad(params, eps),
            Sym::Mul(l, r) => {
                l.grad(params, eps) * r.eval(params, eps)
                    + r.grad(params, eps) * l.eval(params, eps)
            }
            Sym::Con(_) => Grad::zero(),
            Sym::Any(var) => Grad::single(*var),
            Sym::Eq(l, r) => {
                let lv = l.eval(params, eps);
                let rv = r.eval(params, eps);
                if lv == rv {
                    Grad::zero()
                } else if lv > rv {
                    l.grad(params, eps) - r.grad(params, eps)
                } else {
                    r.grad(params, eps) - l.grad(params, eps)
                }
            }
            Sym::Not(s) => s.grad(params, eps) * -1.0,
            Sym::And(l, r) => {
                let mut result = Grad::zero();
                if l.eval(params, eps) > 0.0 {
                    result = result + l.grad(params, eps);
                }
                if r.eval(params, eps) > 0.0 {
                    result = result + r.grad(params, eps);
                }
                result
            }
            Sym::Or(l, r) => {
                let lv = l.eval(params, eps);
                let rv = r.eval(params, eps);
                if lv > 0.0 && rv > 0.0 {
                    l.grad(params, eps) * rv + r.grad(params, eps) * lv
                } else {
                    Grad::zero()
                }
            }
            Sym::Lt(l, r) | Sym::Le(l, r) => l.grad(params, eps) - r.grad(params, eps),
            Sym::Cnt { sub, assign } => {
                if !sub.is_predicate() {
                    return Grad::zero();
                }
                // A count moves opposite to the wrapped loss: lowering the
                // loss flips the indicator from 0 to 1.
                let mut extended = params.clone();
                for (&var, &val) in assign {
                    extended.insert(var, val);
                }
                let mut g = sub.grad(&extended, eps) * -1.0;
                for var in assign.keys() {
                    g.val.remove(var);
                }
                g
            }
        }
    }

    /// Collect the ids of free input variables into `result`. Variables
    /// bound by a count's assignment are not free.
    pub fn gather_var_ids(&self, result: &mut HashSet<u32>) {
        match self {
            Sym::Add(l, r)
            | Sym::Sub(l, r)
            | Sym::Mul(l, r)
            | Sym::Eq(l, r)
            | Sym::Lt(l, r)
            | Sym::Le(l, r)
            | Sym::And(l, r)
            | Sym::Or(l, r) => {
                l.gather_var_ids(result);
                r.gather_var_ids(result);
            }
            Sym::Not(s) => s.gather_var_ids(result),
            Sym::Any(var) => {
                result.insert(*var);
            }
            Sym::Con(_) => {}
            Sym::Cnt { sub, assign } => {
                let mut inner = HashSet::new();
                sub.gather_var_ids(&mut inner);
                for var in inner {
                    if !assign.contains_key(&var) {
                        result.insert(var);
                    }
                }
            }
        }
    }

    /// Substitute concrete memory into the term: every variable present in
    /// `mem` becomes a constant.
    pub fn concretize(&self, mem: &Mem) -> SymRef {
        match self {
            Sym::Any(var) => match mem.get(var) {
                Some(&word) => Sym::con(word),
                None => Sym::any(*var),
            },
            Sym::Con(word) => Sym::con(*word),
            Sym::Add(l, r) => Sym::add(l.concretize(mem), r.concretize(mem)),
            Sym::Sub(l, r) => Sym::sub(l.concretize(mem), r.concretize(mem)),
            Sym::Mul(l, r) => Sym::mul(l.concretize(mem), r.concretize(mem)),
            Sym::Eq(l, r) => Sym::eq(l.concretize(mem), r.concretize(mem)),
            Sym::Lt(l, r) => Sym::lt(l.concretize(mem), r.concretize(mem)),
            Sym::Le(l, r) => Sym::le(l.concretize(mem), r.concretize(mem)),
            Sym::And(l, r) => Sym::and(l.concretize(mem), r.concretize(mem)),
            Sym::Or(l, r) => Sym::or(l.concretize(mem), r.concretize(mem)),
            Sym::Not(s) => Sym::not(s.concretize(mem)),
            Sym::Cnt { sub, assign } => Sym::cnt(sub.concretize(mem), assign.clone()),
        }
    }

    // === Rendering ===

    /// Render the term. With `convert_to_num`, constants display as numbers
    /// (integral values without a fractional part); otherwise as raw words.
    /// The rendering is structurally deterministic: equal terms always
    /// produce equal strings, which is what the constraint cache keys on.
    pub fn to_text(&self, convert_to_num: bool) -> String {
        match self {
            Sym::Add(l, r) => {
                format!("({}+{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Sub(l, r) => {
                format!("({}-{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Mul(l, r) => {
                format!("({}*{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Eq(l, r) => {
                format!("({}=={})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Lt(l, r) => {
                format!("({}<{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Le(l, r) => {
                format!("({}<={})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::And(l, r) => {
                format!("({}&&{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Or(l, r) => {
                format!("({}||{})", l.to_text(convert_to_num), r.to_text(convert_to_num))
            }
            Sym::Not(s) => format!("!({})", s.to_text(convert_to_num)),
            Sym::Con(word) => {
                if convert_to_num {
                    render_float(word_to_float(*word))
                } else {
                    format!("{}", word)
                }
            }
            Sym::Any(var) => format!("var_{}", var),
            Sym::Cnt { sub, assign } => {
                let mut out = format!("[{}{{", sub.to_text(convert_to_num));
                for (var, val) in assign {
                    out.push_str(&format!("{}->{},", var, render_float(*val)));
                }
                out.push_str("}]");
                out
            }
        }
    }
}

/// Integral floats render without a fractional part, everything else with
/// six decimal places.
fn render_float(val: f32) -> String {
    if is_integer(val) {
        format!("{}", val as i64)
    } else {
        format!("{:.6}", val)
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradsym_ir::float_to_word;

    fn params(entries: &[(u32, f32)]) -> Params {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_con_eval_and_zero_grad() {
        let c = Sym::num(4.5);
        for p in [params(&[]), params(&[(0, 1.0)]), params(&[(0, -3.0)])] {
            assert_eq!(c.eval(&p, 1.0), 4.5);
            assert_eq!(c.grad(&p, 1.0), Grad::zero());
        }
    }

    #[test]
    fn test_le_boundary() {
        // a <= b holds iff loss <= 0
        let le = Sym::le(Sym::any(0), Sym::num(3.0));
        assert!(le.eval(&params(&[(0, 3.0)]), 1.0) <= 0.0);
        assert!(le.eval(&params(&[(0, 2.0)]), 1.0) <= 0.0);
        assert!(le.eval(&params(&[(0, 3.5)]), 1.0) > 0.0);
    }

    #[test]
    fn test_lt_boundary_with_eps() {
        // a < b holds iff a + eps <= b
        let lt = Sym::lt(Sym::any(0), Sym::num(3.0));
        assert!(lt.eval(&params(&[(0, 2.0)]), 1.0) <= 0.0);
        assert!(lt.eval(&params(&[(0, 2.5)]), 1.0) > 0.0);
        assert!(lt.eval(&params(&[(0, 2.5)]), 0.5) <= 0.0);
    }

    #[test]
    fn test_eq_is_absolute_difference() {
        let eq = Sym::eq(Sym::any(0), Sym::num(3.0));
        assert_eq!(eq.eval(&params(&[(0, 3.0)]), 1.0), 0.0);
        assert_eq!(eq.eval(&params(&[(0, 5.0)]), 1.0), 2.0);
        assert_eq!(eq.eval(&params(&[(0, 1.0)]), 1.0), 2.0);
    }

    #[test]
    fn test_not_flips_with_slack() {
        // !(a == 3) holds iff |a - 3| >= eps
        let ne = Sym::not(Sym::eq(Sym::any(0), Sym::num(3.0)));
        assert!(ne.eval(&params(&[(0, 3.0)]), 1.0) > 0.0);
        assert!(ne.eval(&params(&[(0, 4.0)]), 1.0) <= 0.0);
    }

    #[test]
    fn test_and_or_losses() {
        let a = Sym::le(Sym::any(0), Sym::num(0.0));
        let b = Sym::le(Sym::any(1), Sym::num(0.0));
        let both = Sym::and(a.clone(), b.clone());
        let either = Sym::or(a, b);

        let sat_both = params(&[(0, -1.0), (1, -1.0)]);
        let sat_one = params(&[(0, -1.0), (1, 5.0)]);
        let sat_none = params(&[(0, 2.0), (1, 5.0)]);

        assert!(both.eval(&sat_both, 1.0) <= 0.0);
        assert!(both.eval(&sat_one, 1.0) > 0.0);
        assert!(either.eval(&sat_one, 1.0) <= 0.0);
        assert!(either.eval(&sat_none, 1.0) > 0.0);
    }

    #[test]
    fn test_eq_subgradient_direction() {
        let eq = Sym::eq(Sym::any(0), Sym::num(3.0));
        // Left above right: gradient +1 on var 0
        let g = eq.grad(&params(&[(0, 5.0)]), 1.0);
        assert_eq!(g.val.get(&0), Some(&1.0));
        // Left below right: gradient -1 on var 0
        let g = eq.grad(&params(&[(0, 1.0)]), 1.0);
        assert_eq!(g.val.get(&0), Some(&-1.0));
        // At equality the subgradient vanishes
        let g = eq.grad(&params(&[(0, 3.0)]), 1.0);
        assert!(g.is_zero());
    }

    #[test]
    fn test_and_grad_only_active_side() {
        let a = Sym::le(Sym::any(0), Sym::num(0.0));
        let b = Sym::le(Sym::any(1), Sym::num(0.0));
        let both = Sym::and(a, b);
        // var 0 satisfied, var 1 violated: only var 1 contributes
        let g = both.grad(&params(&[(0, -5.0), (1, 2.0)]), 1.0);
        assert_eq!(g.val.get(&1), Some(&1.0));
        assert_eq!(g.val.get(&0), None);
    }

    #[test]
    fn test_mul_product_rule() {
        // d/dx (x * x) = 2x
        let sq = Sym::mul(Sym::any(0), Sym::any(0));
        let g = sq.grad(&params(&[(0, 4.0)]), 1.0);
        assert_eq!(g.val.get(&0), Some(&8.0));
    }

    #[test]
    fn test_cnt_counts_predicate() {
        let eq = Sym::eq(Sym::any(0), Sym::num(3.0));
        let cnt = Sym::cnt(eq, BTreeMap::new());
        assert_eq!(cnt.eval(&params(&[(0, 3.0)]), 1.0), 1.0);
        assert_eq!(cnt.eval(&params(&[(0, 7.0)]), 1.0), 0.0);
    }

    #[test]
    fn test_cnt_assignment_overrides_params() {
        let eq = Sym::eq(Sym::any(0), Sym::num(3.0));
        let mut assign = BTreeMap::new();
        assign.insert(0, 3.0);
        let cnt = Sym::cnt(eq, assign);
        // Ambient params say 7, the pinned assignment says 3
        assert_eq!(cnt.eval(&params(&[(0, 7.0)]), 1.0), 1.0);
    }

    #[test]
    fn test_cnt_arithmetic_sub_is_one() {
        let cnt = Sym::cnt(Sym::add(Sym::any(0), Sym::num(1.0)), BTreeMap::new());
        assert_eq!(cnt.eval(&params(&[(0, 9.0)]), 1.0), 1.0);
        assert!(cnt.grad(&params(&[(0, 9.0)]), 1.0).is_zero());
    }

    #[test]
    fn test_gather_var_ids() {
        let term = Sym::and(
            Sym::eq(Sym::any(2), Sym::num(1.0)),
            Sym::lt(Sym::any(5), Sym::any(2)),
        );
        let mut ids = HashSet::new();
        term.gather_var_ids(&mut ids);
        assert_eq!(ids, HashSet::from([2, 5]));
    }

    #[test]
    fn test_gather_skips_bound_vars() {
        let mut assign = BTreeMap::new();
        assign.insert(0, 1.0);
        let cnt = Sym::cnt(Sym::eq(Sym::any(0), Sym::any(1)), assign);
        let mut ids = HashSet::new();
        cnt.gather_var_ids(&mut ids);
        assert_eq!(ids, HashSet::from([1]));
    }

    #[test]
    fn test_concretize_substitutes_memory() {
        let mut mem = Mem::new();
        mem.insert(1, float_to_word(1.0));
        let cond = Sym::eq(Sym::any(1), Sym::num(4.0));
        let simplified = cond.concretize(&mem);
        assert_eq!(simplified.to_text(true), "(1==4)");
        // Variables outside memory stay symbolic
        let cond = Sym::eq(Sym::any(2), Sym::num(4.0));
        assert_eq!(cond.concretize(&mem).to_text(true), "(var_2==4)");
    }

    #[test]
    fn test_text_rendering() {
        let term = Sym::and(
            Sym::eq(Sym::any(1), Sym::num(2.0)),
            Sym::not(Sym::lt(Sym::num(2.5), Sym::any(0))),
        );
        assert_eq!(term.to_text(true), "((var_1==2)&&!((2.500000<var_0)))");
    }

    #[test]
    fn test_text_raw_words() {
        let c = Sym::num(1.0);
        assert_eq!(c.to_text(true), "1");
        assert_eq!(c.to_text(false), format!("{}", 1.0f32.to_bits()));
    }

    #[test]
    fn test_text_is_structurally_deterministic() {
        let make = || {
            Sym::or(
                Sym::le(Sym::any(0), Sym::num(3.5)),
                Sym::eq(Sym::any(1), Sym::num(7.0)),
            )
        };
        assert_eq!(make().to_text(true), make().to_text(true));
        assert_eq!(make().to_text(false), make().to_text(false));
    }
}
