//! Propositional layer: atom abstraction and a DPLL procedure.
//!
//! Each syntactically distinct atom of a path constraint becomes a
//! propositional variable named by its rendered text; the boolean skeleton
//! (and/or/not over those atoms) becomes a [`BoolExpr`] tree. DPLL then
//! proposes polarity assignments for the atoms, which the numeric layer
//! turns into signed conjunctions.

use gradsym_sym::{Sym, SymRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

/// Shared reference to a propositional expression.
pub type ExprRef = Rc<BoolExpr>;

/// Atom-name → polarity assignment produced by DPLL. Ordered so that the
/// derived conjunction order is deterministic.
pub type Assignments = BTreeMap<String, bool>;

/// Occurrence polarity of an atom within an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Mixed,
}

/// A propositional expression.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolExpr {
    Var(String),
    And(ExprRef, ExprRef),
    Or(ExprRef, ExprRef),
    Not(ExprRef),
    Const(bool),
}

impl BoolExpr {
    pub fn var(name: impl Into<String>) -> ExprRef {
        Rc::new(BoolExpr::Var(name.into()))
    }

    pub fn and(l: ExprRef, r: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::And(l, r))
    }

    pub fn or(l: ExprRef, r: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::Or(l, r))
    }

    pub fn not(e: ExprRef) -> ExprRef {
        Rc::new(BoolExpr::Not(e))
    }

    pub fn constant(value: bool) -> ExprRef {
        Rc::new(BoolExpr::Const(value))
    }

    /// The set of atom names appearing in the expression.
    pub fn literals(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_literals(&mut out);
        out
    }

    fn collect_literals(&self, out: &mut HashSet<String>) {
        match self {
            BoolExpr::Var(name) => {
                out.insert(name.clone());
            }
            BoolExpr::And(l, r) | BoolExpr::Or(l, r) => {
                l.collect_literals(out);
                r.collect_literals(out);
            }
            BoolExpr::Not(e) => e.collect_literals(out),
            BoolExpr::Const(_) => {}
        }
    }

    /// Occurrence polarity of `var` across the expression, if it occurs.
    /// Complex negations are opaque; callers normalise negations first.
    pub fn literal_polarity(&self, var: &str) -> Option<Polarity> {
        match self {
            BoolExpr::Var(name) => (name == var).then_some(Polarity::Positive),
            BoolExpr::Not(e) => match &**e {
                BoolExpr::Var(name) => (name == var).then_some(Polarity::Negative),
                _ => None,
            },
            BoolExpr::And(l, r) | BoolExpr::Or(l, r) => {
                match (l.literal_polarity(var), r.literal_polarity(var)) {
                    (None, p) | (p, None) => p,
                    (Some(a), Some(b)) if a == b => Some(a),
                    _ => Some(Polarity::Mixed),
                }
            }
            BoolExpr::Const(_) => None,
        }
    }

    /// Split a CNF expression into its conjuncts.
    pub fn clauses(&self) -> Vec<ExprRef> {
        match self {
            BoolExpr::And(l, r) => {
                let mut out = l.clauses();
                out.extend(r.clauses());
                out
            }
            _ => vec![Rc::new(self.clone())],
        }
    }

    /// If this clause is a bare literal, its name and polarity.
    pub fn unit_clause(&self) -> Option<(String, bool)> {
        match self {
            BoolExpr::Var(name) => Some((name.clone(), true)),
            BoolExpr::Not(e) => match &**e {
                BoolExpr::Var(name) => Some((name.clone(), false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Substitute a truth value for a variable. Constants are unchanged.
    pub fn guess_var(&self, var: &str, val: bool) -> ExprRef {
        match self {
            BoolExpr::Var(name) => {
                if name == var {
                    BoolExpr::constant(val)
                } else {
                    Rc::new(self.clone())
                }
            }
            BoolExpr::And(l, r) => BoolExpr::and(l.guess_var(var, val), r.guess_var(var, val)),
            BoolExpr::Or(l, r) => BoolExpr::or(l.guess_var(var, val), r.guess_var(var, val)),
            BoolExpr::Not(e) => BoolExpr::not(e.guess_var(var, val)),
            BoolExpr::Const(_) => Rc::new(self.clone()),
        }
    }

    /// Fold trivial `true`/`false` children.
    pub fn simplify(&self) -> ExprRef {
        match self {
            BoolExpr::And(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                match (&*l, &*r) {
                    (BoolExpr::Const(false), _) | (_, BoolExpr::Const(false)) => {
                        BoolExpr::constant(false)
                    }
                    (BoolExpr::Const(true), _) => r.clone(),
                    (_, BoolExpr::Const(true)) => l.clone(),
                    _ => BoolExpr::and(l, r),
                }
            }
            BoolExpr::Or(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                match (&*l, &*r) {
                    (BoolExpr::Const(true), _) | (_, BoolExpr::Const(true)) => {
                        BoolExpr::constant(true)
                    }
                    (BoolExpr::Const(false), _) => r.clone(),
                    (_, BoolExpr::Const(false)) => l.clone(),
                    _ => BoolExpr::or(l, r),
                }
            }
            BoolExpr::Not(e) => {
                let e = e.simplify();
                match &*e {
                    BoolExpr::Const(value) => BoolExpr::constant(!*value),
                    _ => BoolExpr::not(e),
                }
            }
            _ => Rc::new(self.clone()),
        }
    }

    /// Push negations down to literals: De Morgan plus double-negation
    /// elimination.
    pub fn fix_negations(&self) -> ExprRef {
        match self {
            BoolExpr::And(l, r) => BoolExpr::and(l.fix_negations(), r.fix_negations()),
            BoolExpr::Or(l, r) => BoolExpr::or(l.fix_negations(), r.fix_negations()),
            BoolExpr::Not(e) => match &**e {
                BoolExpr::Const(value) => BoolExpr::constant(!*value),
                BoolExpr::Var(_) => Rc::new(self.clone()),
                BoolExpr::Not(inner) => inner.fix_negations(),
                BoolExpr::And(l, r) => BoolExpr::or(
                    BoolExpr::not(l.clone()).fix_negations(),
                    BoolExpr::not(r.clone()).fix_negations(),
                ),
                BoolExpr::Or(l, r) => BoolExpr::and(
                    BoolExpr::not(l.clone()).fix_negations(),
                    BoolExpr::not(r.clone()).fix_negations(),
                ),
            },
            _ => Rc::new(self.clone()),
        }
    }

    /// One round of distributing or over and.
    pub fn distribute(&self) -> ExprRef {
        match self {
            BoolExpr::Or(l, r) => {
                if let BoolExpr::And(rl, rr) = &**r {
                    BoolExpr::and(
                        BoolExpr::or(l.distribute(), rl.distribute()),
                        BoolExpr::or(l.distribute(), rr.distribute()),
                    )
                } else if let BoolExpr::And(ll, lr) = &**l {
                    BoolExpr::and(
                        BoolExpr::or(r.distribute(), ll.distribute()),
                        BoolExpr::or(r.distribute(), lr.distribute()),
                    )
                } else {
                    BoolExpr::or(l.distribute(), r.distribute())
                }
            }
            BoolExpr::And(l, r) => BoolExpr::and(l.distribute(), r.distribute()),
            BoolExpr::Not(e) => BoolExpr::not(e.distribute()),
            _ => Rc::new(self.clone()),
        }
    }

    /// The first free variable of the expression, if any.
    pub fn free_var(&self) -> Option<String> {
        match self {
            BoolExpr::Var(name) => Some(name.clone()),
            BoolExpr::And(l, r) | BoolExpr::Or(l, r) => l.free_var().or_else(|| r.free_var()),
            BoolExpr::Not(e) => e.free_var(),
            BoolExpr::Const(_) => None,
        }
    }

    /// Value of a folded constant; anything unresolved counts as false.
    pub fn un_const(&self) -> bool {
        matches!(self, BoolExpr::Const(true))
    }
}

/// Convert to conjunctive normal form: fixpoint of negation-pushing and
/// distribution.
pub fn cnf(expr: &ExprRef) -> ExprRef {
    let next = expr.fix_negations().distribute();
    if *next == **expr {
        next
    } else {
        cnf(&next)
    }
}

/// Assign every atom that occurs with a single polarity, recording the
/// assignments. Available as an optimisation; the production solve path
/// does not apply it.
pub fn literal_elimination(expr: &ExprRef, assignments: &mut Assignments) -> ExprRef {
    let mut result = expr.clone();
    for var in expr.literals() {
        match expr.literal_polarity(&var) {
            Some(Polarity::Positive) => {
                result = result.guess_var(&var, true);
                assignments.insert(var, true);
            }
            Some(Polarity::Negative) => {
                result = result.guess_var(&var, false);
                assignments.insert(var, false);
            }
            _ => {}
        }
    }
    result
}

/// Apply unit propagation: every clause that is a bare literal forces its
/// atom's polarity.
pub fn unit_propagation(expr: &ExprRef, assignments: &mut Assignments) -> ExprRef {
    let mut result = expr.clone();
    for clause in expr.clauses() {
        if let Some((var, val)) = clause.unit_clause() {
            result = result.guess_var(&var, val);
            assignments.insert(var, val);
        }
    }
    result
}

/// DPLL satisfiability. On success, `assignments` holds a satisfying
/// polarity for every decided atom.
pub fn satisfiable_dpll(expr: &ExprRef, assignments: &mut Assignments) -> bool {
    let propagated = unit_propagation(expr, assignments);
    let skeleton = cnf(&propagated);

    let Some(var) = skeleton.free_var() else {
        // Everything is decided; the propagated expression folds to a
        // constant that carries the verdict.
        return propagated.simplify().un_const();
    };

    let true_guess = expr.guess_var(&var, true).simplify();
    let mut true_assignments = assignments.clone();
    true_assignments.insert(var.clone(), true);
    if satisfiable_dpll(&true_guess, &mut true_assignments) {
        *assignments = true_assignments;
        return true;
    }

    let false_guess = expr.guess_var(&var, false).simplify();
    let mut false_assignments = assignments.clone();
    false_assignments.insert(var, false);
    if satisfiable_dpll(&false_guess, &mut false_assignments) {
        *assignments = false_assignments;
        return true;
    }

    false
}

/// Abstract a path-constraint conjunction into a propositional expression.
/// Boolean combinators keep their structure; every other node becomes an
/// atom named by its rendered text. `unique_terms` maps each atom name back
/// to the term it stands for.
pub fn pathconstraints_to_expr(
    constraints: &[SymRef],
    unique_terms: &mut HashMap<String, SymRef>,
) -> ExprRef {
    if constraints.is_empty() {
        return BoolExpr::constant(true);
    }
    let mut expr = sym_to_expr(&constraints[0], unique_terms);
    for constraint in &constraints[1..] {
        expr = BoolExpr::and(expr, sym_to_expr(constraint, unique_terms));
    }
    expr
}

fn sym_to_expr(sym: &SymRef, unique_terms: &mut HashMap<String, SymRef>) -> ExprRef {
    match &**sym {
        Sym::And(l, r) => BoolExpr::and(
            sym_to_expr(l, unique_terms),
            sym_to_expr(r, unique_terms),
        ),
        Sym::Or(l, r) => BoolExpr::or(
            sym_to_expr(l, unique_terms),
            sym_to_expr(r, unique_terms),
        ),
        Sym::Not(e) => BoolExpr::not(sym_to_expr(e, unique_terms)),
        _ => {
            let name = sym.to_text(true);
            unique_terms.insert(name.clone(), sym.clone());
            BoolExpr::var(name)
        }
    }
}
