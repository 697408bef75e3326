//! Sparse gradients over input variables.

use std::collections::HashMap;
use std::ops::{Add, Mul, Sub};

/// A sparse gradient: variable id → partial derivative. Variables absent
/// from the map have derivative zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grad {
    pub val: HashMap<u32, f32>,
}

impl Grad {
    /// The zero gradient.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A unit gradient on a single variable.
    pub fn single(var: u32) -> Self {
        let mut val = HashMap::new();
        val.insert(var, 1.0);
        Self { val }
    }

    /// Elementwise absolute value.
    pub fn abs(&self) -> Self {
        let val = self.val.iter().map(|(&k, &v)| (k, v.abs())).collect();
        Self { val }
    }

    /// Whether every coordinate is zero.
    pub fn is_zero(&self) -> bool {
        self.val.values().all(|&v| v == 0.0)
    }
}

impl Add for Grad {
    type Output = Grad;

    fn add(self, other: Grad) -> Grad {
        let mut val = self.val;
        for (k, v) in other.val {
            *val.entry(k).or_insert(0.0) += v;
        }
        Grad { val }
    }
}

impl Sub for Grad {
    type Output = Grad;

    fn sub(self, other: Grad) -> Grad {
        let mut val = self.val;
        for (k, v) in other.val {
            *val.entry(k).or_insert(0.0) -= v;
        }
        Grad { val }
    }
}

impl Mul<f32> for Grad {
    type Output = Grad;

    fn mul(self, w: f32) -> Grad {
        let val = self.val.into_iter().map(|(k, v)| (k, v * w)).collect();
        Grad { val }
    }
}
