//! Built-in backends.
//!
//! | id       | method                                   | timeout |
//! |----------|------------------------------------------|---------|
//! | `ipm`    | primal-dual interior point, log barrier  | yes     |
//! | `sqp`    | SQP with pluggable QP sub-solver         | no      |
//! | `auglag` | augmented Lagrangian, L-BFGS inner solve | no      |
//!
//! All of them eliminate fixed variables (`lbx == ubx`) before iterating
//! and recover their multipliers from the reduced gradient afterwards.

mod auglag;
mod ipm;
mod sqp;

pub use auglag::{AugLagBackend, AugLagSettings};
pub use ipm::{IpmBackend, IpmSettings};
pub use sqp::{SqpBackend, SqpSettings};

use std::collections::BTreeMap;

use nlpsol_core::bounds::{is_fixed, violation};
use nlpsol_core::{BufferSet, NlpFunctions, Problem};

use crate::linalg::DenseMatrix;
use crate::multipliers::fill_fixed_variable_multipliers;
use crate::traits::{RawResult, RawStatus};

/// View of a problem with fixed variables removed.
pub(crate) struct Reduced<'a> {
    functions: &'a NlpFunctions,
    p: &'a [f64],
    lbx_full: &'a [f64],
    ubx_full: &'a [f64],
    pub lbg: &'a [f64],
    pub ubg: &'a [f64],
    /// Indices of the free variables in the full vector.
    pub free: Vec<usize>,
    pub lbx: Vec<f64>,
    pub ubx: Vec<f64>,
    template: Vec<f64>,
    start: Vec<f64>,
}

impl<'a> Reduced<'a> {
    pub fn new(problem: &'a Problem, buffers: &'a BufferSet) -> Self {
        let lbx_full = buffers.lbx();
        let ubx_full = buffers.ubx();
        let guess = buffers.initial_guess();
        let free: Vec<usize> = (0..lbx_full.len())
            .filter(|&i| !is_fixed(lbx_full[i], ubx_full[i]))
            .collect();
        let template: Vec<f64> = guess
            .iter()
            .enumerate()
            .map(|(i, v)| if is_fixed(lbx_full[i], ubx_full[i]) { lbx_full[i] } else { *v })
            .collect();
        Self {
            functions: problem.functions(),
            p: buffers.p(),
            lbx_full,
            ubx_full,
            lbg: buffers.lbg(),
            ubg: buffers.ubg(),
            lbx: free.iter().map(|&i| lbx_full[i]).collect(),
            ubx: free.iter().map(|&i| ubx_full[i]).collect(),
            start: free.iter().map(|&i| guess[i]).collect(),
            free,
            template,
        }
    }

    pub fn n(&self) -> usize {
        self.free.len()
    }

    pub fn k(&self) -> usize {
        self.functions.n_g()
    }

    /// Initial guess restricted to the free variables.
    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn restrict(&self, full: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }

    pub fn expand(&self, x: &[f64]) -> Vec<f64> {
        let mut full = self.template.clone();
        for (&i, v) in self.free.iter().zip(x) {
            full[i] = *v;
        }
        full
    }

    pub fn f(&self, x: &[f64]) -> f64 {
        self.functions.eval_f(&self.expand(x), self.p)
    }

    pub fn grad_f(&self, x: &[f64]) -> Vec<f64> {
        self.restrict(&self.functions.eval_grad_f(&self.expand(x), self.p))
    }

    pub fn g(&self, x: &[f64]) -> Vec<f64> {
        self.functions.eval_g(&self.expand(x), self.p)
    }

    /// `k × n_free` Jacobian.
    pub fn jac_g(&self, x: &[f64]) -> DenseMatrix {
        self.functions
            .eval_jac_g(&self.expand(x), self.p)
            .iter()
            .map(|row| self.restrict(row))
            .collect()
    }

    pub fn hess_lag(&self, x: &[f64], sigma: f64, lam_g: &[f64]) -> DenseMatrix {
        let full = self.functions.eval_hess_lag(&self.expand(x), self.p, sigma, lam_g);
        self.free.iter().map(|&i| self.restrict(&full[i])).collect()
    }

    /// Largest violation of the constraint bounds at constraint values `g`.
    pub fn constraint_violation(&self, g: &[f64]) -> f64 {
        g.iter()
            .enumerate()
            .map(|(j, v)| violation(*v, self.lbg[j], self.ubg[j]))
            .fold(0.0, f64::max)
    }

    /// Assemble the full-length result for the free point `x`.
    pub fn finish(
        &self,
        x: &[f64],
        lam_x_free: &[f64],
        lam_g: Vec<f64>,
        iterations: usize,
        status: RawStatus,
        message: impl Into<String>,
    ) -> RawResult {
        let full_x = self.expand(x);
        let mut lam_x = vec![0.0; full_x.len()];
        for (&i, v) in self.free.iter().zip(lam_x_free) {
            lam_x[i] = *v;
        }
        if self.free.len() < full_x.len() {
            let grad = self.functions.eval_grad_f(&full_x, self.p);
            let jac = self.functions.eval_jac_g(&full_x, self.p);
            fill_fixed_variable_multipliers(&mut lam_x, &grad, &jac, &lam_g, self.lbx_full, self.ubx_full);
        }
        RawResult {
            f: self.functions.eval_f(&full_x, self.p),
            g: self.functions.eval_g(&full_x, self.p),
            x: full_x,
            lam_x,
            lam_g,
            iterations,
            status,
            message: message.into(),
            extras: BTreeMap::new(),
        }
    }

    /// Every variable is fixed: the point is determined, only feasibility
    /// of the constraints remains to be checked.
    pub fn solve_without_free_variables(&self, tol: f64) -> RawResult {
        let g = self.g(&[]);
        let status = if self.constraint_violation(&g) <= tol {
            RawStatus::Solved
        } else {
            RawStatus::Infeasible
        };
        self.finish(&[], &[], vec![0.0; self.k()], 0, status, "all variables fixed")
    }
}

/// Clamp `x` into `[lo, hi]` componentwise.
pub(crate) fn project(x: &mut [f64], lo: &[f64], hi: &[f64]) {
    for ((xi, l), u) in x.iter_mut().zip(lo).zip(hi) {
        *xi = xi.max(*l).min(*u);
    }
}

pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::Expr;

    fn sample() -> (Problem, BufferSet) {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let problem = Problem::builder()
            .variables([x.clone(), y.clone()])
            .objective(x.powi(2) + 3.0 * &y)
            .constraint(&x + &y)
            .build()
            .unwrap();
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("lbx", &[-5.0, 2.0]).unwrap();
        buffers.set("ubx", &[5.0, 2.0]).unwrap();
        (problem, buffers)
    }

    #[test]
    fn test_fixed_variables_eliminated() {
        let (problem, buffers) = sample();
        let reduced = Reduced::new(&problem, &buffers);
        assert_eq!(reduced.free, vec![0]);
        assert_eq!(reduced.expand(&[1.5]), vec![1.5, 2.0]);
        assert_eq!(reduced.grad_f(&[1.5]), vec![3.0]);
        assert_eq!(reduced.jac_g(&[1.5]), vec![vec![1.0]]);
        assert_eq!(reduced.f(&[1.5]), 2.25 + 6.0);
    }

    #[test]
    fn test_finish_recovers_fixed_multiplier() {
        let (problem, buffers) = sample();
        let reduced = Reduced::new(&problem, &buffers);
        let raw = reduced.finish(&[0.0], &[0.0], vec![-1.0], 3, RawStatus::Solved, "");
        // ∂f/∂y + lam_g = 3 - 1
        assert_eq!(raw.lam_x, vec![0.0, -2.0]);
        assert_eq!(raw.g, vec![2.0]);
        assert_eq!(raw.iterations, 3);
    }

    #[test]
    fn test_all_fixed() {
        let (problem, mut buffers) = sample();
        buffers.set("lbx", &[1.0, 2.0]).unwrap();
        buffers.set("ubx", &[1.0, 2.0]).unwrap();
        buffers.set("ubg", &[2.5]).unwrap();
        let reduced = Reduced::new(&problem, &buffers);
        assert_eq!(reduced.solve_without_free_variables(1e-8).status, RawStatus::Infeasible);
        buffers.set("ubg", &[3.0]).unwrap();
        let reduced = Reduced::new(&problem, &buffers);
        let raw = reduced.solve_without_free_variables(1e-8);
        assert_eq!(raw.status, RawStatus::Solved);
        assert_eq!(raw.lam_x, vec![-2.0, -3.0]);
    }
}
