//! Goldfarb–Idnani dual active-set method for strictly convex QPs.
//!
//! Starts from the unconstrained minimizer and adds violated constraints
//! one at a time, dropping active inequalities whose multiplier would turn
//! negative. Every iterate is dual feasible, so the first primal feasible
//! point is optimal.

use tracing::trace;

use super::{QpError, QpProblem, QpSolution, QpSolver};
use crate::linalg::{cholesky, dot, lu_solve, norm_inf, zeros, DenseMatrix, SpdFactor};

#[derive(Debug, Clone)]
pub struct ActiveSetConfig {
    /// Maximum number of constraint additions and removals (default: 500)
    pub max_iter: usize,
    /// Relative violation below which a constraint is satisfied (default: 1e-9)
    pub feasibility_tol: f64,
}

impl Default for ActiveSetConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            feasibility_tol: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Row(usize),
    Var(usize),
}

/// `normalᵀ d ≥ rhs`, or `=` for equalities.
#[derive(Debug, Clone)]
struct Constraint {
    normal: Vec<f64>,
    rhs: f64,
    source: Source,
    /// Factor mapping the internal multiplier onto the source multiplier.
    weight: f64,
    equality: bool,
}

impl Constraint {
    fn slack(&self, d: &[f64]) -> f64 {
        dot(&self.normal, d) - self.rhs
    }

    fn flip(&mut self) {
        for v in &mut self.normal {
            *v = -*v;
        }
        self.rhs = -self.rhs;
        self.weight = -self.weight;
    }
}

fn collect_constraints(qp: &QpProblem) -> Vec<Constraint> {
    let n = qp.n();
    let mut out = Vec::new();
    let mut push_pair = |normal: Vec<f64>, lo: f64, hi: f64, source: Source| {
        if lo == hi && lo.is_finite() {
            out.push(Constraint {
                normal,
                rhs: lo,
                source,
                weight: 1.0,
                equality: true,
            });
            return;
        }
        if lo.is_finite() {
            out.push(Constraint {
                normal: normal.clone(),
                rhs: lo,
                source,
                weight: 1.0,
                equality: false,
            });
        }
        if hi.is_finite() {
            out.push(Constraint {
                normal: normal.iter().map(|v| -v).collect(),
                rhs: -hi,
                source,
                weight: -1.0,
                equality: false,
            });
        }
    };
    for (j, row) in qp.a.iter().enumerate() {
        push_pair(row.clone(), qp.lba[j], qp.uba[j], Source::Row(j));
    }
    for i in 0..n {
        let mut unit = vec![0.0; n];
        unit[i] = 1.0;
        push_pair(unit, qp.lbx[i], qp.ubx[i], Source::Var(i));
    }
    // equalities go first
    out.sort_by_key(|c| !c.equality);
    out
}

pub struct ActiveSetQp {
    config: ActiveSetConfig,
}

impl ActiveSetQp {
    pub fn new(config: ActiveSetConfig) -> Self {
        Self { config }
    }
}

impl Default for ActiveSetQp {
    fn default() -> Self {
        Self::new(ActiveSetConfig::default())
    }
}

struct Workspace<'a> {
    h: &'a DenseMatrix,
    chol: SpdFactor,
    cons: Vec<Constraint>,
    x: Vec<f64>,
    active: Vec<usize>,
    u: Vec<f64>,
    iterations: usize,
    max_iter: usize,
    tol: f64,
}

impl Workspace<'_> {
    /// Primal direction `z` and dual direction `r` for adding `p`:
    /// `[[H, N], [Nᵀ, 0]] [z; r] = [n_p; 0]`.
    fn directions(&self, p: usize) -> Result<(Vec<f64>, Vec<f64>), QpError> {
        let n = self.x.len();
        let k = self.active.len();
        let mut kkt = zeros(n + k, n + k);
        for i in 0..n {
            kkt[i][..n].copy_from_slice(&self.h[i]);
        }
        for (col, &a) in self.active.iter().enumerate() {
            for i in 0..n {
                kkt[i][n + col] = self.cons[a].normal[i];
                kkt[n + col][i] = self.cons[a].normal[i];
            }
        }
        let mut rhs = vec![0.0; n + k];
        rhs[..n].copy_from_slice(&self.cons[p].normal);
        let sol = lu_solve(&kkt, &rhs)
            .map_err(|e| QpError::Numerical(format!("active set system: {}", e)))?;
        Ok((sol[..n].to_vec(), sol[n..].to_vec()))
    }

    fn tick(&mut self) -> Result<(), QpError> {
        self.iterations += 1;
        if self.iterations > self.max_iter {
            return Err(QpError::MaxIterations(self.max_iter));
        }
        Ok(())
    }

    fn remove_active(&mut self, j: usize) {
        trace!(constraint = self.active[j], "dropping constraint");
        self.active.remove(j);
        self.u.remove(j);
    }

    /// Bring constraint `p` into the active set, dropping inequalities as
    /// needed. Returns `false` when `p` is a redundant, satisfied equality.
    fn add(&mut self, p: usize) -> Result<bool, QpError> {
        let scale = norm_inf(&self.chol.solve(&self.cons[p].normal)).max(1e-300);
        let mut u_p = 0.0;
        loop {
            self.tick()?;
            let s = self.cons[p].slack(&self.x);
            let (z, r) = self.directions(p)?;
            let z_zero = norm_inf(&z) <= 1e-9 * scale;

            let mut t1 = f64::INFINITY;
            let mut drop = None;
            for (j, &a) in self.active.iter().enumerate() {
                if !self.cons[a].equality && r[j] > 0.0 {
                    let t = self.u[j] / r[j];
                    if t < t1 {
                        t1 = t;
                        drop = Some(j);
                    }
                }
            }
            if z_zero && self.cons[p].equality && s.abs() <= self.tol * (1.0 + self.cons[p].rhs.abs()) {
                return Ok(false);
            }
            let t2 = if z_zero {
                f64::INFINITY
            } else {
                (-s / dot(&z, &self.cons[p].normal)).max(0.0)
            };

            if t1.is_infinite() && t2.is_infinite() {
                return Err(QpError::Infeasible(format!(
                    "constraint {:?} cannot be satisfied together with the active set",
                    self.cons[p].source
                )));
            }

            let t = t1.min(t2);
            if !z_zero {
                for (xi, zi) in self.x.iter_mut().zip(&z) {
                    *xi += t * zi;
                }
            }
            for (uj, rj) in self.u.iter_mut().zip(&r) {
                *uj -= t * rj;
            }
            u_p += t;

            if t2 <= t1 {
                self.active.push(p);
                self.u.push(u_p);
                return Ok(true);
            }
            if let Some(j) = drop {
                self.remove_active(j);
            }
        }
    }

    fn most_violated(&self) -> Option<usize> {
        let mut worst = None;
        let mut worst_s = 0.0;
        for (i, c) in self.cons.iter().enumerate() {
            if c.equality || self.active.contains(&i) {
                continue;
            }
            let s = c.slack(&self.x);
            if s < -self.tol * (1.0 + c.rhs.abs()) && s < worst_s {
                worst_s = s;
                worst = Some(i);
            }
        }
        worst
    }
}

impl QpSolver for ActiveSetQp {
    fn name(&self) -> &'static str {
        "active_set"
    }

    fn solve(&self, qp: &QpProblem) -> Result<QpSolution, QpError> {
        let n = qp.n();
        let chol = cholesky(&qp.h)
            .ok_or_else(|| QpError::Numerical("Hessian is not positive definite".into()))?;
        let neg_c: Vec<f64> = qp.c.iter().map(|v| -v).collect();
        let x = chol.solve(&neg_c);

        let mut ws = Workspace {
            h: &qp.h,
            chol,
            cons: collect_constraints(qp),
            x,
            active: Vec::new(),
            u: Vec::new(),
            iterations: 0,
            max_iter: self.config.max_iter,
            tol: self.config.feasibility_tol,
        };

        let n_eq = ws.cons.iter().take_while(|c| c.equality).count();
        for p in 0..n_eq {
            if ws.cons[p].slack(&ws.x) > 0.0 {
                ws.cons[p].flip();
            }
            ws.add(p)?;
        }
        while let Some(p) = ws.most_violated() {
            ws.add(p)?;
        }

        let mut lam_a = vec![0.0; qp.m()];
        let mut lam_x = vec![0.0; n];
        for (&a, &u) in ws.active.iter().zip(&ws.u) {
            let c = &ws.cons[a];
            let value = -c.weight * u;
            match c.source {
                Source::Row(j) => lam_a[j] += value,
                Source::Var(i) => lam_x[i] += value,
            }
        }
        trace!(iterations = ws.iterations, active = ws.active.len(), "active set QP solved");
        Ok(QpSolution {
            objective: qp.objective(&ws.x),
            x: ws.x,
            lam_a,
            lam_x,
            iterations: ws.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::test_problems;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
    }

    #[test]
    fn test_qp2_with_fixed_variable() {
        let sol = ActiveSetQp::default().solve(&test_problems::qp2()).unwrap();
        assert_close(sol.x[0], 0.5);
        assert_close(sol.x[1], 1.25);
        assert_close(sol.lam_x[0], 4.75);
        assert_close(sol.lam_x[1], 0.0);
        assert_close(sol.lam_a[0], 0.0);
        assert_close(sol.lam_a[1], 2.0);
        assert_close(sol.lam_a[2], 0.0);
        assert_close(sol.objective, -7.4375);
    }

    #[test]
    fn test_triangle_vertex() {
        let sol = ActiveSetQp::default().solve(&test_problems::triangle()).unwrap();
        assert_close(sol.x[0], 2.0 / 3.0);
        assert_close(sol.x[1], 4.0 / 3.0);
        assert_close(sol.lam_a[0], 28.0 / 9.0);
        assert_close(sol.lam_a[1], 4.0 / 9.0);
        assert_close(sol.objective, -74.0 / 9.0);
    }

    #[test]
    fn test_box_signs() {
        let sol = ActiveSetQp::default().solve(&test_problems::box_only()).unwrap();
        assert_close(sol.x[0], 1.0);
        assert_close(sol.x[1], -0.5);
        // upper bound active: positive, lower bound active: negative
        assert_close(sol.lam_x[0], 2.0);
        assert_close(sol.lam_x[1], -1.0);
    }

    #[test]
    fn test_equality_multiplier() {
        let sol = ActiveSetQp::default().solve(&test_problems::with_equality()).unwrap();
        assert_close(sol.x[0], 0.5);
        assert_close(sol.x[1], 0.5);
        assert_close(sol.lam_a[0], -1.0);
    }

    #[test]
    fn test_infeasible_detected() {
        let err = ActiveSetQp::default().solve(&test_problems::infeasible()).unwrap_err();
        assert!(matches!(err, QpError::Infeasible(_)), "{:?}", err);
    }

    #[test]
    fn test_rejects_indefinite_hessian() {
        let mut qp = test_problems::triangle();
        qp.h = vec![vec![1.0, -1.0], vec![-1.0, -2.0]];
        assert!(matches!(
            ActiveSetQp::default().solve(&qp),
            Err(QpError::Numerical(_))
        ));
    }
}
