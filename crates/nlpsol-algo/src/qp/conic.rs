//! QP sub-solver backed by the Clarabel conic interior-point solver.
//!
//! Clarabel solves `min ½xᵀPx + qᵀx  s.t.  Ax + s = b, s ∈ K`. Equalities
//! (and fixed variables) become zero-cone rows; every finite upper bound
//! becomes a nonnegative-cone row `a x ≤ u`, every finite lower bound a row
//! `-a x ≤ -l`.

use clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettingsBuilder, IPSolver, SupportedConeT},
};

use super::{QpError, QpProblem, QpSolution, QpSolver};
use crate::linalg::cholesky;

#[derive(Debug, Clone)]
pub struct ClarabelQpConfig {
    /// Maximum interior point iterations (default: 200)
    pub max_iter: u32,
    /// Primal/dual feasibility tolerance (default: 1e-10)
    pub tol_feas: f64,
    /// Absolute duality gap tolerance (default: 1e-10)
    pub tol_gap_abs: f64,
    /// Relative duality gap tolerance (default: 1e-10)
    pub tol_gap_rel: f64,
}

impl Default for ClarabelQpConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol_feas: 1e-10,
            tol_gap_abs: 1e-10,
            tol_gap_rel: 1e-10,
        }
    }
}

pub struct ClarabelQp {
    config: ClarabelQpConfig,
}

impl ClarabelQp {
    pub fn new(config: ClarabelQpConfig) -> Self {
        Self { config }
    }
}

impl Default for ClarabelQp {
    fn default() -> Self {
        Self::new(ClarabelQpConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Row(usize),
    Var(usize),
}

/// One row of the conic constraint block and how its dual maps back.
struct ConeRow {
    coeffs: Vec<(usize, f64)>,
    rhs: f64,
    target: Target,
    /// `+1` for equality and upper rows, `-1` for lower rows.
    sign: f64,
}

fn build_rows(qp: &QpProblem) -> (Vec<ConeRow>, usize) {
    let mut eq = Vec::new();
    let mut ineq = Vec::new();
    let sparse_row = |row: &[f64]| -> Vec<(usize, f64)> {
        row.iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, v)| (i, *v))
            .collect()
    };
    let mut classify = |coeffs: Vec<(usize, f64)>, lo: f64, hi: f64, target: Target| {
        if lo == hi && lo.is_finite() {
            eq.push(ConeRow {
                coeffs,
                rhs: lo,
                target,
                sign: 1.0,
            });
            return;
        }
        if hi.is_finite() {
            ineq.push(ConeRow {
                coeffs: coeffs.clone(),
                rhs: hi,
                target,
                sign: 1.0,
            });
        }
        if lo.is_finite() {
            ineq.push(ConeRow {
                coeffs: coeffs.iter().map(|(i, v)| (*i, -v)).collect(),
                rhs: -lo,
                target,
                sign: -1.0,
            });
        }
    };
    for (j, row) in qp.a.iter().enumerate() {
        classify(sparse_row(row), qp.lba[j], qp.uba[j], Target::Row(j));
    }
    for i in 0..qp.n() {
        classify(vec![(i, 1.0)], qp.lbx[i], qp.ubx[i], Target::Var(i));
    }
    let n_eq = eq.len();
    eq.extend(ineq);
    (eq, n_eq)
}

impl QpSolver for ClarabelQp {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn solve(&self, qp: &QpProblem) -> Result<QpSolution, QpError> {
        let n = qp.n();
        let (rows, n_eq) = build_rows(qp);

        if rows.is_empty() {
            // unconstrained: a single Newton step
            let factor = cholesky(&qp.h)
                .ok_or_else(|| QpError::Numerical("Hessian is not positive definite".into()))?;
            let neg_c: Vec<f64> = qp.c.iter().map(|v| -v).collect();
            let x = factor.solve(&neg_c);
            return Ok(QpSolution {
                objective: qp.objective(&x),
                x,
                lam_a: vec![0.0; qp.m()],
                lam_x: vec![0.0; n],
                iterations: 0,
            });
        }

        // A in CSC format: gather entries column-wise, rows already ordered
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (r, row) in rows.iter().enumerate() {
            for &(col, v) in &row.coeffs {
                columns[col].push((r, v));
            }
        }
        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        for column in &columns {
            col_ptr.push(row_idx.len());
            for &(r, v) in column {
                row_idx.push(r);
                values.push(v);
            }
        }
        col_ptr.push(row_idx.len());
        let a_mat = CscMatrix::new(rows.len(), n, col_ptr, row_idx, values);

        // P: upper triangle only
        let mut p_col_ptr = Vec::with_capacity(n + 1);
        let mut p_row_idx = Vec::new();
        let mut p_values = Vec::new();
        for j in 0..n {
            p_col_ptr.push(p_row_idx.len());
            for i in 0..=j {
                let v = qp.h[i][j];
                if v != 0.0 {
                    p_row_idx.push(i);
                    p_values.push(v);
                }
            }
        }
        p_col_ptr.push(p_row_idx.len());
        let p_mat = CscMatrix::new(n, n, p_col_ptr, p_row_idx, p_values);

        let rhs: Vec<f64> = rows.iter().map(|r| r.rhs).collect();
        let mut cones = Vec::new();
        if n_eq > 0 {
            cones.push(SupportedConeT::ZeroConeT(n_eq));
        }
        if rows.len() > n_eq {
            cones.push(SupportedConeT::NonnegativeConeT(rows.len() - n_eq));
        }

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .max_iter(self.config.max_iter)
            .tol_feas(self.config.tol_feas)
            .tol_gap_abs(self.config.tol_gap_abs)
            .tol_gap_rel(self.config.tol_gap_rel)
            .build()
            .map_err(|e| QpError::Numerical(format!("Clarabel settings error: {:?}", e)))?;

        let mut solver =
            clarabel::solver::DefaultSolver::new(&p_mat, &qp.c, &a_mat, &rhs, &cones, settings)
                .map_err(|e| QpError::Numerical(format!("Clarabel initialization failed: {:?}", e)))?;
        solver.solve();

        let sol = solver.solution;
        match sol.status {
            clarabel::solver::SolverStatus::Solved | clarabel::solver::SolverStatus::AlmostSolved => {}
            clarabel::solver::SolverStatus::PrimalInfeasible
            | clarabel::solver::SolverStatus::AlmostPrimalInfeasible => {
                return Err(QpError::Infeasible(format!("Clarabel status {:?}", sol.status)));
            }
            clarabel::solver::SolverStatus::MaxIterations => {
                return Err(QpError::MaxIterations(self.config.max_iter as usize));
            }
            other => {
                return Err(QpError::Numerical(format!("Clarabel returned status {:?}", other)));
            }
        }

        let mut lam_a = vec![0.0; qp.m()];
        let mut lam_x = vec![0.0; n];
        for (row, z) in rows.iter().zip(&sol.z) {
            let value = row.sign * z;
            match row.target {
                Target::Row(j) => lam_a[j] += value,
                Target::Var(i) => lam_x[i] += value,
            }
        }
        Ok(QpSolution {
            objective: qp.objective(&sol.x),
            x: sol.x.clone(),
            lam_a,
            lam_x,
            iterations: sol.iterations as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::test_problems;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
    }

    #[test]
    fn test_qp2_with_fixed_variable() {
        let sol = ClarabelQp::default().solve(&test_problems::qp2()).unwrap();
        assert_close(sol.x[0], 0.5);
        assert_close(sol.x[1], 1.25);
        assert_close(sol.lam_x[0], 4.75);
        assert_close(sol.lam_a[1], 2.0);
        assert_close(sol.lam_a[0], 0.0);
        assert_close(sol.objective, -7.4375);
    }

    #[test]
    fn test_box_signs() {
        let sol = ClarabelQp::default().solve(&test_problems::box_only()).unwrap();
        assert_close(sol.x[0], 1.0);
        assert_close(sol.x[1], -0.5);
        assert_close(sol.lam_x[0], 2.0);
        assert_close(sol.lam_x[1], -1.0);
    }

    #[test]
    fn test_equality_multiplier() {
        let sol = ClarabelQp::default().solve(&test_problems::with_equality()).unwrap();
        assert_close(sol.x[0], 0.5);
        assert_close(sol.lam_a[0], -1.0);
    }

    #[test]
    fn test_unconstrained_shortcut() {
        let qp = QpProblem {
            h: vec![vec![2.0]],
            c: vec![-4.0],
            a: vec![],
            lba: vec![],
            uba: vec![],
            lbx: vec![f64::NEG_INFINITY],
            ubx: vec![f64::INFINITY],
        };
        let sol = ClarabelQp::default().solve(&qp).unwrap();
        assert_eq!(sol.iterations, 0);
        assert_close(sol.x[0], 2.0);
    }

    #[test]
    fn test_infeasible_detected() {
        let err = ClarabelQp::default().solve(&test_problems::infeasible()).unwrap_err();
        assert!(matches!(err, QpError::Infeasible(_)), "{:?}", err);
    }
}
