//! Sequential quadratic programming with an ℓ1 merit line search.
//!
//! Each iteration solves
//!
//! ```text
//! min ½ dᵀ H d + ∇fᵀ d
//! s.t. lbg - g ≤ J d ≤ ubg - g,   lbx - x ≤ d ≤ ubx - x
//! ```
//!
//! with a convexified exact Hessian or a damped BFGS matrix, then
//! backtracks on `f + ν ‖violation(g)‖₁`, trying a second-order correction
//! before the first reduction.

use std::sync::Arc;

use nlpsol_core::{validate_options, BufferSet, NlpError, OptionSpec, OptionType, Options, Problem};
use tracing::{debug, trace};

use super::{all_finite, project, Reduced};
use crate::hessian::{DampedBfgs, HessianMode};
use crate::linalg::{dot, is_positive_definite, mat_t_vec, mat_vec, norm_inf, regularize_to_pd, DenseMatrix};
use crate::qp::{create_qp_solver, QpError, QpProblem, QpSolver, QPSOL_CHOICES};
use crate::traits::{BackendHandle, Capabilities, NlpBackend, RawResult, RawStatus, SolveControl};

const OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("qpsol", OptionType::Str, "QP sub-solver").with_choices(QPSOL_CHOICES),
    OptionSpec::new("qpsol_options", OptionType::Map, "options passed to the QP sub-solver"),
    OptionSpec::new("hessian_approximation", OptionType::Str, "second-order information")
        .with_choices(HessianMode::CHOICES),
    OptionSpec::new("max_iter", OptionType::Int, "iteration limit"),
    OptionSpec::new("tol_pr", OptionType::Float, "primal infeasibility tolerance"),
    OptionSpec::new("tol_du", OptionType::Float, "dual infeasibility tolerance"),
    OptionSpec::new("min_step_size", OptionType::Float, "smallest line search step"),
];

const ARMIJO: f64 = 1e-4;
/// Multipliers above this magnitude mark a constraint as active.
const ACTIVE_MULTIPLIER: f64 = 1e-8;
const ACTIVE_DISTANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct SqpSettings {
    pub qpsol: String,
    pub qpsol_options: Options,
    pub hessian: HessianMode,
    pub max_iter: usize,
    pub tol_pr: f64,
    pub tol_du: f64,
    pub min_step_size: f64,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            qpsol: "active_set".into(),
            qpsol_options: Options::new(),
            hessian: HessianMode::Exact,
            max_iter: 100,
            tol_pr: 1e-8,
            tol_du: 1e-8,
            min_step_size: 1e-10,
        }
    }
}

impl SqpSettings {
    pub fn from_options(options: &Options) -> Self {
        let d = Self::default();
        Self {
            qpsol: options.get_str("qpsol").map(str::to_string).unwrap_or(d.qpsol),
            qpsol_options: options.get_map("qpsol_options").cloned().unwrap_or(d.qpsol_options),
            hessian: HessianMode::from_option(options.get_str("hessian_approximation")),
            max_iter: options
                .get_i64("max_iter")
                .map(|v| v.max(0) as usize)
                .unwrap_or(d.max_iter),
            tol_pr: options.get_f64("tol_pr").unwrap_or(d.tol_pr),
            tol_du: options.get_f64("tol_du").unwrap_or(d.tol_du),
            min_step_size: options.get_f64("min_step_size").unwrap_or(d.min_step_size),
        }
    }
}

/// SQP backend, registered as `sqp`.
pub struct SqpBackend;

impl NlpBackend for SqpBackend {
    fn id(&self) -> &str {
        "sqp"
    }

    fn description(&self) -> &str {
        "sequential quadratic programming with l1 merit line search"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_timeout: false,
            ..Capabilities::all()
        }
    }

    fn option_specs(&self) -> &[OptionSpec] {
        OPTIONS
    }

    fn prepare(&self, problem: &Arc<Problem>, options: &Options) -> Result<Box<dyn BackendHandle>, NlpError> {
        validate_options(self.id(), OPTIONS, options)?;
        let settings = SqpSettings::from_options(options);
        let qp = create_qp_solver(&settings.qpsol, &settings.qpsol_options)?;
        debug!(
            n_x = problem.n_x(),
            n_g = problem.n_g(),
            qpsol = qp.name(),
            linear_constraints = problem.functions().constraints_are_linear(),
            "prepared sqp"
        );
        Ok(Box::new(SqpHandle {
            problem: Arc::clone(problem),
            settings,
            qp,
        }))
    }
}

struct SqpHandle {
    problem: Arc<Problem>,
    settings: SqpSettings,
    qp: Box<dyn QpSolver>,
}

impl BackendHandle for SqpHandle {
    fn solve(&mut self, buffers: &BufferSet, _control: &SolveControl) -> Result<RawResult, NlpError> {
        let red = Reduced::new(&self.problem, buffers);
        if red.n() == 0 {
            return Ok(red.solve_without_free_variables(self.settings.tol_pr));
        }
        Ok(Sqp {
            red: &red,
            settings: &self.settings,
            qp: self.qp.as_ref(),
        }
        .run(buffers))
    }
}

struct Sqp<'a> {
    red: &'a Reduced<'a>,
    settings: &'a SqpSettings,
    qp: &'a dyn QpSolver,
}

impl Sqp<'_> {
    /// ℓ1 norm of the constraint-bound violation.
    fn violation_l1(&self, g: &[f64]) -> f64 {
        g.iter()
            .enumerate()
            .map(|(j, v)| nlpsol_core::bounds::violation(*v, self.red.lbg[j], self.red.ubg[j]))
            .sum()
    }

    fn merit(&self, x: &[f64], nu: f64) -> Option<(f64, Vec<f64>)> {
        let f = self.red.f(x);
        let g = self.red.g(x);
        let value = f + nu * self.violation_l1(&g);
        (value.is_finite() && all_finite(&g)).then_some((value, g))
    }

    fn subproblem(&self, h: &DenseMatrix, grad: &[f64], jac: &DenseMatrix, x: &[f64], shift: &[f64]) -> QpProblem {
        QpProblem {
            h: h.clone(),
            c: grad.to_vec(),
            a: jac.clone(),
            lba: self.red.lbg.iter().zip(shift).map(|(l, s)| l - s).collect(),
            uba: self.red.ubg.iter().zip(shift).map(|(u, s)| u - s).collect(),
            lbx: self.red.lbx.iter().zip(x).map(|(l, xi)| l - xi).collect(),
            ubx: self.red.ubx.iter().zip(x).map(|(u, xi)| u - xi).collect(),
        }
    }

    /// Unit normals of the constraints that are active at `x` or carry a
    /// multiplier: equality rows, rows near a bound and bounded variables.
    fn working_set(&self, x: &[f64], g: &[f64], jac: &DenseMatrix, lam_g: &[f64], lam_x: &[f64]) -> Vec<Vec<f64>> {
        let red = self.red;
        let near = |v: f64, bound: f64| bound.is_finite() && (v - bound).abs() <= ACTIVE_DISTANCE * (1.0 + bound.abs());
        let mut normals = Vec::new();
        for (j, row) in jac.iter().enumerate() {
            let active = red.lbg[j] == red.ubg[j]
                || lam_g[j].abs() > ACTIVE_MULTIPLIER
                || near(g[j], red.lbg[j])
                || near(g[j], red.ubg[j]);
            let norm = dot(row, row).sqrt();
            if active && norm > 0.0 {
                normals.push(row.iter().map(|v| v / norm).collect());
            }
        }
        for i in 0..x.len() {
            if lam_x[i].abs() > ACTIVE_MULTIPLIER || near(x[i], red.lbx[i]) || near(x[i], red.ubx[i]) {
                let mut e = vec![0.0; x.len()];
                e[i] = 1.0;
                normals.push(e);
            }
        }
        normals
    }

    /// Make `h` positive definite by adding `ρ Σ a aᵀ` over the working set
    /// normals, or an identity shift when no `ρ` up to `1e8` suffices.
    fn convexify(&self, h: &mut DenseMatrix, normals: &[Vec<f64>]) -> f64 {
        if is_positive_definite(h) {
            return 0.0;
        }
        let scale = h
            .iter()
            .enumerate()
            .map(|(i, row)| row[i].abs())
            .fold(1.0, f64::max);
        if !normals.is_empty() {
            let mut rho = 1e-2 * scale;
            while rho <= 1e8 * scale {
                let mut trial = h.clone();
                for a in normals {
                    for (i, row) in trial.iter_mut().enumerate() {
                        for (j, v) in row.iter_mut().enumerate() {
                            *v += rho * a[i] * a[j];
                        }
                    }
                }
                if is_positive_definite(&trial) {
                    trace!(rho, working_set = normals.len(), "augmented Hessian");
                    *h = trial;
                    return rho;
                }
                rho *= 10.0;
            }
        }
        regularize_to_pd(h, 1e-4)
    }

    fn qp_failure(err: &QpError) -> RawStatus {
        match err {
            QpError::Infeasible(_) => RawStatus::Infeasible,
            QpError::MaxIterations(_) | QpError::Numerical(_) => RawStatus::NumericalError,
        }
    }

    fn run(&self, buffers: &BufferSet) -> RawResult {
        let settings = self.settings;
        let red = self.red;
        let (n, k) = (red.n(), red.k());

        let mut x = red.start().to_vec();
        project(&mut x, &red.lbx, &red.ubx);
        let mut lam_g = buffers.lam_g0().map(<[f64]>::to_vec).unwrap_or_else(|| vec![0.0; k]);
        let mut lam_x = buffers
            .lam_x0()
            .map(|v| red.restrict(v))
            .unwrap_or_else(|| vec![0.0; n]);
        let mut bfgs = match settings.hessian {
            HessianMode::LimitedMemory => Some(DampedBfgs::new(n)),
            HessianMode::Exact => None,
        };
        let mut nu = 0.0f64;

        for iter in 0..=settings.max_iter {
            let grad = red.grad_f(&x);
            let g = red.g(&x);
            let jac = red.jac_g(&x);
            if !(all_finite(&grad) && all_finite(&g)) {
                return red.finish(&x, &lam_x, lam_g, iter, RawStatus::NumericalError, "non-finite evaluation");
            }

            let jt_lam = mat_t_vec(&jac, &lam_g, n);
            let grad_lag: Vec<f64> = (0..n).map(|i| grad[i] + jt_lam[i] + lam_x[i]).collect();
            let pr = red.constraint_violation(&g);
            let du = norm_inf(&grad_lag);
            debug!(iter, f = red.f(&x), pr, du, "sqp iteration");
            if pr <= settings.tol_pr && du <= settings.tol_du {
                return red.finish(&x, &lam_x, lam_g, iter, RawStatus::Solved, "converged");
            }
            if iter == settings.max_iter {
                break;
            }

            let mut h = match &bfgs {
                Some(b) => b.matrix().clone(),
                None => red.hess_lag(&x, 1.0, &lam_g),
            };
            let normals = self.working_set(&x, &g, &jac, &lam_g, &lam_x);
            let shift = self.convexify(&mut h, &normals);
            if shift > 0.0 {
                trace!(iter, shift, "convexified Hessian");
            }

            let qp = self.subproblem(&h, &grad, &jac, &x, &g);
            let sol = match self.qp.solve(&qp) {
                Ok(sol) => sol,
                Err(err) => {
                    let status = Self::qp_failure(&err);
                    return red.finish(&x, &lam_x, lam_g, iter, status, err.to_string());
                }
            };

            // step actually taken inside the variable bounds
            let mut x_full: Vec<f64> = x.iter().zip(&sol.x).map(|(xi, di)| xi + di).collect();
            project(&mut x_full, &red.lbx, &red.ubx);
            let d: Vec<f64> = x_full.iter().zip(&x).map(|(a, b)| a - b).collect();

            // the QP multipliers may already certify x
            let jt_qp = mat_t_vec(&jac, &sol.lam_a, n);
            let du_qp = (0..n)
                .map(|i| (grad[i] + jt_qp[i] + sol.lam_x[i]).abs())
                .fold(0.0, f64::max);
            let short = norm_inf(&d) <= 1e-6 * (1.0 + norm_inf(&x));
            if pr <= settings.tol_pr && du_qp <= settings.tol_du && short {
                return red.finish(&x, &sol.lam_x, sol.lam_a, iter, RawStatus::Solved, "converged");
            }

            // ----------------------------------------------------------------
            // ℓ1 merit line search with second-order correction
            // ----------------------------------------------------------------
            nu = nu.max(1.1 * norm_inf(&sol.lam_a) + 1e-4);
            let Some((merit0, _)) = self.merit(&x, nu) else {
                return red.finish(&x, &lam_x, lam_g, iter, RawStatus::NumericalError, "non-finite merit");
            };
            let slope = dot(&grad, &d) - nu * self.violation_l1(&g);
            let tiny = norm_inf(&d) <= 1e-10 * (1.0 + norm_inf(&x));
            let slack = 10.0 * f64::EPSILON * merit0.abs().max(1.0);

            let mut alpha = 1.0;
            let mut accepted: Option<Vec<f64>> = None;
            while alpha >= settings.min_step_size {
                let mut trial: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + alpha * di).collect();
                project(&mut trial, &red.lbx, &red.ubx);
                let merit = self.merit(&trial, nu);
                let ok = |m: f64| m <= merit0 + ARMIJO * alpha * slope.min(0.0) + slack;
                if tiny || merit.as_ref().is_some_and(|(m, _)| ok(*m)) {
                    accepted = Some(trial);
                    break;
                }
                if alpha == 1.0 {
                    if let Some((_, g_trial)) = merit {
                        // correct for the curvature of the constraints at x + d
                        let jd = mat_vec(&jac, &d);
                        let corrected: Vec<f64> = g_trial.iter().zip(&jd).map(|(gt, jdi)| gt - jdi).collect();
                        let soc_qp = self.subproblem(&h, &grad, &jac, &x, &corrected);
                        if let Ok(soc) = self.qp.solve(&soc_qp) {
                            let mut trial: Vec<f64> = x.iter().zip(&soc.x).map(|(xi, di)| xi + di).collect();
                            project(&mut trial, &red.lbx, &red.ubx);
                            if self.merit(&trial, nu).is_some_and(|(m, _)| ok(m)) {
                                trace!(iter, "second-order correction accepted");
                                accepted = Some(trial);
                                break;
                            }
                        }
                    }
                }
                alpha *= 0.5;
            }
            let Some(x_new) = accepted else {
                return red.finish(&x, &lam_x, lam_g, iter, RawStatus::NumericalError, "line search failed");
            };

            for (l, q) in lam_g.iter_mut().zip(&sol.lam_a) {
                *l += alpha * (q - *l);
            }
            for (l, q) in lam_x.iter_mut().zip(&sol.lam_x) {
                *l += alpha * (q - *l);
            }

            if let Some(b) = bfgs.as_mut() {
                let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
                let jac_new = red.jac_g(&x_new);
                let grad_new = red.grad_f(&x_new);
                let new = mat_t_vec(&jac_new, &lam_g, n);
                let old = mat_t_vec(&jac, &lam_g, n);
                let y: Vec<f64> = (0..n).map(|i| (grad_new[i] + new[i]) - (grad[i] + old[i])).collect();
                b.update(&s, &y);
            }
            x = x_new;
        }
        red.finish(
            &x,
            &lam_x,
            lam_g,
            settings.max_iter,
            RawStatus::MaxIterations,
            "iteration limit reached",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::Expr;

    fn rosenbrock() -> Arc<Problem> {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        Arc::new(
            Problem::builder()
                .variables([x.clone(), y.clone()])
                .objective((1.0 - &x).powi(2) + 100.0 * (&y - x.powi(2)).powi(2))
                .constraint(&x + &y)
                .build()
                .unwrap(),
        )
    }

    fn solve(buffers: &BufferSet, options: Options) -> RawResult {
        let problem = rosenbrock();
        let mut handle = SqpBackend.prepare(&problem, &options).unwrap();
        handle.solve(buffers, &SolveControl::default()).unwrap()
    }

    #[test]
    fn test_active_upper_constraint() {
        let mut buffers = BufferSet::for_problem(&rosenbrock());
        buffers.set("ubg", &[1.8]).unwrap();
        let raw = solve(&buffers, Options::new());
        assert!(raw.status.is_converged(), "{:?}: {}", raw.status, raw.message);
        assert!((raw.f - 4.64801220074552e-3).abs() < 1e-8, "f = {}", raw.f);
        assert!((raw.lam_g[0] - 4.75846495145007e-2).abs() < 1e-6);
    }

    #[test]
    fn test_clarabel_subsolver() {
        let mut buffers = BufferSet::for_problem(&rosenbrock());
        buffers.set("lbg", &[2.2]).unwrap();
        let raw = solve(
            &buffers,
            Options::new().with("qpsol", "clarabel").with("tol_du", 1e-7),
        );
        assert!(raw.status.is_converged(), "{:?}: {}", raw.status, raw.message);
        assert!((raw.f - 4.252906468284e-3).abs() < 1e-6, "f = {}", raw.f);
        assert!((raw.lam_g[0] + 4.1644422845712e-2).abs() < 1e-5);
    }

    #[test]
    fn test_bfgs_variant() {
        let mut buffers = BufferSet::for_problem(&rosenbrock());
        buffers.set("ubg", &[1.8]).unwrap();
        let raw = solve(&buffers, Options::new().with("hessian_approximation", "limited-memory"));
        assert!(raw.status.is_converged(), "{:?}: {}", raw.status, raw.message);
        assert!((raw.f - 4.64801220074552e-3).abs() < 1e-6, "f = {}", raw.f);
    }

    fn solve_problem(problem: &Arc<Problem>, buffers: &BufferSet, options: Options) -> RawResult {
        let mut handle = SqpBackend.prepare(problem, &options).unwrap();
        handle.solve(buffers, &SolveControl::default()).unwrap()
    }

    #[test]
    fn test_indefinite_lagrangian_with_equalities() {
        let x = Expr::symbols(&["x1", "x2", "x3", "x4"]);
        let problem = Arc::new(
            Problem::builder()
                .variables(x.clone())
                .objective((&x[0] + &x[1] + &x[2]).powi(2) + 3.0 * &x[2] + 5.0 * &x[3])
                .constraints([
                    x[0].powi(2) + x[1].powi(2) + &x[2],
                    x[1].powi(4) + &x[3],
                    2.0 * &x[0] + 4.0 * &x[1],
                ])
                .build()
                .unwrap(),
        );
        let inf = f64::INFINITY;
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("x0", &[-0.070, 1.41, 0.0, 0.0199]).unwrap();
        buffers.set("lbx", &[-inf, -inf, 0.0, 0.0]).unwrap();
        buffers.set("lbg", &[2.0, 4.0, 0.0]).unwrap();
        buffers.set("ubg", &[2.0, 4.0, inf]).unwrap();
        let raw = solve_problem(&problem, &buffers, Options::new());
        assert_eq!(raw.status, RawStatus::Solved, "{}", raw.message);
        assert!(raw.iterations < 50, "iterations = {}", raw.iterations);
        assert!((raw.f - 1.9001249992187681).abs() < 1e-6, "f = {}", raw.f);
        assert!((raw.lam_g[1] + 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_nonconvex_objective_at_vertex() {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let problem = Arc::new(
            Problem::builder()
                .variables([x.clone(), y.clone()])
                .objective(0.5 * x.powi(2) - &x * &y - y.powi(2) - 2.0 * &x - 6.0 * &y)
                .constraints([&x + &y, 2.0 * &y - &x, 2.0 * &x + &y])
                .build()
                .unwrap(),
        );
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("x0", &[0.5, 1.0]).unwrap();
        buffers.set("lbx", &[0.0, 0.0]).unwrap();
        buffers.set("ubg", &[2.0, 2.0, 3.0]).unwrap();
        for qpsol in ["active_set", "clarabel"] {
            let raw = solve_problem(&problem, &buffers, Options::new().with("qpsol", qpsol));
            assert_eq!(raw.status, RawStatus::Solved, "{qpsol}: {}", raw.message);
            assert!((raw.x[0] - 2.0 / 3.0).abs() < 1e-6, "{qpsol}: x = {:?}", raw.x);
            assert!((raw.x[1] - 4.0 / 3.0).abs() < 1e-6, "{qpsol}: x = {:?}", raw.x);
            assert!((raw.lam_g[0] - (4.0 + 8.0 / 9.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_linear_objective_stops_on_bound() {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let problem = Arc::new(
            Problem::builder()
                .variables([x.clone(), y.clone()])
                .objective((1.0 - &x).powi(2) + 7.7 * &y)
                .constraint(y.powi(2))
                .build()
                .unwrap(),
        );
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("x0", &[1.0, 1.0]).unwrap();
        buffers.set("lbx", &[-10.0, 0.0]).unwrap();
        buffers.set("ubx", &[10.0, 2.0]).unwrap();
        buffers.set("lbg", &[-10.0]).unwrap();
        buffers.set("ubg", &[10.0]).unwrap();
        let raw = solve_problem(&problem, &buffers, Options::new());
        assert_eq!(raw.status, RawStatus::Solved, "{}", raw.message);
        assert!((raw.x[0] - 1.0).abs() < 1e-6 && raw.x[1].abs() < 1e-6, "x = {:?}", raw.x);
        assert!((raw.lam_x[1] + 7.7).abs() < 1e-5);
    }

    #[test]
    fn test_no_timeout_capability() {
        assert!(!SqpBackend.capabilities().supports_timeout);
        assert!(SqpBackend.capabilities().supports_warm_start);
    }

    #[test]
    fn test_bad_qpsol_rejected() {
        let problem = rosenbrock();
        assert!(SqpBackend
            .prepare(&problem, &Options::new().with("qpsol", "qpoases"))
            .is_err());
        let nested = Options::new().with("qpsol_options", Options::new().with("bogus", 1));
        assert!(SqpBackend.prepare(&problem, &nested).is_err());
    }
}
