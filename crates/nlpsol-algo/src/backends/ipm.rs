//! Primal-dual interior point method with a logarithmic barrier.
//!
//! Inequality rows get a slack, `g_I(x) - s = 0` with `lbg ≤ s ≤ ubg`, and
//! equality rows stay as `g_E(x) = lbg_E`. With `w = (x, s)` the method
//! follows the central path of
//!
//! ```text
//! min f(x) - μ Σ ln(w - l) - μ Σ ln(u - w)   s.t.  c(w) = 0
//! ```
//!
//! using Newton steps on the primal-dual equations, inertia correction of
//! the KKT matrix, a fraction-to-boundary rule and an ℓ1 merit backtracking
//! line search.

use std::sync::Arc;

use nlpsol_core::{validate_options, BufferSet, NlpError, OptionSpec, OptionType, Options, Problem};
use tracing::{debug, trace};

use super::{all_finite, Reduced};
use crate::hessian::{DampedBfgs, HessianMode};
use crate::linalg::{dot, inertia, lu_solve, mat_t_vec, mat_vec, norm1, norm_inf, zeros, DenseMatrix, Inertia};
use crate::traits::{BackendHandle, Capabilities, NlpBackend, RawResult, RawStatus, SolveControl};

const OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("tol", OptionType::Float, "convergence tolerance on the scaled KKT error"),
    OptionSpec::new("acceptable_tol", OptionType::Float, "tolerance for acceptable termination"),
    OptionSpec::new(
        "acceptable_iter",
        OptionType::Int,
        "consecutive acceptable iterations before terminating",
    ),
    OptionSpec::new("max_iter", OptionType::Int, "iteration limit"),
    OptionSpec::new("mu_init", OptionType::Float, "initial barrier parameter"),
    OptionSpec::new("bound_push", OptionType::Float, "absolute push of the start into the bounds"),
    OptionSpec::new("bound_frac", OptionType::Float, "relative push of the start into two-sided bounds"),
    OptionSpec::new(
        "warm_start_init_point",
        OptionType::Bool,
        "start from the given primal and dual point",
    ),
    OptionSpec::new("warm_start_mu_init", OptionType::Float, "barrier parameter for warm starts"),
    OptionSpec::new("warm_start_bound_push", OptionType::Float, "bound push for warm starts"),
    OptionSpec::new("hessian_approximation", OptionType::Str, "second-order information")
        .with_choices(HessianMode::CHOICES),
];

const EXTENSION_OUTPUTS: &[&str] = &["z_l", "z_u"];

/// Barrier parameter decrease factor and exponent.
const KAPPA_MU: f64 = 0.2;
const THETA_MU: f64 = 1.5;
const KAPPA_EPSILON: f64 = 10.0;
const KAPPA_SIGMA: f64 = 1e10;
/// Floor of the barrier parameter.
const MU_MIN: f64 = 1e-11;
const TAU_MIN: f64 = 0.99;
const ARMIJO: f64 = 1e-4;
const S_MAX: f64 = 100.0;
const MAX_LINE_SEARCH_FAILURES: usize = 5;

#[derive(Debug, Clone)]
pub struct IpmSettings {
    pub tol: f64,
    pub acceptable_tol: f64,
    pub acceptable_iter: usize,
    pub max_iter: usize,
    pub mu_init: f64,
    pub bound_push: f64,
    pub bound_frac: f64,
    pub warm_start_init_point: bool,
    pub warm_start_mu_init: f64,
    pub warm_start_bound_push: f64,
    pub hessian: HessianMode,
}

impl Default for IpmSettings {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            acceptable_tol: 1e-6,
            acceptable_iter: 15,
            max_iter: 1000,
            mu_init: 0.1,
            bound_push: 1e-2,
            bound_frac: 1e-2,
            warm_start_init_point: false,
            warm_start_mu_init: 1e-6,
            warm_start_bound_push: 1e-9,
            hessian: HessianMode::Exact,
        }
    }
}

impl IpmSettings {
    pub fn from_options(options: &Options) -> Self {
        let d = Self::default();
        Self {
            tol: options.get_f64("tol").unwrap_or(d.tol),
            acceptable_tol: options.get_f64("acceptable_tol").unwrap_or(d.acceptable_tol),
            acceptable_iter: options
                .get_i64("acceptable_iter")
                .map(|v| v.max(1) as usize)
                .unwrap_or(d.acceptable_iter),
            max_iter: options
                .get_i64("max_iter")
                .map(|v| v.max(0) as usize)
                .unwrap_or(d.max_iter),
            mu_init: options.get_f64("mu_init").unwrap_or(d.mu_init),
            bound_push: options.get_f64("bound_push").unwrap_or(d.bound_push),
            bound_frac: options.get_f64("bound_frac").unwrap_or(d.bound_frac),
            warm_start_init_point: options
                .get_bool("warm_start_init_point")
                .unwrap_or(d.warm_start_init_point),
            warm_start_mu_init: options.get_f64("warm_start_mu_init").unwrap_or(d.warm_start_mu_init),
            warm_start_bound_push: options
                .get_f64("warm_start_bound_push")
                .unwrap_or(d.warm_start_bound_push),
            hessian: HessianMode::from_option(options.get_str("hessian_approximation")),
        }
    }
}

/// Interior point backend, registered as `ipm`.
pub struct IpmBackend;

impl NlpBackend for IpmBackend {
    fn id(&self) -> &str {
        "ipm"
    }

    fn description(&self) -> &str {
        "primal-dual interior point method with log barrier and inertia correction"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn option_specs(&self) -> &[OptionSpec] {
        OPTIONS
    }

    fn extension_outputs(&self) -> &[&'static str] {
        EXTENSION_OUTPUTS
    }

    fn prepare(&self, problem: &Arc<Problem>, options: &Options) -> Result<Box<dyn BackendHandle>, NlpError> {
        validate_options(self.id(), OPTIONS, options)?;
        let settings = IpmSettings::from_options(options);
        debug!(
            n_x = problem.n_x(),
            n_g = problem.n_g(),
            jac_nnz = problem.functions().jac_g_sparsity().len(),
            hess_nnz = problem.functions().hess_lag_sparsity().len(),
            "prepared ipm"
        );
        Ok(Box::new(IpmHandle {
            problem: Arc::clone(problem),
            settings,
        }))
    }
}

struct IpmHandle {
    problem: Arc<Problem>,
    settings: IpmSettings,
}

impl BackendHandle for IpmHandle {
    fn solve(&mut self, buffers: &BufferSet, control: &SolveControl) -> Result<RawResult, NlpError> {
        let reduced = Reduced::new(&self.problem, buffers);
        if reduced.n() == 0 {
            return Ok(reduced.solve_without_free_variables(self.settings.tol));
        }
        let warm = self.settings.warm_start_init_point || buffers.has_multiplier_guess();
        let ipm = Ipm::new(&reduced, &self.settings, control);
        Ok(ipm.run(buffers, warm))
    }
}

// ============================================================================
// BARRIER PROBLEM
// ============================================================================

/// A constraint row kept in the barrier problem.
struct Row {
    index: usize,
    /// Position of the slack in `w`; `None` for equality rows.
    slack: Option<usize>,
}

struct Iterate {
    w: Vec<f64>,
    y: Vec<f64>,
    zl: Vec<f64>,
    zu: Vec<f64>,
}

/// Function values at the `x` part of an iterate.
struct Eval {
    f: f64,
    g: Vec<f64>,
    grad: Vec<f64>,
    jac: DenseMatrix,
}

struct Ipm<'a> {
    red: &'a Reduced<'a>,
    settings: &'a IpmSettings,
    control: &'a SolveControl,
    rows: Vec<Row>,
    n: usize,
    dim: usize,
    lw: Vec<f64>,
    uw: Vec<f64>,
}

impl<'a> Ipm<'a> {
    fn new(red: &'a Reduced<'a>, settings: &'a IpmSettings, control: &'a SolveControl) -> Self {
        let n = red.n();
        let mut lw = red.lbx.clone();
        let mut uw = red.ubx.clone();
        let mut rows = Vec::new();
        for j in 0..red.k() {
            let (lo, hi) = (red.lbg[j], red.ubg[j]);
            if lo.is_infinite() && hi.is_infinite() {
                continue;
            }
            let slack = if lo == hi {
                None
            } else {
                lw.push(lo);
                uw.push(hi);
                Some(lw.len() - 1)
            };
            rows.push(Row { index: j, slack });
        }
        Self {
            red,
            settings,
            control,
            rows,
            n,
            dim: lw.len(),
            lw,
            uw,
        }
    }

    fn m(&self) -> usize {
        self.rows.len()
    }

    fn eval(&self, w: &[f64]) -> Option<Eval> {
        let x = &w[..self.n];
        let f = self.red.f(x);
        let g = self.red.g(x);
        let grad = self.red.grad_f(x);
        let jac = self.red.jac_g(x);
        let finite = f.is_finite() && all_finite(&g) && all_finite(&grad) && jac.iter().all(|r| all_finite(r));
        finite.then_some(Eval { f, g, grad, jac })
    }

    /// `c(w)`: equality residuals and `g_I(x) - s`.
    fn residual(&self, ev: &Eval, w: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| {
                let target = match row.slack {
                    Some(s) => w[s],
                    None => self.red.lbg[row.index],
                };
                ev.g[row.index] - target
            })
            .collect()
    }

    /// `∂c/∂w`, `m × dim`.
    fn jacobian(&self, ev: &Eval) -> DenseMatrix {
        self.rows
            .iter()
            .map(|row| {
                let mut out = vec![0.0; self.dim];
                out[..self.n].copy_from_slice(&ev.jac[row.index]);
                if let Some(s) = row.slack {
                    out[s] = -1.0;
                }
                out
            })
            .collect()
    }

    fn objective_gradient(&self, ev: &Eval) -> Vec<f64> {
        let mut out = vec![0.0; self.dim];
        out[..self.n].copy_from_slice(&ev.grad);
        out
    }

    /// `∇f + Aᵀy - z_L + z_U`
    fn dual_residual(&self, ev: &Eval, a: &DenseMatrix, pt: &Iterate) -> Vec<f64> {
        let mut r = self.objective_gradient(ev);
        let aty = mat_t_vec(a, &pt.y, self.dim);
        for i in 0..self.dim {
            r[i] += aty[i] - pt.zl[i] + pt.zu[i];
        }
        r
    }

    fn barrier_value(&self, f: f64, w: &[f64], mu: f64) -> f64 {
        let mut value = f;
        for i in 0..self.dim {
            if self.lw[i].is_finite() {
                let d = w[i] - self.lw[i];
                if d <= 0.0 {
                    return f64::INFINITY;
                }
                value -= mu * d.ln();
            }
            if self.uw[i].is_finite() {
                let d = self.uw[i] - w[i];
                if d <= 0.0 {
                    return f64::INFINITY;
                }
                value -= mu * d.ln();
            }
        }
        value
    }

    fn barrier_gradient(&self, ev: &Eval, w: &[f64], mu: f64) -> Vec<f64> {
        let mut grad = self.objective_gradient(ev);
        for i in 0..self.dim {
            if self.lw[i].is_finite() {
                grad[i] -= mu / (w[i] - self.lw[i]);
            }
            if self.uw[i].is_finite() {
                grad[i] += mu / (self.uw[i] - w[i]);
            }
        }
        grad
    }

    /// Scaled KKT error of the barrier problem for barrier parameter `mu`.
    fn optimality_error(&self, dual: &[f64], c: &[f64], pt: &Iterate, mu: f64) -> f64 {
        let n_bounds = self.lw.iter().chain(&self.uw).filter(|b| b.is_finite()).count();
        let z_sum = norm1(&pt.zl) + norm1(&pt.zu);
        let s_d = ((norm1(&pt.y) + z_sum) / (self.m() + n_bounds).max(1) as f64).max(S_MAX) / S_MAX;
        let s_c = (z_sum / n_bounds.max(1) as f64).max(S_MAX) / S_MAX;
        let mut compl = 0.0f64;
        for i in 0..self.dim {
            if self.lw[i].is_finite() {
                compl = compl.max((pt.zl[i] * (pt.w[i] - self.lw[i]) - mu).abs());
            }
            if self.uw[i].is_finite() {
                compl = compl.max((pt.zu[i] * (self.uw[i] - pt.w[i]) - mu).abs());
            }
        }
        (norm_inf(dual) / s_d).max(norm_inf(c)).max(compl / s_c)
    }

    /// Largest unscaled complementarity product `z (w - l)` or `z (u - w)`.
    fn complementarity(&self, pt: &Iterate) -> f64 {
        let mut compl = 0.0f64;
        for i in 0..self.dim {
            if self.lw[i].is_finite() {
                compl = compl.max(pt.zl[i] * (pt.w[i] - self.lw[i]));
            }
            if self.uw[i].is_finite() {
                compl = compl.max(pt.zu[i] * (self.uw[i] - pt.w[i]));
            }
        }
        compl
    }

    /// Move `w` strictly inside its bounds.
    fn push_into_interior(&self, w: &mut [f64], kappa1: f64, kappa2: f64) {
        for i in 0..self.dim {
            let (l, u) = (self.lw[i], self.uw[i]);
            if l.is_finite() {
                let mut push = kappa1 * l.abs().max(1.0);
                if u.is_finite() {
                    push = push.min(kappa2 * (u - l));
                }
                w[i] = w[i].max(l + push);
            }
            if u.is_finite() {
                let mut push = kappa1 * u.abs().max(1.0);
                if l.is_finite() {
                    push = push.min(kappa2 * (u - l));
                }
                w[i] = w[i].min(u - push);
            }
        }
    }

    fn initial_primal(&self) -> Vec<f64> {
        let x = self.red.start();
        let g = self.red.g(x);
        let mut w = x.to_vec();
        w.resize(self.dim, 0.0);
        for row in &self.rows {
            if let Some(s) = row.slack {
                w[s] = g[row.index];
            }
        }
        w
    }

    fn cold_start(&self) -> (Iterate, f64) {
        let mut w = self.initial_primal();
        self.push_into_interior(&mut w, self.settings.bound_push, self.settings.bound_frac);
        let zl: Vec<f64> = self.lw.iter().map(|l| if l.is_finite() { 1.0 } else { 0.0 }).collect();
        let zu: Vec<f64> = self.uw.iter().map(|u| if u.is_finite() { 1.0 } else { 0.0 }).collect();
        let mut pt = Iterate {
            w,
            y: vec![0.0; self.m()],
            zl,
            zu,
        };
        if let Some(ev) = self.eval(&pt.w) {
            pt.y = self.least_squares_multipliers(&ev, &pt);
        }
        (pt, self.settings.mu_init)
    }

    /// `min ‖∇f + Aᵀy - z_L + z_U‖` via `[[I, Aᵀ], [A, 0]]`, discarded when
    /// large.
    fn least_squares_multipliers(&self, ev: &Eval, pt: &Iterate) -> Vec<f64> {
        let (dim, m) = (self.dim, self.m());
        if m == 0 {
            return Vec::new();
        }
        let a = self.jacobian(ev);
        let mut k = zeros(dim + m, dim + m);
        for i in 0..dim {
            k[i][i] = 1.0;
        }
        for (r, row) in a.iter().enumerate() {
            for i in 0..dim {
                k[dim + r][i] = row[i];
                k[i][dim + r] = row[i];
            }
        }
        let grad = self.objective_gradient(ev);
        let mut rhs = vec![0.0; dim + m];
        for i in 0..dim {
            rhs[i] = -(grad[i] - pt.zl[i] + pt.zu[i]);
        }
        match lu_solve(&k, &rhs) {
            Ok(sol) if norm_inf(&sol[dim..]) <= 1e3 => sol[dim..].to_vec(),
            _ => vec![0.0; m],
        }
    }

    fn warm_start(&self, buffers: &BufferSet) -> (Iterate, f64) {
        let mu = self.settings.warm_start_mu_init;
        let mut w = self.initial_primal();
        let lam_x = buffers
            .lam_x0()
            .map(|v| self.red.restrict(v))
            .unwrap_or_else(|| vec![0.0; self.n]);
        let lam_g = buffers.lam_g0().map(<[f64]>::to_vec).unwrap_or_else(|| vec![0.0; self.red.k()]);
        let y: Vec<f64> = self.rows.iter().map(|row| lam_g[row.index]).collect();

        // bound multipliers from the sign law: lam = z_U - z_L
        let mut zl = vec![0.0; self.dim];
        let mut zu = vec![0.0; self.dim];
        for (i, lam) in lam_x.iter().enumerate() {
            zl[i] = (-lam).max(0.0);
            zu[i] = lam.max(0.0);
        }
        for (row, yr) in self.rows.iter().zip(&y) {
            if let Some(s) = row.slack {
                zl[s] = (-yr).max(0.0);
                zu[s] = yr.max(0.0);
            }
        }

        // active bounds sit at distance mu / z
        for i in 0..self.dim {
            if self.lw[i].is_finite() && zl[i] > 0.0 {
                w[i] = w[i].max(self.lw[i] + mu / zl[i]);
            }
            if self.uw[i].is_finite() && zu[i] > 0.0 {
                w[i] = w[i].min(self.uw[i] - mu / zu[i]);
            }
        }
        let push = self.settings.warm_start_bound_push;
        self.push_into_interior(&mut w, push, push);

        for i in 0..self.dim {
            zl[i] = if self.lw[i].is_finite() {
                zl[i].max(mu / (w[i] - self.lw[i]))
            } else {
                0.0
            };
            zu[i] = if self.uw[i].is_finite() {
                zu[i].max(mu / (self.uw[i] - w[i]))
            } else {
                0.0
            };
        }
        (Iterate { w, y, zl, zu }, mu)
    }

    /// Full-length `lam_g` from the multipliers of the kept rows.
    fn full_multipliers(&self, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.red.k()];
        for (row, yr) in self.rows.iter().zip(y) {
            out[row.index] = *yr;
        }
        out
    }

    fn lagrangian_gradient(&self, ev: &Eval, lam_g: &[f64]) -> Vec<f64> {
        let jt = mat_t_vec(&ev.jac, lam_g, self.n);
        ev.grad.iter().zip(jt).map(|(g, j)| g + j).collect()
    }

    // ========================================================================
    // NEWTON STEP WITH INERTIA CORRECTION
    // ========================================================================

    fn kkt_matrix(&self, w_x: &DenseMatrix, sigma: &[f64], a: &DenseMatrix, delta_w: f64, delta_c: f64) -> DenseMatrix {
        let (dim, m) = (self.dim, self.m());
        let mut k = zeros(dim + m, dim + m);
        for i in 0..self.n {
            k[i][..self.n].copy_from_slice(&w_x[i]);
        }
        for i in 0..dim {
            k[i][i] += sigma[i] + delta_w;
        }
        for (r, row) in a.iter().enumerate() {
            for i in 0..dim {
                k[dim + r][i] = row[i];
                k[i][dim + r] = row[i];
            }
            k[dim + r][dim + r] = -delta_c;
        }
        k
    }

    fn inertia_ok(&self, inertia: Inertia) -> bool {
        inertia.positive == self.dim && inertia.negative == self.m() && inertia.zero == 0
    }

    /// Solve the primal-dual system, regularizing until the KKT matrix has
    /// `dim` positive and `m` negative eigenvalues. A singular matrix first
    /// gets the small dual shift `δ_c` alone; only then is the Hessian
    /// shifted by `δ_w`. Returns the step and the Hessian shift used.
    fn newton_step(
        &self,
        w_x: &DenseMatrix,
        sigma: &[f64],
        a: &DenseMatrix,
        rhs: &[f64],
        mu: f64,
        delta_w_last: &mut f64,
    ) -> Option<(Vec<f64>, f64)> {
        const ZERO_TOL: f64 = 1e-14;
        let k = self.kkt_matrix(w_x, sigma, a, 0.0, 0.0);
        let found = inertia(&k, ZERO_TOL);
        if self.inertia_ok(found) {
            if let Ok(step) = lu_solve(&k, rhs) {
                return Some((step, 0.0));
            }
        }
        let delta_c = if found.zero > 0 { 1e-8 * mu.powf(0.25) } else { 0.0 };
        if delta_c > 0.0 {
            let k = self.kkt_matrix(w_x, sigma, a, 0.0, delta_c);
            if self.inertia_ok(inertia(&k, ZERO_TOL)) {
                if let Ok(step) = lu_solve(&k, rhs) {
                    trace!(delta_c, "dual regularization");
                    return Some((step, 0.0));
                }
            }
        }
        let first = *delta_w_last == 0.0;
        let mut delta_w = if first { 1e-4 } else { (*delta_w_last / 3.0).max(1e-20) };
        while delta_w <= 1e40 {
            let k = self.kkt_matrix(w_x, sigma, a, delta_w, delta_c);
            if self.inertia_ok(inertia(&k, ZERO_TOL)) {
                if let Ok(step) = lu_solve(&k, rhs) {
                    trace!(delta_w, delta_c, "inertia corrected");
                    *delta_w_last = delta_w;
                    return Some((step, delta_w));
                }
            }
            delta_w *= if first { 100.0 } else { 8.0 };
        }
        None
    }

    /// Largest `α ∈ (0, 1]` keeping `v + α dv` at least a fraction `1 - τ`
    /// away from `lower`/`upper`.
    fn fraction_to_boundary(v: &[f64], dv: &[f64], lower: &[f64], upper: &[f64], tau: f64) -> f64 {
        let mut alpha = 1.0f64;
        for i in 0..v.len() {
            if lower[i].is_finite() && dv[i] < 0.0 {
                alpha = alpha.min(-tau * (v[i] - lower[i]) / dv[i]);
            }
            if upper[i].is_finite() && dv[i] > 0.0 {
                alpha = alpha.min(tau * (upper[i] - v[i]) / dv[i]);
            }
        }
        alpha
    }

    fn finish(&self, pt: &Iterate, iterations: usize, status: RawStatus, message: &str) -> RawResult {
        let x = &pt.w[..self.n];
        let lam_x: Vec<f64> = (0..self.n).map(|i| pt.zu[i] - pt.zl[i]).collect();
        let mut raw = self
            .red
            .finish(x, &lam_x, self.full_multipliers(&pt.y), iterations, status, message);
        let mut z_l: Vec<f64> = raw.lam_x.iter().map(|l| (-l).max(0.0)).collect();
        let mut z_u: Vec<f64> = raw.lam_x.iter().map(|l| l.max(0.0)).collect();
        for (k, &i) in self.red.free.iter().enumerate() {
            z_l[i] = pt.zl[k];
            z_u[i] = pt.zu[k];
        }
        raw.extras.insert("z_l".into(), z_l);
        raw.extras.insert("z_u".into(), z_u);
        raw
    }

    // ========================================================================
    // MAIN LOOP
    // ========================================================================

    fn run(&self, buffers: &BufferSet, warm: bool) -> RawResult {
        let settings = self.settings;
        let (mut pt, mut mu) = if warm {
            self.warm_start(buffers)
        } else {
            self.cold_start()
        };
        let Some(mut ev) = self.eval(&pt.w) else {
            return self.finish(&pt, 0, RawStatus::NumericalError, "non-finite evaluation at the starting point");
        };

        let mu_min = MU_MIN.min(settings.tol / 10.0);
        let mut nu = 1.0f64;
        let mut delta_w_last = 0.0;
        let mut acceptable = 0usize;
        let mut ls_failures = 0usize;
        let mut bfgs = match settings.hessian {
            HessianMode::LimitedMemory => Some(DampedBfgs::new(self.n)),
            HessianMode::Exact => None,
        };

        for iter in 0..=settings.max_iter {
            let a = self.jacobian(&ev);
            let c = self.residual(&ev, &pt.w);
            let dual = self.dual_residual(&ev, &a, &pt);
            let err = self.optimality_error(&dual, &c, &pt, 0.0);
            debug!(iter, f = ev.f, err, mu, inf_pr = norm_inf(&c), "ipm iteration");

            // degenerate bounds stall at x ~ sqrt(mu), so the products
            // themselves must reach the barrier floor
            if err <= settings.tol && self.complementarity(&pt) <= KAPPA_EPSILON * mu_min {
                return self.finish(&pt, iter, RawStatus::Solved, "Optimal Solution Found");
            }
            if err <= settings.acceptable_tol {
                acceptable += 1;
                if acceptable >= settings.acceptable_iter {
                    return self.finish(
                        &pt,
                        iter,
                        RawStatus::SolvedToAcceptableLevel,
                        "Solved To Acceptable Level",
                    );
                }
            } else {
                acceptable = 0;
            }
            if iter == settings.max_iter {
                return self.finish(&pt, iter, RawStatus::MaxIterations, "Maximum Number of Iterations Exceeded");
            }
            if self.control.expired() {
                return self.finish(&pt, iter, RawStatus::Timeout, "Maximum wall time exceeded");
            }

            // monotone barrier update
            while mu > mu_min && self.optimality_error(&dual, &c, &pt, mu) <= KAPPA_EPSILON * mu {
                mu = mu_min.max((KAPPA_MU * mu).min(mu.powf(THETA_MU)));
            }
            let tau = TAU_MIN.max(1.0 - mu);

            // ----------------------------------------------------------------
            // Newton system
            // ----------------------------------------------------------------
            let lam_g = self.full_multipliers(&pt.y);
            let w_x = match &bfgs {
                Some(b) => b.matrix().clone(),
                None => self.red.hess_lag(&pt.w[..self.n], 1.0, &lam_g),
            };
            let sigma: Vec<f64> = (0..self.dim)
                .map(|i| {
                    let mut s = 0.0;
                    if self.lw[i].is_finite() {
                        s += pt.zl[i] / (pt.w[i] - self.lw[i]);
                    }
                    if self.uw[i].is_finite() {
                        s += pt.zu[i] / (self.uw[i] - pt.w[i]);
                    }
                    s
                })
                .collect();
            let grad_phi = self.barrier_gradient(&ev, &pt.w, mu);
            let aty = mat_t_vec(&a, &pt.y, self.dim);
            let mut rhs: Vec<f64> = grad_phi.iter().zip(&aty).map(|(g, t)| -(g + t)).collect();
            rhs.extend(c.iter().map(|v| -v));

            let Some((step, delta_w)) = self.newton_step(&w_x, &sigma, &a, &rhs, mu, &mut delta_w_last) else {
                return self.finish(&pt, iter, RawStatus::NumericalError, "KKT matrix could not be regularized");
            };
            let dw = &step[..self.dim];
            let dy = &step[self.dim..];

            let mut dzl = vec![0.0; self.dim];
            let mut dzu = vec![0.0; self.dim];
            for i in 0..self.dim {
                if self.lw[i].is_finite() {
                    let d = pt.w[i] - self.lw[i];
                    dzl[i] = (mu - pt.zl[i] * d - pt.zl[i] * dw[i]) / d;
                }
                if self.uw[i].is_finite() {
                    let d = self.uw[i] - pt.w[i];
                    dzu[i] = (mu - pt.zu[i] * d + pt.zu[i] * dw[i]) / d;
                }
            }

            let alpha_max = Self::fraction_to_boundary(&pt.w, dw, &self.lw, &self.uw, tau);
            let zeros_dim = vec![0.0; self.dim];
            let no_upper = vec![f64::INFINITY; self.dim];
            let alpha_z = Self::fraction_to_boundary(&pt.zl, &dzl, &zeros_dim, &no_upper, tau)
                .min(Self::fraction_to_boundary(&pt.zu, &dzu, &zeros_dim, &no_upper, tau));

            // ----------------------------------------------------------------
            // ℓ1 merit line search
            // ----------------------------------------------------------------
            let c_norm = norm1(&c);
            let dphi = dot(&grad_phi, dw);
            let mut h_dw = mat_vec(&w_x, &dw[..self.n]);
            h_dw.resize(self.dim, 0.0);
            for i in 0..self.dim {
                h_dw[i] += (sigma[i] + delta_w) * dw[i];
            }
            if c_norm > 0.0 {
                let curvature = dot(dw, &h_dw).max(0.0);
                let y_next: Vec<f64> = pt.y.iter().zip(dy).map(|(y, d)| y + d).collect();
                let needed = ((dphi + 0.5 * curvature) / (0.9 * c_norm)).max(norm_inf(&y_next));
                if needed > nu {
                    nu = needed + 1e-4;
                }
            }
            let merit0 = self.barrier_value(ev.f, &pt.w, mu) + nu * c_norm;
            let slope = dphi - nu * c_norm;

            let mut alpha = alpha_max;
            let mut accepted = None;
            let tiny_step = norm_inf(dw) <= 1e-14 * (1.0 + norm_inf(&pt.w));
            while alpha >= 1e-14 {
                let trial: Vec<f64> = pt.w.iter().zip(dw).map(|(w, d)| w + alpha * d).collect();
                if let Some(ev_t) = self.eval(&trial) {
                    let merit = self.barrier_value(ev_t.f, &trial, mu) + nu * norm1(&self.residual(&ev_t, &trial));
                    let allowed = merit0 + ARMIJO * alpha * slope.min(0.0) + 10.0 * f64::EPSILON * merit0.abs();
                    if tiny_step || (merit.is_finite() && merit <= allowed) {
                        accepted = Some((trial, ev_t));
                        break;
                    }
                }
                alpha *= 0.5;
            }

            let (w_new, ev_new) = match accepted {
                Some(found) => {
                    ls_failures = 0;
                    found
                }
                None => {
                    // take the boundary-limited step without a decrease
                    ls_failures += 1;
                    if ls_failures > MAX_LINE_SEARCH_FAILURES {
                        return self.finish(&pt, iter, RawStatus::NumericalError, "line search failed repeatedly");
                    }
                    alpha = alpha_max;
                    let trial: Vec<f64> = pt.w.iter().zip(dw).map(|(w, d)| w + alpha * d).collect();
                    match self.eval(&trial) {
                        Some(ev_t) => (trial, ev_t),
                        None => {
                            return self.finish(&pt, iter, RawStatus::NumericalError, "non-finite evaluation in line search")
                        }
                    }
                }
            };
            trace!(iter, alpha, alpha_z, nu, "step accepted");

            let y_new: Vec<f64> = pt.y.iter().zip(dy).map(|(y, d)| y + alpha * d).collect();
            if let Some(b) = bfgs.as_mut() {
                let lam_new = self.full_multipliers(&y_new);
                let s: Vec<f64> = (0..self.n).map(|i| w_new[i] - pt.w[i]).collect();
                let old = self.lagrangian_gradient(&ev, &lam_new);
                let new = self.lagrangian_gradient(&ev_new, &lam_new);
                let yv: Vec<f64> = new.iter().zip(old).map(|(a, b)| a - b).collect();
                b.update(&s, &yv);
            }

            pt.w = w_new;
            pt.y = y_new;
            for i in 0..self.dim {
                if self.lw[i].is_finite() {
                    let d = pt.w[i] - self.lw[i];
                    let z = pt.zl[i] + alpha_z * dzl[i];
                    pt.zl[i] = z.min(KAPPA_SIGMA * mu / d).max(mu / (KAPPA_SIGMA * d));
                }
                if self.uw[i].is_finite() {
                    let d = self.uw[i] - pt.w[i];
                    let z = pt.zu[i] + alpha_z * dzu[i];
                    pt.zu[i] = z.min(KAPPA_SIGMA * mu / d).max(mu / (KAPPA_SIGMA * d));
                }
            }
            ev = ev_new;
        }
        self.finish(&pt, settings.max_iter, RawStatus::MaxIterations, "Maximum Number of Iterations Exceeded")
    }
}
