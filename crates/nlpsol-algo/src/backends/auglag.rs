//! Augmented Lagrangian method with an L-BFGS inner solver.
//!
//! Constraint rows and finite variable bounds become Powell–Hestenes–
//! Rockafellar terms added to the objective:
//!
//! ```text
//! equality  v = l:   λ (v - l) + ρ/2 (v - l)²
//! upper     v ≤ u:   (max(0, μ_u + ρ (v - u))² - μ_u²) / 2ρ
//! lower     v ≥ l:   (max(0, μ_l + ρ (l - v))² - μ_l²) / 2ρ
//! ```
//!
//! Each outer iteration minimizes the augmented function with argmin's
//! L-BFGS and a Moré–Thuente line search, then updates the multipliers and
//! grows ρ when feasibility does not improve fast enough.

use std::sync::Arc;

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nlpsol_core::{validate_options, BufferSet, NlpError, OptionSpec, OptionType, Options, Problem};
use tracing::{debug, warn};

use super::{all_finite, project, Reduced};
use crate::linalg::{mat_t_vec, norm_inf};
use crate::traits::{BackendHandle, Capabilities, NlpBackend, RawResult, RawStatus, SolveControl};

const OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("tol", OptionType::Float, "constraint violation tolerance"),
    OptionSpec::new("tol_du", OptionType::Float, "Lagrangian gradient tolerance"),
    OptionSpec::new("max_iter", OptionType::Int, "outer iteration limit"),
    OptionSpec::new("max_inner_iter", OptionType::Int, "L-BFGS iteration limit per outer iteration"),
    OptionSpec::new("rho_init", OptionType::Float, "initial penalty parameter"),
    OptionSpec::new("rho_max", OptionType::Float, "penalty parameter cap"),
    OptionSpec::new("lbfgs_memory", OptionType::Int, "number of stored L-BFGS correction pairs"),
];

/// Required reduction of the violation per outer iteration before ρ grows.
const FEASIBILITY_PROGRESS: f64 = 0.25;
const RHO_GROWTH: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct AugLagSettings {
    pub tol: f64,
    pub tol_du: f64,
    pub max_iter: usize,
    pub max_inner_iter: u64,
    pub rho_init: f64,
    pub rho_max: f64,
    pub lbfgs_memory: usize,
}

impl Default for AugLagSettings {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            tol_du: 1e-6,
            max_iter: 50,
            max_inner_iter: 200,
            rho_init: 10.0,
            rho_max: 1e8,
            lbfgs_memory: 7,
        }
    }
}

impl AugLagSettings {
    pub fn from_options(options: &Options) -> Self {
        let d = Self::default();
        Self {
            tol: options.get_f64("tol").unwrap_or(d.tol),
            tol_du: options.get_f64("tol_du").unwrap_or(d.tol_du),
            max_iter: options
                .get_i64("max_iter")
                .map(|v| v.max(1) as usize)
                .unwrap_or(d.max_iter),
            max_inner_iter: options
                .get_i64("max_inner_iter")
                .map(|v| v.max(1) as u64)
                .unwrap_or(d.max_inner_iter),
            rho_init: options.get_f64("rho_init").unwrap_or(d.rho_init),
            rho_max: options.get_f64("rho_max").unwrap_or(d.rho_max),
            lbfgs_memory: options
                .get_i64("lbfgs_memory")
                .map(|v| v.max(1) as usize)
                .unwrap_or(d.lbfgs_memory),
        }
    }
}

/// Augmented Lagrangian backend, registered as `auglag`.
pub struct AugLagBackend;

impl NlpBackend for AugLagBackend {
    fn id(&self) -> &str {
        "auglag"
    }

    fn description(&self) -> &str {
        "augmented Lagrangian with L-BFGS inner minimization"
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
        let settings = AugLagSettings::from_options(options);
        debug!(n_x = problem.n_x(), n_g = problem.n_g(), "prepared auglag");
        Ok(Box::new(AugLagHandle {
            problem: Arc::clone(problem),
            settings,
        }))
    }
}

struct AugLagHandle {
    problem: Arc<Problem>,
    settings: AugLagSettings,
}

impl BackendHandle for AugLagHandle {
    fn solve(&mut self, buffers: &BufferSet, _control: &SolveControl) -> Result<RawResult, NlpError> {
        let red = Reduced::new(&self.problem, buffers);
        if red.n() == 0 {
            return Ok(red.solve_without_free_variables(self.settings.tol));
        }
        Ok(run(&red, &self.settings, buffers))
    }
}

// ============================================================================
// AUGMENTED LAGRANGIAN FUNCTION
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Source {
    Row(usize),
    Var(usize),
}

/// One bounded quantity with its PHR multipliers.
#[derive(Debug, Clone)]
struct Term {
    source: Source,
    lower: f64,
    upper: f64,
    /// Equality multiplier, or the upper-side multiplier `μ_u ≥ 0`.
    mu_u: f64,
    /// Lower-side multiplier `μ_l ≥ 0`; unused for equalities.
    mu_l: f64,
}

impl Term {
    fn is_equality(&self) -> bool {
        self.lower == self.upper
    }

    /// Value and derivative with respect to `v`.
    fn eval(&self, v: f64, rho: f64) -> (f64, f64) {
        if self.is_equality() {
            let r = v - self.lower;
            return (self.mu_u * r + 0.5 * rho * r * r, self.mu_u + rho * r);
        }
        let mut value = 0.0;
        let mut slope = 0.0;
        if self.upper.is_finite() {
            let t = (self.mu_u + rho * (v - self.upper)).max(0.0);
            value += (t * t - self.mu_u * self.mu_u) / (2.0 * rho);
            slope += t;
        }
        if self.lower.is_finite() {
            let t = (self.mu_l + rho * (self.lower - v)).max(0.0);
            value += (t * t - self.mu_l * self.mu_l) / (2.0 * rho);
            slope -= t;
        }
        (value, slope)
    }

    fn update(&mut self, v: f64, rho: f64) {
        if self.is_equality() {
            self.mu_u += rho * (v - self.lower);
            return;
        }
        if self.upper.is_finite() {
            self.mu_u = (self.mu_u + rho * (v - self.upper)).max(0.0);
        }
        if self.lower.is_finite() {
            self.mu_l = (self.mu_l + rho * (self.lower - v)).max(0.0);
        }
    }

    /// Multiplier under the sign law `∇f + Jᵀλ_g + λ_x = 0`.
    fn multiplier(&self) -> f64 {
        if self.is_equality() {
            self.mu_u
        } else {
            self.mu_u - self.mu_l
        }
    }

    fn seed(&mut self, lam: f64) {
        if self.is_equality() {
            self.mu_u = lam;
        } else {
            self.mu_u = if self.upper.is_finite() { lam.max(0.0) } else { 0.0 };
            self.mu_l = if self.lower.is_finite() { (-lam).max(0.0) } else { 0.0 };
        }
    }
}

struct AugmentedLagrangian<'a> {
    red: &'a Reduced<'a>,
    terms: &'a [Term],
    rho: f64,
}

impl AugmentedLagrangian<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        let g = self.red.g(x);
        let mut total = self.red.f(x);
        for term in self.terms {
            let v = match term.source {
                Source::Row(j) => g[j],
                Source::Var(i) => x[i],
            };
            total += term.eval(v, self.rho).0;
        }
        total
    }

    fn grad(&self, x: &[f64]) -> Vec<f64> {
        let g = self.red.g(x);
        let jac = self.red.jac_g(x);
        let mut grad = self.red.grad_f(x);
        let mut row_weights = vec![0.0; self.red.k()];
        for term in self.terms {
            match term.source {
                Source::Row(j) => row_weights[j] += term.eval(g[j], self.rho).1,
                Source::Var(i) => grad[i] += term.eval(x[i], self.rho).1,
            }
        }
        for (gi, w) in grad.iter_mut().zip(mat_t_vec(&jac, &row_weights, x.len())) {
            *gi += w;
        }
        grad
    }
}

impl CostFunction for AugmentedLagrangian<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.value(x))
    }
}

impl Gradient for AugmentedLagrangian<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        Ok(self.grad(x))
    }
}

fn build_terms(red: &Reduced<'_>, buffers: &BufferSet) -> Vec<Term> {
    let lam_g0 = buffers.lam_g0();
    let lam_x0 = buffers.lam_x0().map(|v| red.restrict(v));
    let mut terms = Vec::new();
    for j in 0..red.k() {
        let (lower, upper) = (red.lbg[j], red.ubg[j]);
        if lower.is_infinite() && upper.is_infinite() {
            continue;
        }
        let mut term = Term {
            source: Source::Row(j),
            lower,
            upper,
            mu_u: 0.0,
            mu_l: 0.0,
        };
        if let Some(lam) = lam_g0 {
            term.seed(lam[j]);
        }
        terms.push(term);
    }
    for i in 0..red.n() {
        let (lower, upper) = (red.lbx[i], red.ubx[i]);
        if lower.is_infinite() && upper.is_infinite() {
            continue;
        }
        let mut term = Term {
            source: Source::Var(i),
            lower,
            upper,
            mu_u: 0.0,
            mu_l: 0.0,
        };
        if let Some(lam) = &lam_x0 {
            term.seed(lam[i]);
        }
        terms.push(term);
    }
    terms
}

fn max_violation(red: &Reduced<'_>, terms: &[Term], x: &[f64]) -> f64 {
    let g = red.g(x);
    terms
        .iter()
        .map(|t| {
            let v = match t.source {
                Source::Row(j) => g[j],
                Source::Var(i) => x[i],
            };
            nlpsol_core::bounds::violation(v, t.lower, t.upper)
        })
        .fold(0.0, f64::max)
}

/// Sign-law multipliers from the current terms.
fn multipliers(red: &Reduced<'_>, terms: &[Term]) -> (Vec<f64>, Vec<f64>) {
    let mut lam_g = vec![0.0; red.k()];
    let mut lam_x = vec![0.0; red.n()];
    for t in terms {
        match t.source {
            Source::Row(j) => lam_g[j] = t.multiplier(),
            Source::Var(i) => lam_x[i] = t.multiplier(),
        }
    }
    (lam_g, lam_x)
}

// ============================================================================
// OUTER LOOP
// ============================================================================

fn run(red: &Reduced<'_>, settings: &AugLagSettings, buffers: &BufferSet) -> RawResult {
    let mut terms = build_terms(red, buffers);
    let mut x = red.start().to_vec();
    let mut rho = settings.rho_init;
    let mut last_violation = f64::INFINITY;
    let mut inner_total = 0usize;

    let finish = |x: &mut Vec<f64>, terms: &[Term], iterations: usize, status: RawStatus, message: &str| {
        project(x, &red.lbx, &red.ubx);
        let (lam_g, lam_x) = multipliers(red, terms);
        red.finish(x, &lam_x, lam_g, iterations, status, message)
    };

    for outer in 0..settings.max_iter {
        let problem = AugmentedLagrangian {
            red,
            terms: &terms,
            rho,
        };
        let linesearch = MoreThuenteLineSearch::new();
        let solver = match LBFGS::new(linesearch, settings.lbfgs_memory).with_tolerance_grad(settings.tol_du * 0.1) {
            Ok(solver) => solver,
            Err(err) => {
                return finish(&mut x, &terms, inner_total, RawStatus::NumericalError, &err.to_string());
            }
        };
        let start = x.clone();
        let result = Executor::new(problem, solver)
            .configure(|state| state.param(start).max_iters(settings.max_inner_iter))
            .run();
        match result {
            Ok(res) => {
                inner_total += res.state().get_iter() as usize;
                if let Some(best) = res.state().get_best_param() {
                    if all_finite(best) {
                        x = best.clone();
                    }
                }
            }
            Err(err) => {
                // keep the current point; a larger penalty may still help
                warn!(outer, %err, "L-BFGS inner solve failed");
            }
        }

        let g = red.g(&x);
        if !(all_finite(&g) && red.f(&x).is_finite()) {
            return finish(&mut x, &terms, inner_total, RawStatus::NumericalError, "non-finite evaluation");
        }
        for term in terms.iter_mut() {
            let v = match term.source {
                Source::Row(j) => g[j],
                Source::Var(i) => x[i],
            };
            term.update(v, rho);
        }

        let violation = max_violation(red, &terms, &x);
        let lagrangian = AugmentedLagrangian {
            red,
            terms: &terms,
            rho: 0.0,
        };
        let dual = norm_inf(&lagrangian_gradient(&lagrangian, &x));
        debug!(outer, rho, violation, dual, inner_total, "auglag outer iteration");

        if violation <= settings.tol && dual <= settings.tol_du {
            return finish(&mut x, &terms, inner_total, RawStatus::Solved, "converged");
        }
        if violation > FEASIBILITY_PROGRESS * last_violation {
            rho = (rho * RHO_GROWTH).min(settings.rho_max);
        }
        last_violation = violation;
    }

    let status = if last_violation > settings.tol.sqrt() && rho >= settings.rho_max {
        RawStatus::Infeasible
    } else {
        RawStatus::MaxIterations
    };
    finish(&mut x, &terms, inner_total, status, "outer iteration limit reached")
}

/// `∇f + Jᵀλ_g + λ_x` with the current multipliers.
fn lagrangian_gradient(al: &AugmentedLagrangian<'_>, x: &[f64]) -> Vec<f64> {
    let (lam_g, lam_x) = multipliers(al.red, al.terms);
    let jac = al.red.jac_g(x);
    let mut grad = al.red.grad_f(x);
    for ((gi, w), lx) in grad.iter_mut().zip(mat_t_vec(&jac, &lam_g, x.len())).zip(lam_x) {
        *gi += w + lx;
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::Expr;

    #[test]
    fn test_term_derivative_matches_difference() {
        let term = Term {
            source: Source::Row(0),
            lower: -1.0,
            upper: 2.0,
            mu_u: 0.3,
            mu_l: 0.1,
        };
        for v in [-1.5, 0.0, 1.9, 2.4] {
            let h = 1e-6;
            let numeric = (term.eval(v + h, 10.0).0 - term.eval(v - h, 10.0).0) / (2.0 * h);
            assert!((numeric - term.eval(v, 10.0).1).abs() < 1e-5, "v = {}", v);
        }
    }

    #[test]
    fn test_seed_splits_by_sign() {
        let mut term = Term {
            source: Source::Var(0),
            lower: 0.0,
            upper: 1.0,
            mu_u: 0.0,
            mu_l: 0.0,
        };
        term.seed(-2.0);
        assert_eq!((term.mu_u, term.mu_l), (0.0, 2.0));
        assert_eq!(term.multiplier(), -2.0);
    }

    #[test]
    fn test_equality_constrained_quadratic() {
        // min x² + y² s.t. x + y = 1
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let problem = Arc::new(
            Problem::builder()
                .variables([x.clone(), y.clone()])
                .objective(x.powi(2) + y.powi(2))
                .constraint(&x + &y)
                .build()
                .unwrap(),
        );
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("lbg", &[1.0]).unwrap();
        buffers.set("ubg", &[1.0]).unwrap();
        let mut handle = AugLagBackend.prepare(&problem, &Options::new()).unwrap();
        let raw = handle.solve(&buffers, &SolveControl::default()).unwrap();
        assert_eq!(raw.status, RawStatus::Solved, "{}", raw.message);
        assert!((raw.x[0] - 0.5).abs() < 1e-6);
        assert!((raw.lam_g[0] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_bound_multiplier_sign() {
        // min (x - 2)² with x ≤ 1: upper bound active, multiplier positive
        let x = Expr::sym("x");
        let problem = Arc::new(
            Problem::builder()
                .variables([x.clone()])
                .objective((&x - 2.0).powi(2))
                .build()
                .unwrap(),
        );
        let mut buffers = BufferSet::for_problem(&problem);
        buffers.set("ubx", &[1.0]).unwrap();
        let mut handle = AugLagBackend.prepare(&problem, &Options::new()).unwrap();
        let raw = handle.solve(&buffers, &SolveControl::default()).unwrap();
        assert!(raw.status.is_converged(), "{:?}", raw.status);
        assert!((raw.x[0] - 1.0).abs() < 1e-8);
        assert!((raw.lam_x[0] - 2.0).abs() < 1e-5);
    }
}
