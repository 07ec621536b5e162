//! Dense convex QP sub-solvers used by the SQP backend.
//!
//! Every solver handles
//!
//! ```text
//! minimize    ½ dᵀ H d + cᵀ d
//! subject to  lba ≤ A d ≤ uba
//!             lbx ≤ d ≤ ubx
//! ```
//!
//! and returns multipliers under the same sign law as the facade:
//! `H d + c + Aᵀ lam_a + lam_x = 0`.

mod active_set;
mod conic;

pub use self::active_set::{ActiveSetConfig, ActiveSetQp};
pub use self::conic::{ClarabelQp, ClarabelQpConfig};

use nlpsol_core::{FailureReason, NlpError, OptionSpec, OptionType, Options};
use thiserror::Error;

use crate::linalg::{dot, mat_vec, DenseMatrix};

#[derive(Debug, Clone)]
pub struct QpProblem {
    pub h: DenseMatrix,
    pub c: Vec<f64>,
    pub a: DenseMatrix,
    pub lba: Vec<f64>,
    pub uba: Vec<f64>,
    pub lbx: Vec<f64>,
    pub ubx: Vec<f64>,
}

impl QpProblem {
    pub fn n(&self) -> usize {
        self.c.len()
    }

    pub fn m(&self) -> usize {
        self.a.len()
    }

    pub fn objective(&self, d: &[f64]) -> f64 {
        0.5 * dot(d, &mat_vec(&self.h, d)) + dot(&self.c, d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub x: Vec<f64>,
    pub lam_a: Vec<f64>,
    pub lam_x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("QP is infeasible: {0}")]
    Infeasible(String),
    #[error("QP iteration limit {0} reached")]
    MaxIterations(usize),
    #[error("QP numerical failure: {0}")]
    Numerical(String),
}

impl From<QpError> for FailureReason {
    fn from(err: QpError) -> Self {
        match err {
            QpError::Infeasible(msg) => FailureReason::Infeasible(msg),
            QpError::MaxIterations(n) => FailureReason::NonConvergence { iterations: n },
            QpError::Numerical(msg) => FailureReason::Numerical(msg),
        }
    }
}

pub trait QpSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, qp: &QpProblem) -> Result<QpSolution, QpError>;
}

pub const QPSOL_CHOICES: &[&str] = &["active_set", "clarabel"];

const CLARABEL_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("max_iter", OptionType::Int, "interior point iteration limit"),
    OptionSpec::new("tol_feas", OptionType::Float, "primal/dual feasibility tolerance"),
    OptionSpec::new("tol_gap_abs", OptionType::Float, "absolute duality gap tolerance"),
    OptionSpec::new("tol_gap_rel", OptionType::Float, "relative duality gap tolerance"),
];

const ACTIVE_SET_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("max_iter", OptionType::Int, "active set change limit"),
    OptionSpec::new(
        "feasibility_tol",
        OptionType::Float,
        "relative violation below which a constraint counts as satisfied",
    ),
];

/// Options recognized inside `qpsol_options`, per sub-solver.
pub fn qp_option_specs(name: &str) -> &'static [OptionSpec] {
    match name {
        "clarabel" => CLARABEL_OPTIONS,
        _ => ACTIVE_SET_OPTIONS,
    }
}

/// Build the QP sub-solver named by the `qpsol` option.
pub fn create_qp_solver(name: &str, options: &Options) -> Result<Box<dyn QpSolver>, NlpError> {
    let invalid = |reason: String| NlpError::InvalidOption {
        backend: "sqp".into(),
        key: "qpsol".into(),
        reason,
    };
    if !QPSOL_CHOICES.contains(&name) {
        return Err(invalid(format!("'{}' is not one of {:?}", name, QPSOL_CHOICES)));
    }
    nlpsol_core::validate_options(name, qp_option_specs(name), options)?;
    let solver: Box<dyn QpSolver> = match name {
        "clarabel" => {
            let defaults = ClarabelQpConfig::default();
            Box::new(ClarabelQp::new(ClarabelQpConfig {
                max_iter: options
                    .get_i64("max_iter")
                    .map(|v| v.clamp(1, u32::MAX as i64) as u32)
                    .unwrap_or(defaults.max_iter),
                tol_feas: options.get_f64("tol_feas").unwrap_or(defaults.tol_feas),
                tol_gap_abs: options.get_f64("tol_gap_abs").unwrap_or(defaults.tol_gap_abs),
                tol_gap_rel: options.get_f64("tol_gap_rel").unwrap_or(defaults.tol_gap_rel),
            }))
        }
        _ => {
            let defaults = ActiveSetConfig::default();
            Box::new(ActiveSetQp::new(ActiveSetConfig {
                max_iter: options
                    .get_i64("max_iter")
                    .map(|v| v.max(1) as usize)
                    .unwrap_or(defaults.max_iter),
                feasibility_tol: options
                    .get_f64("feasibility_tol")
                    .unwrap_or(defaults.feasibility_tol),
            }))
        }
    };
    Ok(solver)
}
