//! Backend adapter contract.
//!
//! A backend is a factory: [`NlpBackend::prepare`] does the structural,
//! one-time work for a problem descriptor and returns a [`BackendHandle`]
//! that can be solved repeatedly with different buffers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nlpsol_core::{BufferSet, NlpError, OptionSpec, Options, Problem};
use web_time::Instant;

/// Optional features a backend declares. The session checks these before
/// dispatching and fails fast with `CapabilityUnsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Uses `lam_x0` / `lam_g0` when provided.
    pub supports_warm_start: bool,
    /// Accepts `±inf` in bound buffers.
    pub supports_infinite_bounds: bool,
    /// Accepts problems with no constraints (`n_g = 0`).
    pub supports_empty_constraints: bool,
    /// Honours the deadline in [`SolveControl`].
    pub supports_timeout: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            supports_warm_start: true,
            supports_infinite_bounds: true,
            supports_empty_constraints: true,
            supports_timeout: true,
        }
    }
}

/// How a backend reports termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawStatus {
    Solved,
    SolvedToAcceptableLevel,
    MaxIterations,
    Infeasible,
    Timeout,
    NumericalError,
}

impl RawStatus {
    /// Statuses the session accepts as convergence.
    pub fn is_converged(&self) -> bool {
        matches!(self, RawStatus::Solved | RawStatus::SolvedToAcceptableLevel)
    }
}

impl fmt::Display for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RawStatus::Solved => "Solve_Succeeded",
            RawStatus::SolvedToAcceptableLevel => "Solved_To_Acceptable_Level",
            RawStatus::MaxIterations => "Maximum_Iterations_Exceeded",
            RawStatus::Infeasible => "Infeasible_Problem_Detected",
            RawStatus::Timeout => "Maximum_CpuTime_Exceeded",
            RawStatus::NumericalError => "Numerical_Error",
        };
        f.write_str(text)
    }
}

/// What a backend hands back from one solve, before the session normalizes
/// multipliers and computes derived outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub g: Vec<f64>,
    pub lam_x: Vec<f64>,
    pub lam_g: Vec<f64>,
    pub iterations: usize,
    pub status: RawStatus,
    /// Free-form description of the termination, e.g. the failing step.
    pub message: String,
    /// Values for the backend's extension output keys.
    pub extras: BTreeMap<String, Vec<f64>>,
}

/// Per-solve control passed by the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveControl {
    pub deadline: Option<Instant>,
}

impl SolveControl {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Prepared, reusable solver state for one problem structure.
pub trait BackendHandle: Send {
    /// Solve with the given buffers. `Err` is reserved for contract
    /// violations; non-convergence is reported through [`RawResult::status`].
    fn solve(&mut self, buffers: &BufferSet, control: &SolveControl) -> Result<RawResult, NlpError>;
}

/// A solver backend registered under a string id.
pub trait NlpBackend: Send + Sync {
    /// Unique identifier (e.g. "ipm", "sqp")
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Options this backend recognizes.
    fn option_specs(&self) -> &[OptionSpec];

    /// Extra input buffer keys beyond the standard set.
    fn extension_inputs(&self) -> &[&'static str] {
        &[]
    }

    /// Extra output keys reported in [`RawResult::extras`].
    fn extension_outputs(&self) -> &[&'static str] {
        &[]
    }

    /// One-time structural setup for `problem`. Options are validated
    /// against [`NlpBackend::option_specs`].
    fn prepare(&self, problem: &Arc<Problem>, options: &Options) -> Result<Box<dyn BackendHandle>, NlpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that traits are object-safe (can be used with dyn).
    #[test]
    fn test_traits_are_object_safe() {
        fn _accepts_backend(_b: &dyn NlpBackend) {}
        fn _accepts_handle(_h: &mut dyn BackendHandle) {}
    }

    /// Test that backend trait objects can be shared across threads.
    #[test]
    fn test_traits_are_send_sync() {
        fn _assert_send<T: Send>() {}
        fn _assert_sync<T: Sync>() {}
        _assert_send::<Arc<dyn NlpBackend>>();
        _assert_sync::<Arc<dyn NlpBackend>>();
        _assert_send::<Box<dyn BackendHandle>>();
    }

    #[test]
    fn test_converged_statuses() {
        assert!(RawStatus::Solved.is_converged());
        assert!(RawStatus::SolvedToAcceptableLevel.is_converged());
        assert!(!RawStatus::MaxIterations.is_converged());
        assert!(!RawStatus::Timeout.is_converged());
    }

    #[test]
    fn test_control_deadline() {
        assert!(!SolveControl::default().expired());
        let past = SolveControl::with_timeout(Some(Duration::ZERO));
        assert!(past.expired());
    }
}
