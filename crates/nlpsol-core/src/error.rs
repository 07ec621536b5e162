//! Error types shared by every layer of the facade.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which family of bounds a [`NlpError::BoundsInconsistent`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundKind {
    /// `lbx` / `ubx`
    Variable,
    /// `lbg` / `ubg`
    Constraint,
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundKind::Variable => write!(f, "variable"),
            BoundKind::Constraint => write!(f, "constraint"),
        }
    }
}

/// Optional backend features a session may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WarmStart,
    InfiniteBounds,
    EmptyConstraints,
    Timeout,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::WarmStart => write!(f, "warm start"),
            Capability::InfiniteBounds => write!(f, "infinite bounds"),
            Capability::EmptyConstraints => write!(f, "empty constraint block"),
            Capability::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a backend could not produce a converged point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Iteration limit reached before the convergence test passed.
    NonConvergence { iterations: usize },
    /// The backend detected (local) infeasibility.
    Infeasible(String),
    /// The deadline configured on the session expired.
    Timeout { elapsed_ms: u64 },
    /// Factorization breakdown, NaN/Inf in evaluations, line search failure.
    Numerical(String),
    /// Broken backend contract (wrong result lengths, bad option wiring).
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonConvergence { iterations } => {
                write!(f, "no convergence after {} iterations", iterations)
            }
            FailureReason::Infeasible(msg) => write!(f, "infeasible: {}", msg),
            FailureReason::Timeout { elapsed_ms } => write!(f, "timed out after {} ms", elapsed_ms),
            FailureReason::Numerical(msg) => write!(f, "numerical failure: {}", msg),
            FailureReason::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// Error produced while parsing an expression from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Errors surfaced by the facade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NlpError {
    #[error("inconsistent {kind} bounds at index {index}: lower {lower} > upper {upper}")]
    BoundsInconsistent {
        kind: BoundKind,
        index: usize,
        lower: f64,
        upper: f64,
    },

    #[error("invalid problem descriptor: {0}")]
    DescriptorInvalid(String),

    #[error("backend '{backend}' does not support {capability}")]
    CapabilityUnsupported {
        backend: String,
        capability: Capability,
    },

    #[error("backend '{backend}' failed: {reason}")]
    BackendFailure {
        backend: String,
        reason: FailureReason,
    },

    #[error("unknown buffer key '{0}'")]
    UnknownBufferKey(String),

    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("no result available yet")]
    NoResultYet,

    #[error("buffer '{key}' expects {expected} entries, got {actual}")]
    BufferSize {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("buffer '{key}' has a non-finite value at index {index}")]
    NonFiniteInput { key: String, index: usize },

    #[error("invalid option '{key}' for backend '{backend}': {reason}")]
    InvalidOption {
        backend: String,
        key: String,
        reason: String,
    },

    #[error("failed to parse expression: {0}")]
    Parse(#[from] ParseError),
}

impl NlpError {
    /// True for errors raised before any backend work happened.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            NlpError::BoundsInconsistent { .. }
                | NlpError::CapabilityUnsupported { .. }
                | NlpError::BufferSize { .. }
                | NlpError::NonFiniteInput { .. }
        )
    }
}

pub type NlpResult<T> = Result<T, NlpError>;
