//! Solve results and status codes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffers::BufferKey;
use crate::error::NlpError;
use crate::permutation::Permutation;

/// Status exposed by a session. Failed attempts that never passed input
/// checks (buffer sizes, non-finite values) leave the status unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// The last solve converged.
    Solved,
    /// The last solve attempt was rejected by bound validation.
    InfeasibleBounds,
    /// The last solve attempt failed inside the backend or was rejected
    /// for a missing capability.
    BackendFailure,
    /// No solve has been attempted yet.
    Unsolved,
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Solved)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Solved => write!(f, "solved"),
            SolveStatus::InfeasibleBounds => write!(f, "infeasible bounds"),
            SolveStatus::BackendFailure => write!(f, "backend failure"),
            SolveStatus::Unsolved => write!(f, "unsolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    pub backend: String,
    pub iterations: usize,
    /// Backend-specific description of how it terminated.
    pub return_status: String,
    pub solve_time_ms: f64,
}

/// Primal point, objective, constraint values and multipliers of one
/// successful solve.
///
/// Multipliers follow `∇f + (∂g/∂x)ᵀ lam_g + lam_x = 0`: negative at a
/// binding lower bound, positive at a binding upper bound, zero when the
/// bound is inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub g: Vec<f64>,
    pub lam_x: Vec<f64>,
    pub lam_g: Vec<f64>,
    /// Sensitivity of the optimal value to the parameters.
    pub lam_p: Vec<f64>,
    pub stats: SolveStats,
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<f64>>,
}

impl SolveResult {
    /// Read an output by name.
    pub fn output(&self, key: &str) -> Result<Vec<f64>, NlpError> {
        match key.parse::<BufferKey>() {
            Ok(BufferKey::X) => Ok(self.x.clone()),
            Ok(BufferKey::F) => Ok(vec![self.f]),
            Ok(BufferKey::G) => Ok(self.g.clone()),
            Ok(BufferKey::LamX) => Ok(self.lam_x.clone()),
            Ok(BufferKey::LamG) => Ok(self.lam_g.clone()),
            Ok(BufferKey::LamP) => Ok(self.lam_p.clone()),
            Ok(other) => Err(NlpError::UnknownBufferKey(other.to_string())),
            Err(err) => self.extras.get(key).cloned().ok_or(err),
        }
    }

    /// Reorder variable- and constraint-indexed outputs.
    pub fn permuted(&self, var_perm: &Permutation, con_perm: &Permutation) -> SolveResult {
        SolveResult {
            x: var_perm.apply(&self.x),
            f: self.f,
            g: con_perm.apply(&self.g),
            lam_x: var_perm.apply(&self.lam_x),
            lam_g: con_perm.apply(&self.lam_g),
            lam_p: self.lam_p.clone(),
            stats: self.stats.clone(),
            extras: self.extras.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SolveResult {
        SolveResult {
            x: vec![1.0, 2.0],
            f: 3.0,
            g: vec![4.0],
            lam_x: vec![0.0, -1.0],
            lam_g: vec![0.5],
            lam_p: vec![],
            stats: SolveStats {
                backend: "ipm".into(),
                iterations: 7,
                return_status: "Solve_Succeeded".into(),
                solve_time_ms: 1.5,
            },
            extras: [("z_l".to_string(), vec![0.0, 1.0])].into_iter().collect(),
        }
    }

    #[test]
    fn test_output_by_key() {
        let res = sample();
        assert_eq!(res.output("f").unwrap(), vec![3.0]);
        assert_eq!(res.output("lam_x").unwrap(), vec![0.0, -1.0]);
        assert_eq!(res.output("z_l").unwrap(), vec![0.0, 1.0]);
        assert!(matches!(res.output("lbx"), Err(NlpError::UnknownBufferKey(_))));
        assert!(matches!(res.output("bogus"), Err(NlpError::UnknownBufferKey(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let res = sample();
        let json = serde_json::to_string(&res).unwrap();
        let back: SolveResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
        assert_eq!(
            serde_json::to_string(&SolveStatus::InfeasibleBounds).unwrap(),
            "\"infeasible_bounds\""
        );
    }
}
