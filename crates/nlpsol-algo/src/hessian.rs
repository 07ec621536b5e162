//! Quasi-Newton approximation of the Lagrangian Hessian.

use serde::{Deserialize, Serialize};

use crate::linalg::{dot, identity, mat_vec, DenseMatrix};

/// How a backend obtains second-order information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HessianMode {
    /// Symbolic Hessian of the Lagrangian.
    Exact,
    /// Damped BFGS updates from gradient differences.
    LimitedMemory,
}

impl HessianMode {
    pub const CHOICES: &'static [&'static str] = &["exact", "limited-memory"];

    pub fn from_option(value: Option<&str>) -> Self {
        match value {
            Some("limited-memory") => HessianMode::LimitedMemory,
            _ => HessianMode::Exact,
        }
    }
}

/// Dense BFGS matrix with Powell damping, which keeps it positive definite
/// even when the curvature condition `sᵀy > 0` fails.
#[derive(Debug, Clone)]
pub struct DampedBfgs {
    b: DenseMatrix,
    updates: usize,
}

impl DampedBfgs {
    pub fn new(n: usize) -> Self {
        Self {
            b: identity(n),
            updates: 0,
        }
    }

    pub fn matrix(&self) -> &DenseMatrix {
        &self.b
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Update with step `s` and gradient-of-Lagrangian difference `y`.
    pub fn update(&mut self, s: &[f64], y: &[f64]) {
        let ss = dot(s, s);
        if ss <= 1e-300 {
            return;
        }
        let sy = dot(s, y);
        // before the first update, rescale the identity to the observed curvature
        if self.updates == 0 && sy > 0.0 {
            let scale = dot(y, y) / sy;
            for (i, row) in self.b.iter_mut().enumerate() {
                row[i] = scale;
            }
        }

        let bs = mat_vec(&self.b, s);
        let sbs = dot(s, &bs);
        if sbs <= 1e-16 * ss {
            return;
        }
        let theta = if sy >= 0.2 * sbs {
            1.0
        } else {
            0.8 * sbs / (sbs - sy)
        };
        let r: Vec<f64> = y
            .iter()
            .zip(&bs)
            .map(|(yi, bsi)| theta * yi + (1.0 - theta) * bsi)
            .collect();
        let sr = dot(s, &r);
        if sr <= 0.0 {
            return;
        }
        let n = self.b.len();
        for i in 0..n {
            for j in 0..n {
                self.b[i][j] += -bs[i] * bs[j] / sbs + r[i] * r[j] / sr;
            }
        }
        self.updates += 1;
    }
}
