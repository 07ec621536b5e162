//! Named input buffers of a solve session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::bounds;
use crate::error::NlpError;
use crate::permutation::Permutation;
use crate::problem::Problem;

/// The fixed buffer vocabulary shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKey {
    X0,
    Lbx,
    Ubx,
    Lbg,
    Ubg,
    P,
    LamX0,
    LamG0,
    X,
    F,
    G,
    LamX,
    LamG,
    LamP,
}

impl BufferKey {
    pub const INPUTS: [BufferKey; 8] = [
        BufferKey::X0,
        BufferKey::Lbx,
        BufferKey::Ubx,
        BufferKey::Lbg,
        BufferKey::Ubg,
        BufferKey::P,
        BufferKey::LamX0,
        BufferKey::LamG0,
    ];

    pub const OUTPUTS: [BufferKey; 6] = [
        BufferKey::X,
        BufferKey::F,
        BufferKey::G,
        BufferKey::LamX,
        BufferKey::LamG,
        BufferKey::LamP,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BufferKey::X0 => "x0",
            BufferKey::Lbx => "lbx",
            BufferKey::Ubx => "ubx",
            BufferKey::Lbg => "lbg",
            BufferKey::Ubg => "ubg",
            BufferKey::P => "p",
            BufferKey::LamX0 => "lam_x0",
            BufferKey::LamG0 => "lam_g0",
            BufferKey::X => "x",
            BufferKey::F => "f",
            BufferKey::G => "g",
            BufferKey::LamX => "lam_x",
            BufferKey::LamG => "lam_g",
            BufferKey::LamP => "lam_p",
        }
    }

    pub fn is_input(&self) -> bool {
        Self::INPUTS.contains(self)
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BufferKey {
    type Err = NlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::INPUTS
            .iter()
            .chain(Self::OUTPUTS.iter())
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| NlpError::UnknownBufferKey(s.to_string()))
    }
}

/// Bounds, initial guesses and parameter values for one problem.
///
/// Defaults: `lbx = lbg = -inf`, `ubx = ubg = +inf`, `p = 0`, no initial
/// guess and no multiplier guesses.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSet {
    lbx: Vec<f64>,
    ubx: Vec<f64>,
    lbg: Vec<f64>,
    ubg: Vec<f64>,
    p: Vec<f64>,
    x0: Option<Vec<f64>>,
    lam_x0: Option<Vec<f64>>,
    lam_g0: Option<Vec<f64>>,
    extension_keys: BTreeSet<String>,
    extensions: BTreeMap<String, Vec<f64>>,
}

impl BufferSet {
    pub fn new(n_x: usize, n_g: usize, n_p: usize) -> Self {
        Self {
            lbx: vec![f64::NEG_INFINITY; n_x],
            ubx: vec![f64::INFINITY; n_x],
            lbg: vec![f64::NEG_INFINITY; n_g],
            ubg: vec![f64::INFINITY; n_g],
            p: vec![0.0; n_p],
            x0: None,
            lam_x0: None,
            lam_g0: None,
            extension_keys: BTreeSet::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn for_problem(problem: &Problem) -> Self {
        Self::new(problem.n_x(), problem.n_g(), problem.n_p())
    }

    /// Accept an additional, backend-defined input key.
    pub fn allow_extension(&mut self, key: &str) {
        self.extension_keys.insert(key.to_string());
    }

    pub fn n_x(&self) -> usize {
        self.lbx.len()
    }

    pub fn n_g(&self) -> usize {
        self.lbg.len()
    }

    pub fn n_p(&self) -> usize {
        self.p.len()
    }

    fn expected_len(&self, key: BufferKey) -> usize {
        match key {
            BufferKey::X0 | BufferKey::Lbx | BufferKey::Ubx | BufferKey::LamX0 => self.n_x(),
            BufferKey::Lbg | BufferKey::Ubg | BufferKey::LamG0 => self.n_g(),
            BufferKey::P => self.n_p(),
            _ => 0,
        }
    }

    /// Set an input buffer by name.
    pub fn set(&mut self, key: &str, values: &[f64]) -> Result<(), NlpError> {
        match key.parse::<BufferKey>() {
            Ok(k) => self.set_key(k, values),
            Err(_) if self.extension_keys.contains(key) => {
                if let Some(index) = values.iter().position(|v| v.is_nan()) {
                    return Err(NlpError::NonFiniteInput {
                        key: key.to_string(),
                        index,
                    });
                }
                self.extensions.insert(key.to_string(), values.to_vec());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn set_key(&mut self, key: BufferKey, values: &[f64]) -> Result<(), NlpError> {
        if !key.is_input() {
            return Err(NlpError::UnknownBufferKey(key.to_string()));
        }
        let expected = self.expected_len(key);
        if values.len() != expected {
            return Err(NlpError::BufferSize {
                key: key.to_string(),
                expected,
                actual: values.len(),
            });
        }
        let bound = matches!(
            key,
            BufferKey::Lbx | BufferKey::Ubx | BufferKey::Lbg | BufferKey::Ubg
        );
        // bounds may be infinite, everything else must be finite
        let bad = values
            .iter()
            .position(|v| if bound { v.is_nan() } else { !v.is_finite() });
        if let Some(index) = bad {
            return Err(NlpError::NonFiniteInput {
                key: key.to_string(),
                index,
            });
        }
        let values = values.to_vec();
        match key {
            BufferKey::X0 => self.x0 = Some(values),
            BufferKey::Lbx => self.lbx = values,
            BufferKey::Ubx => self.ubx = values,
            BufferKey::Lbg => self.lbg = values,
            BufferKey::Ubg => self.ubg = values,
            BufferKey::P => self.p = values,
            BufferKey::LamX0 => self.lam_x0 = Some(values),
            BufferKey::LamG0 => self.lam_g0 = Some(values),
            _ => return Err(NlpError::UnknownBufferKey(key.to_string())),
        }
        Ok(())
    }

    /// Broadcast a scalar to every slot of an input buffer.
    pub fn fill(&mut self, key: &str, value: f64) -> Result<(), NlpError> {
        let k: BufferKey = key.parse()?;
        let values = vec![value; self.expected_len(k)];
        self.set_key(k, &values)
    }

    /// Return an optional input (`x0`, `lam_x0`, `lam_g0`, extensions) to
    /// its unset state.
    pub fn clear(&mut self, key: &str) -> Result<(), NlpError> {
        match key.parse::<BufferKey>() {
            Ok(BufferKey::X0) => self.x0 = None,
            Ok(BufferKey::LamX0) => self.lam_x0 = None,
            Ok(BufferKey::LamG0) => self.lam_g0 = None,
            Ok(k) if k.is_input() => {
                let n = self.expected_len(k);
                match k {
                    BufferKey::Lbx => self.lbx = vec![f64::NEG_INFINITY; n],
                    BufferKey::Ubx => self.ubx = vec![f64::INFINITY; n],
                    BufferKey::Lbg => self.lbg = vec![f64::NEG_INFINITY; n],
                    BufferKey::Ubg => self.ubg = vec![f64::INFINITY; n],
                    _ => self.p = vec![0.0; n],
                }
            }
            Ok(k) => return Err(NlpError::UnknownBufferKey(k.to_string())),
            Err(_) if self.extension_keys.contains(key) => {
                self.extensions.remove(key);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Read an input buffer by name. Unset optional buffers read as their
    /// effective value (initial guess, zero multipliers).
    pub fn get(&self, key: &str) -> Result<Vec<f64>, NlpError> {
        match key.parse::<BufferKey>() {
            Ok(BufferKey::X0) => Ok(self.initial_guess()),
            Ok(BufferKey::Lbx) => Ok(self.lbx.clone()),
            Ok(BufferKey::Ubx) => Ok(self.ubx.clone()),
            Ok(BufferKey::Lbg) => Ok(self.lbg.clone()),
            Ok(BufferKey::Ubg) => Ok(self.ubg.clone()),
            Ok(BufferKey::P) => Ok(self.p.clone()),
            Ok(BufferKey::LamX0) => Ok(self.lam_x0.clone().unwrap_or_else(|| vec![0.0; self.n_x()])),
            Ok(BufferKey::LamG0) => Ok(self.lam_g0.clone().unwrap_or_else(|| vec![0.0; self.n_g()])),
            Ok(k) => Err(NlpError::UnknownBufferKey(k.to_string())),
            Err(err) => self
                .extensions
                .get(key)
                .cloned()
                .or_else(|| self.extension_keys.contains(key).then(Vec::new))
                .ok_or(err),
        }
    }

    pub fn lbx(&self) -> &[f64] {
        &self.lbx
    }

    pub fn ubx(&self) -> &[f64] {
        &self.ubx
    }

    pub fn lbg(&self) -> &[f64] {
        &self.lbg
    }

    pub fn ubg(&self) -> &[f64] {
        &self.ubg
    }

    pub fn p(&self) -> &[f64] {
        &self.p
    }

    pub fn x0(&self) -> Option<&[f64]> {
        self.x0.as_deref()
    }

    pub fn lam_x0(&self) -> Option<&[f64]> {
        self.lam_x0.as_deref()
    }

    pub fn lam_g0(&self) -> Option<&[f64]> {
        self.lam_g0.as_deref()
    }

    pub fn has_multiplier_guess(&self) -> bool {
        self.lam_x0.is_some() || self.lam_g0.is_some()
    }

    pub fn extension(&self, key: &str) -> Option<&[f64]> {
        self.extensions.get(key).map(Vec::as_slice)
    }

    /// The starting point handed to backends: `x0` when set; otherwise the
    /// fixed value for slots with `lbx == ubx`, and zero elsewhere.
    pub fn initial_guess(&self) -> Vec<f64> {
        match &self.x0 {
            Some(x0) => x0.clone(),
            None => self
                .lbx
                .iter()
                .zip(&self.ubx)
                .map(|(lo, hi)| if bounds::is_fixed(*lo, *hi) { *lo } else { 0.0 })
                .collect(),
        }
    }

    /// The buffers of the relabeled problem (see [`Problem::permuted`]).
    pub fn permuted(&self, var_perm: &Permutation, con_perm: &Permutation) -> BufferSet {
        BufferSet {
            lbx: var_perm.apply(&self.lbx),
            ubx: var_perm.apply(&self.ubx),
            lbg: con_perm.apply(&self.lbg),
            ubg: con_perm.apply(&self.ubg),
            p: self.p.clone(),
            x0: self.x0.as_ref().map(|v| var_perm.apply(v)),
            lam_x0: self.lam_x0.as_ref().map(|v| var_perm.apply(v)),
            lam_g0: self.lam_g0.as_ref().map(|v| con_perm.apply(v)),
            extension_keys: self.extension_keys.clone(),
            extensions: self.extensions.clone(),
        }
    }
}
