//! TOML problem files.
//!
//! ```toml
//! variables = ["x", "y"]
//! parameters = ["p"]
//! objective = "(p - x)^2 + 100*(y - x^2)^2"
//! constraints = ["x^2 + y^2"]
//! backend = "ipm"
//!
//! [inputs]
//! x0 = [0.5, 0.5]
//! lbg = [0.0]
//! ubg = [1.0]
//! p = [1.0]
//!
//! [options]
//! max_iter = 200
//! ```
//!
//! Bounds may use TOML's `inf` / `-inf`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use nlpsol_algo::SolveSession;
use nlpsol_core::{BufferKey, BufferSet, Expr, NlpError, Options, Problem};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemFile {
    pub variables: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Omitted means a pure feasibility problem (`f = 0`).
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub options: Options,
    /// Input buffers by key (`x0`, `lbx`, `ubx`, `lbg`, `ubg`, `p`,
    /// `lam_x0`, `lam_g0`).
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<f64>>,
}

impl ProblemFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading problem file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing problem file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Parse the expressions and build the descriptor.
    pub fn problem(&self) -> Result<Problem, NlpError> {
        let objective = match &self.objective {
            Some(text) => Expr::parse(text)?,
            None => Expr::zero(),
        };
        let constraints = self
            .constraints
            .iter()
            .map(|text| Expr::parse(text))
            .collect::<Result<Vec<_>, _>>()?;
        Problem::from_names(
            self.variables.clone(),
            self.parameters.clone(),
            objective,
            constraints,
        )
    }

    /// Copy the `[inputs]` table into a session.
    pub fn apply_inputs(&self, session: &mut SolveSession) -> Result<(), NlpError> {
        for (key, values) in &self.inputs {
            session.set(key, values)?;
        }
        Ok(())
    }

    /// Set one input from the command line. `key` is a buffer key, or the
    /// name of a declared parameter (its slot of `p`) or variable (its slot
    /// of `x0`), which takes exactly one value.
    pub fn apply_assignment(&self, session: &mut SolveSession, key: &str, values: &[f64]) -> Result<(), NlpError> {
        if key.parse::<BufferKey>().is_ok_and(|k| k.is_input()) {
            return session.set(key, values);
        }
        let slot = match self.parameters.iter().position(|name| name == key) {
            Some(i) => Some(("p", i)),
            None => self.variables.iter().position(|name| name == key).map(|i| ("x0", i)),
        };
        let Some((buffer, index)) = slot else {
            return session.set(key, values);
        };
        let [value] = values else {
            return Err(NlpError::BufferSize {
                key: key.to_string(),
                expected: 1,
                actual: values.len(),
            });
        };
        let mut current = session.input(buffer)?;
        current[index] = *value;
        session.set(buffer, &current)
    }

    /// The `[inputs]` table as a standalone buffer set for `problem`.
    pub fn buffers(&self, problem: &Problem) -> Result<BufferSet, NlpError> {
        let mut buffers = BufferSet::for_problem(problem);
        for (key, values) in &self.inputs {
            buffers.set(key, values)?;
        }
        Ok(buffers)
    }
}
