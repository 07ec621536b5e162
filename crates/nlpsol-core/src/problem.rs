//! The canonical problem descriptor.
//!
//! ```text
//! minimize    f(x, p)
//!    x
//! subject to  lbx <= x       <= ubx
//!             lbg <= g(x, p) <= ubg
//! ```
//!
//! A [`Problem`] is validated once at construction and is immutable
//! afterwards; share it between sessions and threads with `Arc<Problem>`.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::derivatives::NlpFunctions;
use crate::error::NlpError;
use crate::expr::Expr;
use crate::permutation::Permutation;

#[derive(Debug, Clone)]
pub struct Problem {
    x: Vec<String>,
    p: Vec<String>,
    f: Expr,
    g: Vec<Expr>,
    fingerprint: u64,
    functions: NlpFunctions,
}

/// Incremental construction of a [`Problem`].
#[derive(Debug, Clone, Default)]
pub struct ProblemBuilder {
    x: Vec<Expr>,
    p: Vec<Expr>,
    f: Option<Expr>,
    g: Vec<Expr>,
}

impl ProblemBuilder {
    pub fn variables(mut self, x: impl IntoIterator<Item = Expr>) -> Self {
        self.x = x.into_iter().collect();
        self
    }

    pub fn parameters(mut self, p: impl IntoIterator<Item = Expr>) -> Self {
        self.p = p.into_iter().collect();
        self
    }

    pub fn objective(mut self, f: Expr) -> Self {
        self.f = Some(f);
        self
    }

    pub fn constraints(mut self, g: impl IntoIterator<Item = Expr>) -> Self {
        self.g = g.into_iter().collect();
        self
    }

    pub fn constraint(mut self, g: Expr) -> Self {
        self.g.push(g);
        self
    }

    /// Validate and build. A missing objective means a feasibility problem
    /// (`f = 0`).
    pub fn build(self) -> Result<Problem, NlpError> {
        Problem::new(self.x, self.p, self.f.unwrap_or_default(), self.g)
    }
}

fn symbol_names(kind: &str, exprs: &[Expr]) -> Result<Vec<String>, NlpError> {
    exprs
        .iter()
        .enumerate()
        .map(|(i, e)| {
            e.as_symbol().map(str::to_string).ok_or_else(|| {
                NlpError::DescriptorInvalid(format!(
                    "{} entry {} must be a plain symbol, got '{}'",
                    kind, i, e
                ))
            })
        })
        .collect()
}

impl Problem {
    pub fn builder() -> ProblemBuilder {
        ProblemBuilder::default()
    }

    /// Build a descriptor from decision symbols `x`, parameter symbols `p`,
    /// objective `f` and constraint expressions `g`.
    pub fn new(x: Vec<Expr>, p: Vec<Expr>, f: Expr, g: Vec<Expr>) -> Result<Self, NlpError> {
        let x = symbol_names("x", &x)?;
        let p = symbol_names("p", &p)?;
        Self::from_names(x, p, f, g)
    }

    /// Same as [`Problem::new`] with symbols given by name.
    pub fn from_names(x: Vec<String>, p: Vec<String>, f: Expr, g: Vec<Expr>) -> Result<Self, NlpError> {
        if x.is_empty() {
            return Err(NlpError::DescriptorInvalid(
                "decision vector x must have at least one symbol".into(),
            ));
        }

        let mut declared = HashSet::new();
        for name in x.iter().chain(p.iter()) {
            if !declared.insert(name.as_str()) {
                return Err(NlpError::DescriptorInvalid(format!(
                    "symbol '{}' is declared more than once",
                    name
                )));
            }
        }

        let check = |what: String, e: &Expr| -> Result<(), NlpError> {
            if let Some(stray) = e
                .free_symbols()
                .into_iter()
                .find(|s| !declared.contains(s.as_str()))
            {
                return Err(NlpError::DescriptorInvalid(format!(
                    "{} references undeclared symbol '{}'",
                    what, stray
                )));
            }
            if !e.has_finite_constants() {
                return Err(NlpError::DescriptorInvalid(format!(
                    "{} contains a non-finite constant",
                    what
                )));
            }
            Ok(())
        };
        check("objective".into(), &f)?;
        for (j, gj) in g.iter().enumerate() {
            check(format!("constraint {}", j), gj)?;
        }

        let functions = NlpFunctions::new(&x, &p, &f, &g)?;
        let fingerprint = fingerprint(&x, &p, &f, &g);
        tracing::debug!(
            n_x = x.len(),
            n_p = p.len(),
            n_g = g.len(),
            nnz_jac = functions.jac_g_sparsity().len(),
            nnz_hess = functions.hess_lag_sparsity().len(),
            "built problem descriptor"
        );

        Ok(Self {
            x,
            p,
            f,
            g,
            fingerprint,
            functions,
        })
    }

    pub fn n_x(&self) -> usize {
        self.x.len()
    }

    pub fn n_p(&self) -> usize {
        self.p.len()
    }

    pub fn n_g(&self) -> usize {
        self.g.len()
    }

    pub fn variables(&self) -> &[String] {
        &self.x
    }

    pub fn parameters(&self) -> &[String] {
        &self.p
    }

    pub fn objective(&self) -> &Expr {
        &self.f
    }

    pub fn constraints(&self) -> &[Expr] {
        &self.g
    }

    /// Gradient, Jacobian and Hessian callbacks.
    pub fn functions(&self) -> &NlpFunctions {
        &self.functions
    }

    /// Structural identity: equal for descriptors with identical symbols and
    /// expressions.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// The same problem with variables and constraints relabeled:
    /// new variable `i` is old variable `var_perm[i]`, new constraint `j`
    /// is old constraint `con_perm[j]`.
    pub fn permuted(&self, var_perm: &Permutation, con_perm: &Permutation) -> Result<Problem, NlpError> {
        if var_perm.len() != self.n_x() || con_perm.len() != self.n_g() {
            return Err(NlpError::DescriptorInvalid(format!(
                "permutation sizes ({}, {}) do not match problem dimensions ({}, {})",
                var_perm.len(),
                con_perm.len(),
                self.n_x(),
                self.n_g()
            )));
        }
        Problem::from_names(
            var_perm.apply(&self.x),
            self.p.clone(),
            self.f.clone(),
            con_perm.apply(&self.g),
        )
    }
}

fn fingerprint(x: &[String], p: &[String], f: &Expr, g: &[Expr]) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.hash(&mut hasher);
    p.hash(&mut hasher);
    f.to_string().hash(&mut hasher);
    for gj in g {
        gj.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "x = [{}]", self.x.join(", "))?;
        if !self.p.is_empty() {
            writeln!(f, "p = [{}]", self.p.join(", "))?;
        }
        writeln!(f, "f = {}", self.f)?;
        for (j, gj) in self.g.iter().enumerate() {
            writeln!(f, "g[{}] = {}", j, gj)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rosenbrock() -> Problem {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        Problem::builder()
            .variables([x.clone(), y.clone()])
            .objective((1.0 - &x).powi(2) + 100.0 * (&y - x.powi(2)).powi(2))
            .constraint(x.powi(2) + y.powi(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_dimensions() {
        let problem = rosenbrock();
        assert_eq!(problem.n_x(), 2);
        assert_eq!(problem.n_p(), 0);
        assert_eq!(problem.n_g(), 1);
        assert_eq!(problem.variables(), &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_rejects_undeclared_symbol() {
        let x = Expr::sym("x");
        let err = Problem::builder()
            .variables([x.clone()])
            .objective(&x * Expr::sym("q"))
            .build()
            .unwrap_err();
        assert!(matches!(err, NlpError::DescriptorInvalid(ref m) if m.contains("'q'")));
    }

    #[test]
    fn test_rejects_empty_and_duplicate_and_non_symbol() {
        assert!(Problem::builder().build().is_err());

        let x = Expr::sym("x");
        let dup = Problem::builder()
            .variables([x.clone()])
            .parameters([x.clone()])
            .build();
        assert!(matches!(dup, Err(NlpError::DescriptorInvalid(_))));

        let not_symbol = Problem::builder().variables([&x * 2.0]).build();
        assert!(matches!(not_symbol, Err(NlpError::DescriptorInvalid(_))));
    }

    #[test]
    fn test_feasibility_problem_has_zero_objective() {
        let x = Expr::sym("x");
        let problem = Problem::builder()
            .variables([x.clone()])
            .constraint(x.clone())
            .build()
            .unwrap();
        assert_eq!(problem.objective(), &Expr::zero());
    }

    #[test]
    fn test_fingerprint_tracks_structure() {
        let a = rosenbrock();
        let b = rosenbrock();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let swapped = a
            .permuted(&Permutation::new(vec![1, 0]).unwrap(), &Permutation::identity(1))
            .unwrap();
        assert_ne!(a.fingerprint(), swapped.fingerprint());
        assert_eq!(swapped.variables(), &["y".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_permuted_rejects_wrong_sizes() {
        let problem = rosenbrock();
        let err = problem.permuted(&Permutation::identity(3), &Permutation::identity(1));
        assert!(err.is_err());
    }
}
