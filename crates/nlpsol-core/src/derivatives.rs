//! Compiled derivative callbacks for a problem descriptor.
//!
//! All sparsity patterns are structural: an entry is present when the
//! corresponding symbolic derivative is not identically zero. They do not
//! depend on parameter values, so a parameter change never invalidates them.

use std::collections::{BTreeSet, HashMap};

use crate::error::NlpError;
use crate::expr::{Expr, Tape};

type Entry = (usize, Tape);
type MatrixEntry = (usize, usize, Tape);

/// Objective, constraints and their first and second derivatives, compiled
/// to evaluation tapes over the flat input `[x, p]`.
#[derive(Debug, Clone)]
pub struct NlpFunctions {
    n_x: usize,
    n_p: usize,
    n_g: usize,
    f: Tape,
    grad_f: Vec<Entry>,
    g: Vec<Tape>,
    jac_g: Vec<MatrixEntry>,
    hess_f: Vec<MatrixEntry>,
    hess_g: Vec<Vec<MatrixEntry>>,
    grad_p_f: Vec<Entry>,
    jac_p_g: Vec<MatrixEntry>,
}

/// Lower-triangular second derivatives of `expr` given its gradient.
fn lower_hessian(
    gradient: &[(usize, Expr)],
    x: &[String],
    slots: &HashMap<String, usize>,
) -> Result<Vec<MatrixEntry>, NlpError> {
    let mut out = Vec::new();
    for (i, di) in gradient {
        for (j, name) in x.iter().enumerate().take(i + 1) {
            let dij = di.diff(name);
            if dij != Expr::zero() {
                out.push((*i, j, Tape::compile(&dij, slots)?));
            }
        }
    }
    Ok(out)
}

fn sparse_gradient(expr: &Expr, names: &[String]) -> Vec<(usize, Expr)> {
    names
        .iter()
        .enumerate()
        .filter(|(_, name)| expr.depends_on(name))
        .map(|(i, name)| (i, expr.diff(name)))
        .filter(|(_, d)| *d != Expr::zero())
        .collect()
}

impl NlpFunctions {
    pub fn new(x: &[String], p: &[String], f: &Expr, g: &[Expr]) -> Result<Self, NlpError> {
        let slots: HashMap<String, usize> = x
            .iter()
            .chain(p.iter())
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let compile_entries = |entries: Vec<(usize, Expr)>| -> Result<Vec<Entry>, NlpError> {
            entries
                .into_iter()
                .map(|(i, e)| Ok((i, Tape::compile(&e, &slots)?)))
                .collect()
        };

        let df = sparse_gradient(f, x);
        let hess_f = lower_hessian(&df, x, &slots)?;
        let grad_p_f = compile_entries(sparse_gradient(f, p))?;
        let grad_f = compile_entries(df)?;

        let mut g_tapes = Vec::with_capacity(g.len());
        let mut jac_g = Vec::new();
        let mut hess_g = Vec::with_capacity(g.len());
        let mut jac_p_g = Vec::new();
        for (row, gj) in g.iter().enumerate() {
            g_tapes.push(Tape::compile(gj, &slots)?);
            let dg = sparse_gradient(gj, x);
            hess_g.push(lower_hessian(&dg, x, &slots)?);
            for (col, d) in dg {
                jac_g.push((row, col, Tape::compile(&d, &slots)?));
            }
            for (col, d) in sparse_gradient(gj, p) {
                jac_p_g.push((row, col, Tape::compile(&d, &slots)?));
            }
        }

        Ok(Self {
            n_x: x.len(),
            n_p: p.len(),
            n_g: g.len(),
            f: Tape::compile(f, &slots)?,
            grad_f,
            g: g_tapes,
            jac_g,
            hess_f,
            hess_g,
            grad_p_f,
            jac_p_g,
        })
    }

    pub fn n_x(&self) -> usize {
        self.n_x
    }

    pub fn n_p(&self) -> usize {
        self.n_p
    }

    pub fn n_g(&self) -> usize {
        self.n_g
    }

    fn input(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.n_x);
        debug_assert_eq!(p.len(), self.n_p);
        let mut v = Vec::with_capacity(self.n_x + self.n_p);
        v.extend_from_slice(x);
        v.extend_from_slice(p);
        v
    }

    pub fn eval_f(&self, x: &[f64], p: &[f64]) -> f64 {
        self.f.eval(&self.input(x, p))
    }

    pub fn eval_grad_f(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let v = self.input(x, p);
        let mut out = vec![0.0; self.n_x];
        for (i, tape) in &self.grad_f {
            out[*i] = tape.eval(&v);
        }
        out
    }

    pub fn eval_g(&self, x: &[f64], p: &[f64]) -> Vec<f64> {
        let v = self.input(x, p);
        self.g.iter().map(|t| t.eval(&v)).collect()
    }

    /// Dense `n_g × n_x` constraint Jacobian.
    pub fn eval_jac_g(&self, x: &[f64], p: &[f64]) -> Vec<Vec<f64>> {
        let v = self.input(x, p);
        let mut out = vec![vec![0.0; self.n_x]; self.n_g];
        for (row, col, tape) in &self.jac_g {
            out[*row][*col] = tape.eval(&v);
        }
        out
    }

    /// Dense symmetric Hessian of `sigma * f + lam_gᵀ g` with respect to `x`.
    pub fn eval_hess_lag(&self, x: &[f64], p: &[f64], sigma: f64, lam_g: &[f64]) -> Vec<Vec<f64>> {
        let v = self.input(x, p);
        let mut out = vec![vec![0.0; self.n_x]; self.n_x];
        let mut accumulate = |entries: &[MatrixEntry], weight: f64| {
            if weight == 0.0 {
                return;
            }
            for (i, j, tape) in entries {
                let val = weight * tape.eval(&v);
                out[*i][*j] += val;
                if i != j {
                    out[*j][*i] += val;
                }
            }
        };
        accumulate(&self.hess_f, sigma);
        for (entries, lam) in self.hess_g.iter().zip(lam_g) {
            accumulate(entries, *lam);
        }
        out
    }

    /// Gradient of the Lagrangian with respect to the parameters:
    /// `∂f/∂p + (∂g/∂p)ᵀ lam_g`.
    pub fn eval_grad_p_lag(&self, x: &[f64], p: &[f64], lam_g: &[f64]) -> Vec<f64> {
        let v = self.input(x, p);
        let mut out = vec![0.0; self.n_p];
        for (i, tape) in &self.grad_p_f {
            out[*i] += tape.eval(&v);
        }
        for (row, col, tape) in &self.jac_p_g {
            out[*col] += lam_g[*row] * tape.eval(&v);
        }
        out
    }

    /// Structural nonzeros of the constraint Jacobian as `(row, col)`.
    pub fn jac_g_sparsity(&self) -> Vec<(usize, usize)> {
        self.jac_g.iter().map(|(r, c, _)| (*r, *c)).collect()
    }

    /// Structural nonzeros of the lower triangle of the Lagrangian Hessian.
    pub fn hess_lag_sparsity(&self) -> BTreeSet<(usize, usize)> {
        self.hess_f
            .iter()
            .chain(self.hess_g.iter().flatten())
            .map(|(i, j, _)| (*i, *j))
            .collect()
    }

    /// True when every constraint is affine in `x`.
    pub fn constraints_are_linear(&self) -> bool {
        self.hess_g.iter().all(|h| h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gradient_jacobian_hessian() {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let a = Expr::sym("a");
        let f = x.powi(2) * &y + &a * &y;
        let g = vec![&x + &y, x.powi(2) + y.powi(2) - &a];
        let fun = NlpFunctions::new(&names(&["x", "y"]), &names(&["a"]), &f, &g).unwrap();

        let (xv, pv) = ([2.0, 3.0], [0.5]);
        assert_eq!(fun.eval_f(&xv, &pv), 12.0 + 1.5);
        assert_eq!(fun.eval_grad_f(&xv, &pv), vec![12.0, 4.5]);
        assert_eq!(fun.eval_g(&xv, &pv), vec![5.0, 12.5]);
        assert_eq!(fun.eval_jac_g(&xv, &pv), vec![vec![1.0, 1.0], vec![4.0, 6.0]]);

        // sigma*[[2y, 2x], [2x, 0]] + lam1*[[2, 0], [0, 2]]
        let h = fun.eval_hess_lag(&xv, &pv, 1.0, &[7.0, 0.5]);
        assert_eq!(h, vec![vec![7.0, 4.0], vec![4.0, 1.0]]);

        // df/da = y, dg2/da = -1
        assert_eq!(fun.eval_grad_p_lag(&xv, &pv, &[7.0, 0.5]), vec![2.5]);
    }

    #[test]
    fn test_sparsity_is_structural() {
        let x = Expr::sym("x");
        let y = Expr::sym("y");
        let z = Expr::sym("z");
        let f = x.powi(2) + &z;
        let g = vec![&y * 2.0, &x * &z];
        let fun = NlpFunctions::new(&names(&["x", "y", "z"]), &[], &f, &g).unwrap();

        assert_eq!(fun.jac_g_sparsity(), vec![(0, 1), (1, 0), (1, 2)]);
        let hess: Vec<_> = fun.hess_lag_sparsity().into_iter().collect();
        assert_eq!(hess, vec![(0, 0), (2, 0)]);
        assert!(!fun.constraints_are_linear());
    }

    #[test]
    fn test_empty_constraint_block() {
        let x = Expr::sym("x");
        let fun = NlpFunctions::new(&names(&["x"]), &[], &(x.clone() - 1.0).powi(2), &[]).unwrap();
        assert_eq!(fun.n_g(), 0);
        assert!(fun.eval_g(&[0.0], &[]).is_empty());
        assert!(fun.eval_jac_g(&[0.0], &[]).is_empty());
        assert!(fun.constraints_are_linear());
    }
}
