//! Dense linear algebra used by the backends.
//!
//! Matrices are row-major `Vec<Vec<f64>>` and are copied into faer
//! matrices for factorization: partial-pivoting LU for general solves,
//! Cholesky for positive definite ones, and Bunch-Kaufman for the inertia
//! of the interior-point KKT matrix.

use faer::modules::cholesky::bunch_kaufman::compute::{
    self as bunch_kaufman, BunchKaufmanParams, BunchKaufmanRegularization,
};
use faer::modules::core::dyn_stack::{GlobalPodBuffer, PodStack};
use faer::prelude::SpSolver;
use faer::solvers::Cholesky;
use faer::{FaerMat, Mat, Parallelism, Side};
use thiserror::Error;

pub type DenseMatrix = Vec<Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinalgError {
    #[error("matrix is singular or numerically rank deficient")]
    Singular,
    #[error("dimension mismatch: {0}")]
    Dimension(String),
}

pub fn zeros(rows: usize, cols: usize) -> DenseMatrix {
    vec![vec![0.0; cols]; rows]
}

pub fn identity(n: usize) -> DenseMatrix {
    let mut m = zeros(n, n);
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

pub fn norm1(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

pub fn norm2(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// `A x`
pub fn mat_vec(a: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    a.iter().map(|row| dot(row, x)).collect()
}

/// `Aᵀ y`
pub fn mat_t_vec(a: &[Vec<f64>], y: &[f64], cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; cols];
    for (row, yi) in a.iter().zip(y) {
        if *yi == 0.0 {
            continue;
        }
        for (o, aij) in out.iter_mut().zip(row) {
            *o += aij * yi;
        }
    }
    out
}

fn to_mat(a: &[Vec<f64>]) -> Mat<f64> {
    let cols = a.first().map_or(0, Vec::len);
    Mat::from_fn(a.len(), cols, |i, j| a[i][j])
}

/// Solve `A x = b` with LU decomposition and partial pivoting.
pub fn lu_solve(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    let n = b.len();
    if n == 0 {
        return Ok(vec![]);
    }
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(LinalgError::Dimension(format!(
            "expected {}x{} matrix for right-hand side of length {}",
            n, n, n
        )));
    }

    let mat = to_mat(a);
    let rhs = Mat::<f64>::from_fn(n, 1, |i, _| b[i]);

    let lu = mat.partial_piv_lu();
    let solution = lu.solve(&rhs);
    let x: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();

    // NaN/Inf or a large residual indicate a singular matrix
    if x.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::Singular);
    }
    let residual = mat_vec(a, &x)
        .iter()
        .zip(b)
        .fold(0.0f64, |m, (ax, bi)| m.max((ax - bi).abs()));
    let scale = a.iter().map(|row| norm_inf(row)).fold(0.0, f64::max) * norm_inf(&x) + norm_inf(b);
    if residual > 1e-8 * scale.max(1e-300) {
        return Err(LinalgError::Singular);
    }
    Ok(x)
}

/// Eigenvalue sign counts of a symmetric matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inertia {
    pub positive: usize,
    pub negative: usize,
    pub zero: usize,
}

/// Inertia of the symmetric matrix `a` (lower triangle read) from a
/// Bunch-Kaufman factorization `P A Pᵀ = L D Lᵀ`, after the symmetric
/// scaling `S A S` with `s_i = 1/√max_j |a_ij|`. Pivots of `D` at or below
/// `zero_tol` in magnitude count as zero.
pub fn inertia(a: &[Vec<f64>], zero_tol: f64) -> Inertia {
    let n = a.len();
    let mut out = Inertia::default();
    if n == 0 {
        return out;
    }
    if a.iter().any(|row| row.iter().any(|v| !v.is_finite())) {
        out.zero = n;
        return out;
    }
    let scale: Vec<f64> = (0..n)
        .map(|i| {
            let m = (0..n).map(|j| a[i.max(j)][i.min(j)].abs()).fold(0.0, f64::max);
            if m > 0.0 {
                1.0 / m.sqrt()
            } else {
                1.0
            }
        })
        .collect();
    let mut factors = Mat::<f64>::from_fn(n, n, |i, j| if i >= j { scale[i] * a[i][j] * scale[j] } else { 0.0 });
    let mut subdiag = Mat::<f64>::zeros(n, 1);
    let mut perm = vec![0usize; n];
    let mut perm_inv = vec![0usize; n];
    let params = BunchKaufmanParams::default();
    let Ok(req) = bunch_kaufman::cholesky_in_place_req::<usize, f64>(n, Parallelism::None, params) else {
        out.zero = n;
        return out;
    };
    let mut mem = GlobalPodBuffer::new(req);
    bunch_kaufman::cholesky_in_place(
        factors.as_mut(),
        subdiag.as_mut(),
        BunchKaufmanRegularization::default(),
        &mut perm,
        &mut perm_inv,
        Parallelism::None,
        PodStack::new(&mut mem),
        params,
    );

    // the diagonal holds the inverses of the D blocks
    let mut count = |d: f64| {
        if !d.is_finite() || d.abs() <= zero_tol {
            out.zero += 1;
        } else if d > 0.0 {
            out.positive += 1;
        } else {
            out.negative += 1;
        }
    };
    let mut i = 0;
    while i < n {
        let off = subdiag.read(i, 0);
        if off == 0.0 {
            count(1.0 / factors.read(i, i));
            i += 1;
        } else {
            let (p, r) = (factors.read(i, i), factors.read(i + 1, i + 1));
            let mean = 0.5 * (p + r);
            let radius = (0.5 * (p - r)).hypot(off);
            count(1.0 / (mean + radius));
            count(1.0 / (mean - radius));
            i += 2;
        }
    }
    out
}

/// Cholesky factorization `A = L Lᵀ` of a symmetric positive definite
/// matrix.
pub struct SpdFactor {
    factor: Cholesky<f64>,
    n: usize,
}

impl SpdFactor {
    /// `A⁻¹ b`
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let rhs = Mat::<f64>::from_fn(self.n, 1, |i, _| b[i]);
        let x = self.factor.solve(&rhs);
        (0..self.n).map(|i| x.read(i, 0)).collect()
    }
}

/// Factor `a`, or `None` if it is not (numerically) positive definite.
/// Pivots `L_jj²` below `1e-14 · max(|a_jj|, 1)` are rejected.
pub fn cholesky(a: &[Vec<f64>]) -> Option<SpdFactor> {
    let n = a.len();
    if a.iter().any(|row| row.len() != n || row.iter().any(|v| !v.is_finite())) {
        return None;
    }
    let factor = to_mat(a).cholesky(Side::Lower).ok()?;
    let l = factor.compute_l();
    let well_conditioned = (0..n).all(|j| {
        let pivot = l.read(j, j);
        pivot * pivot > 1e-14 * a[j][j].abs().max(1.0)
    });
    well_conditioned.then_some(SpdFactor { factor, n })
}

pub fn is_positive_definite(a: &[Vec<f64>]) -> bool {
    a.is_empty() || cholesky(a).is_some()
}

/// Add the smallest multiple of the identity (from a geometric sequence)
/// that makes `h` positive definite. Returns the shift applied.
pub fn regularize_to_pd(h: &mut [Vec<f64>], initial_shift: f64) -> f64 {
    if is_positive_definite(h) {
        return 0.0;
    }
    let scale = h
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(1.0, f64::max);
    let mut shift = initial_shift * scale;
    let mut applied = 0.0;
    loop {
        for (i, row) in h.iter_mut().enumerate() {
            row[i] += shift - applied;
        }
        applied = shift;
        if is_positive_definite(h) || shift > 1e20 {
            return applied;
        }
        shift *= 4.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lu_solve_matches_known_solution() {
        let a = vec![
            vec![4.0, -2.0, 1.0],
            vec![-2.0, 4.0, -2.0],
            vec![1.0, -2.0, 4.0],
        ];
        let x_true = [1.0, -2.0, 3.0];
        let b = mat_vec(&a, &x_true);
        let x = lu_solve(&a, &b).unwrap();
        for (xi, ti) in x.iter().zip(x_true) {
            assert!((xi - ti).abs() < 1e-12, "{} vs {}", xi, ti);
        }
    }

    #[test]
    fn test_lu_solve_detects_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert_eq!(lu_solve(&a, &[1.0, 1.0]), Err(LinalgError::Singular));
    }

    #[test]
    fn test_inertia_of_kkt_matrix() {
        // [[2, 0, 1], [0, 1, 1], [1, 1, 0]]: two positive, one negative
        let k = vec![
            vec![2.0, 0.0, 1.0],
            vec![0.0, 1.0, 1.0],
            vec![1.0, 1.0, 0.0],
        ];
        assert_eq!(
            inertia(&k, 1e-14),
            Inertia {
                positive: 2,
                negative: 1,
                zero: 0
            }
        );
    }

    #[test]
    fn test_inertia_with_zero_diagonal_block() {
        let swap = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(
            inertia(&swap, 1e-14),
            Inertia {
                positive: 1,
                negative: 1,
                zero: 0
            }
        );

        // dependent constraint rows leave a zero eigenvalue
        let k = vec![
            vec![1.0, 0.0, 1.0, 1.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
        ];
        assert_eq!(
            inertia(&k, 1e-14),
            Inertia {
                positive: 2,
                negative: 1,
                zero: 1
            }
        );
    }

    #[test]
    fn test_inertia_of_badly_scaled_barrier_block() {
        // a slack near its bound next to its constraint row: eigenvalues 1e10 and -1e-10
        let k = vec![vec![1e10, 1.0], vec![1.0, 0.0]];
        assert_eq!(
            inertia(&k, 1e-14),
            Inertia {
                positive: 1,
                negative: 1,
                zero: 0
            }
        );
    }

    #[test]
    fn test_cholesky_solve_and_rejection() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let factor = cholesky(&a).unwrap();
        let x = factor.solve(&[2.0, 1.0]);
        let r = mat_vec(&a, &x);
        assert!((r[0] - 2.0).abs() < 1e-12 && (r[1] - 1.0).abs() < 1e-12);

        assert!(cholesky(&[vec![2.0, 0.0], vec![0.0, 0.0]]).is_none());
        assert!(cholesky(&[vec![1.0, 2.0], vec![2.0, 1.0]]).is_none());
    }

    #[test]
    fn test_regularize_indefinite() {
        let mut h = vec![vec![1.0, -1.0], vec![-1.0, -2.0]];
        let shift = regularize_to_pd(&mut h, 1e-4);
        assert!(shift > 2.3, "shift {}", shift);
        assert!(is_positive_definite(&h));

        let mut pd = identity(2);
        assert_eq!(regularize_to_pd(&mut pd, 1e-4), 0.0);
    }

    #[test]
    fn test_transpose_product() {
        let a = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        assert_eq!(mat_t_vec(&a, &[1.0, 0.0, -1.0], 2), vec![-4.0, -4.0]);
    }
}
