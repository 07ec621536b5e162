//! Multiplier post-processing shared by all backends.
//!
//! Sign law: `∇f + (∂g/∂x)ᵀ lam_g + lam_x = 0`, so a multiplier is
//! negative at a binding lower bound, positive at a binding upper bound and
//! zero when neither bound is active.

use nlpsol_core::bounds::is_fixed;

use crate::linalg::mat_t_vec;

/// Multipliers of fixed variables from the reduced gradient,
/// `lam_x[i] = -(∇f + Jᵀ lam_g)[i]`. Other entries are left untouched.
pub fn fill_fixed_variable_multipliers(
    lam_x: &mut [f64],
    grad_f: &[f64],
    jac_g: &[Vec<f64>],
    lam_g: &[f64],
    lbx: &[f64],
    ubx: &[f64],
) {
    let jt_lam = mat_t_vec(jac_g, lam_g, grad_f.len());
    for (i, lam) in lam_x.iter_mut().enumerate() {
        if is_fixed(lbx[i], ubx[i]) {
            *lam = -(grad_f[i] + jt_lam[i]);
        }
    }
}

/// Zero multipliers of inactive bounds and multipliers with the wrong sign
/// for the single active side. `values` are the primal quantities the
/// bounds apply to (`x` for `lam_x`, `g` for `lam_g`).
pub fn normalize(lam: &mut [f64], values: &[f64], lower: &[f64], upper: &[f64], tol: f64) {
    for (i, l) in lam.iter_mut().enumerate() {
        let (v, lo, hi) = (values[i], lower[i], upper[i]);
        let at_lower = lo.is_finite() && v - lo <= tol * lo.abs().max(1.0);
        let at_upper = hi.is_finite() && hi - v <= tol * hi.abs().max(1.0);
        *l = match (at_lower, at_upper) {
            (false, false) => 0.0,
            (true, false) if *l > 0.0 => 0.0,
            (false, true) if *l < 0.0 => 0.0,
            _ => *l,
        };
        if *l == 0.0 {
            // drop the sign of -0.0
            *l = 0.0;
        }
    }
}
