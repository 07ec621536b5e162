//! Bound consistency checks run before any backend is invoked.

use crate::buffers::BufferSet;
use crate::error::{BoundKind, NlpError};
use crate::problem::Problem;

/// Check a single `[lower, upper]` pair.
///
/// A pair is consistent when `lower <= upper`, neither is NaN, and at least
/// one finite value satisfies it (`lower = +inf` or `upper = -inf` does not).
pub fn check_pair(kind: BoundKind, index: usize, lower: f64, upper: f64) -> Result<(), NlpError> {
    let consistent =
        lower <= upper && lower != f64::INFINITY && upper != f64::NEG_INFINITY;
    if consistent {
        Ok(())
    } else {
        Err(NlpError::BoundsInconsistent {
            kind,
            index,
            lower,
            upper,
        })
    }
}

/// Validate all variable bounds, then all constraint bounds. The first
/// offending slot is reported.
pub fn validate_bounds(lbx: &[f64], ubx: &[f64], lbg: &[f64], ubg: &[f64]) -> Result<(), NlpError> {
    for (i, (lo, hi)) in lbx.iter().zip(ubx).enumerate() {
        check_pair(BoundKind::Variable, i, *lo, *hi)?;
    }
    for (j, (lo, hi)) in lbg.iter().zip(ubg).enumerate() {
        check_pair(BoundKind::Constraint, j, *lo, *hi)?;
    }
    Ok(())
}

/// Validate the bounds held by a buffer set.
pub fn validate(buffers: &BufferSet) -> Result<(), NlpError> {
    let result = validate_bounds(buffers.lbx(), buffers.ubx(), buffers.lbg(), buffers.ubg());
    if let Err(err) = &result {
        tracing::warn!(%err, "rejecting inconsistent bounds");
    }
    result
}

/// Check that `buffers` was sized for `problem`, then validate its bounds.
pub fn validate_buffers(problem: &Problem, buffers: &BufferSet) -> Result<(), NlpError> {
    let dims = [
        ("x", problem.n_x(), buffers.n_x()),
        ("g", problem.n_g(), buffers.n_g()),
        ("p", problem.n_p(), buffers.n_p()),
    ];
    for (key, expected, actual) in dims {
        if expected != actual {
            return Err(NlpError::BufferSize {
                key: key.to_string(),
                expected,
                actual,
            });
        }
    }
    validate(buffers)
}

/// `lower == upper` with a finite value.
pub fn is_fixed(lower: f64, upper: f64) -> bool {
    lower == upper && lower.is_finite()
}

/// Both sides unbounded.
pub fn is_free(lower: f64, upper: f64) -> bool {
    lower == f64::NEG_INFINITY && upper == f64::INFINITY
}

/// True if any variable or constraint bound is infinite.
pub fn has_infinite_bounds(buffers: &BufferSet) -> bool {
    buffers
        .lbx()
        .iter()
        .chain(buffers.ubx())
        .chain(buffers.lbg())
        .chain(buffers.ubg())
        .any(|b| b.is_infinite())
}

/// Euclidean distance of `value` from the interval `[lower, upper]`.
pub fn violation(value: f64, lower: f64, upper: f64) -> f64 {
    if value < lower {
        lower - value
    } else if value > upper {
        value - upper
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f64 = f64::INFINITY;

    #[test]
    fn test_accepts_equal_and_infinite_bounds() {
        assert!(validate_bounds(&[1.0, -INF], &[1.0, INF], &[-INF], &[0.0]).is_ok());
    }

    #[test]
    fn test_reports_first_variable_violation() {
        let err = validate_bounds(&[-10.0, 0.0], &[-20.0, -1.0], &[], &[]).unwrap_err();
        assert_eq!(
            err,
            NlpError::BoundsInconsistent {
                kind: BoundKind::Variable,
                index: 0,
                lower: -10.0,
                upper: -20.0
            }
        );
    }

    #[test]
    fn test_reports_constraint_violation() {
        let err = validate_bounds(&[0.0], &[1.0], &[0.0, 2.0], &[1.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            NlpError::BoundsInconsistent {
                kind: BoundKind::Constraint,
                index: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_infinite_contradictions_and_nan() {
        assert!(check_pair(BoundKind::Variable, 0, INF, INF).is_err());
        assert!(check_pair(BoundKind::Variable, 0, -INF, -INF).is_err());
        assert!(check_pair(BoundKind::Variable, 0, f64::NAN, 1.0).is_err());
        assert!(check_pair(BoundKind::Variable, 0, -INF, INF).is_ok());
    }

    #[test]
    fn test_buffers_sized_for_other_problem() {
        use crate::expr::Expr;
        let x = Expr::sym("x");
        let problem = Problem::builder()
            .variables([x.clone()])
            .objective(x.powi(2))
            .build()
            .unwrap();
        assert!(validate_buffers(&problem, &BufferSet::new(1, 0, 0)).is_ok());
        assert!(matches!(
            validate_buffers(&problem, &BufferSet::new(2, 0, 0)),
            Err(NlpError::BufferSize { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_violation() {
        assert_eq!(violation(0.5, 0.0, 1.0), 0.0);
        assert_eq!(violation(-0.5, 0.0, 1.0), 0.5);
        assert_eq!(violation(3.0, -INF, 1.0), 2.0);
        assert!(is_fixed(2.0, 2.0));
        assert!(!is_fixed(INF, INF));
        assert!(is_free(-INF, INF));
    }
}
