#![allow(dead_code)]

use nlpsol_algo::SolveSession;
use nlpsol_core::{Expr, NlpError, Options, Problem, SolveResult};

pub const INF: f64 = f64::INFINITY;

/// Backend configurations every reference problem is run against.
pub fn nlp_backends() -> Vec<(&'static str, Options)> {
    vec![
        ("ipm", Options::new()),
        ("ipm", Options::new().with("hessian_approximation", "limited-memory")),
        ("sqp", Options::new()),
        ("sqp", Options::new().with("qpsol", "clarabel")),
    ]
}

/// `(1 - x)² + 100 (y - x²)²`
pub fn rosenbrock(x: &Expr, y: &Expr) -> Expr {
    (1.0 - x).powi(2) + 100.0 * (y - x.powi(2)).powi(2)
}

pub fn xy() -> (Expr, Expr) {
    (Expr::sym("x"), Expr::sym("y"))
}

/// Build a session, apply `inputs` and solve.
pub fn solve(
    problem: &Problem,
    backend: &str,
    options: &Options,
    inputs: &[(&str, &[f64])],
) -> Result<SolveResult, NlpError> {
    let mut session = SolveSession::builder(problem.clone())
        .backend(backend)
        .options(options.clone())
        .build()?;
    for (key, values) in inputs {
        session.set(key, values)?;
    }
    session.solve().cloned()
}

#[track_caller]
pub fn assert_close(actual: f64, expected: f64, tol: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tol,
        "{}: expected {}, got {} (tol {})",
        what,
        expected,
        actual,
        tol
    );
}

#[track_caller]
pub fn assert_all_close(actual: &[f64], expected: &[f64], tol: f64, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{}: length", what);
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_close(*a, *e, tol, &format!("{}[{}]", what, i));
    }
}
