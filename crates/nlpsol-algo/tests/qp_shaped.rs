//! Quadratic programs posed as general NLPs.

mod common;

use common::{assert_all_close, assert_close, nlp_backends, solve, INF};
use nlpsol_core::{Expr, Problem};

/// `½ xᵀHx + cᵀx` subject to rows of `a`, built symbolically.
fn quadratic_problem(h: [[f64; 2]; 2], c: [f64; 2], a: &[[f64; 2]]) -> Problem {
    let x = Expr::symbols(&["x0", "x1"]);
    let mut objective = Expr::zero();
    for i in 0..2 {
        for j in 0..2 {
            objective = objective + 0.5 * h[i][j] * (&x[i] * &x[j]);
        }
        objective = objective + c[i] * &x[i];
    }
    let rows: Vec<Expr> = a.iter().map(|r| r[0] * &x[0] + r[1] * &x[1]).collect();
    Problem::builder()
        .variables(x)
        .objective(objective)
        .constraints(rows)
        .build()
        .unwrap()
}

const ROWS: [[f64; 2]; 3] = [[1.0, 1.0], [-1.0, 2.0], [2.0, 1.0]];

#[test]
fn test_convex_qp_with_fixed_variable() {
    let problem = quadratic_problem([[1.0, -1.0], [-1.0, 2.0]], [-2.0, -6.0], &ROWS);
    for (backend, options) in nlp_backends() {
        // solved twice on fresh sessions: results must agree
        for _ in 0..2 {
            let res = solve(
                &problem,
                backend,
                &options,
                &[
                    ("lbx", &[0.5, 0.0]),
                    ("ubx", &[0.5, INF]),
                    ("lbg", &[-INF, -INF, -INF]),
                    ("ubg", &[2.0, 2.0, 3.0]),
                ],
            )
            .unwrap();
            assert_all_close(&res.x, &[0.5, 1.25], 1e-6, backend);
            assert_all_close(&res.lam_x, &[4.75, 0.0], 1e-5, backend);
            assert_all_close(&res.lam_g, &[0.0, 2.0, 0.0], 1e-5, backend);
            assert_close(res.f, -7.4375, 1e-6, backend);
        }
    }
}

#[test]
fn test_nonconvex_qp_local_solution() {
    let problem = quadratic_problem([[1.0, -1.0], [-1.0, -2.0]], [-2.0, -6.0], &ROWS);
    for (backend, options) in nlp_backends() {
        let res = solve(
            &problem,
            backend,
            &options,
            &[
                ("x0", &[0.5, 1.0]),
                ("lbx", &[0.0, 0.0]),
                ("ubx", &[INF, INF]),
                ("lbg", &[-INF, -INF, -INF]),
                ("ubg", &[2.0, 2.0, 3.0]),
            ],
        )
        .unwrap();
        assert_all_close(&res.x, &[2.0 / 3.0, 4.0 / 3.0], 1e-6, backend);
        assert_all_close(&res.lam_x, &[0.0, 0.0], 1e-6, backend);
        assert_all_close(&res.lam_g, &[4.0 + 8.0 / 9.0, 20.0 / 9.0, 0.0], 1e-5, backend);
        assert_close(res.f, -10.0 - 16.0 / 9.0, 1e-6, backend);
    }
}
