//! Parametric sweeps: solve one problem for many parameter vectors.
//!
//! With the `parallel` feature each rayon worker builds its own session
//! once and re-solves it for every parameter vector it is handed, so the
//! backend's structural setup runs once per worker rather than once per
//! point.

use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use nlpsol_core::{BufferSet, NlpError, Options, Problem, SolveResult};

use crate::session::{SessionConfig, SolveSession};

/// One point of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub p: Vec<f64>,
    pub outcome: Result<SolveResult, NlpError>,
}

/// What every point of a sweep shares.
#[derive(Debug, Clone)]
pub struct SweepSpec {
    pub problem: Arc<Problem>,
    pub backend: String,
    pub options: Options,
    pub config: SessionConfig,
    /// Bounds and initial guess applied before each point's `p`.
    pub base: BufferSet,
}

impl SweepSpec {
    pub fn new(problem: impl Into<Arc<Problem>>, backend: &str) -> Self {
        let problem = problem.into();
        let base = BufferSet::for_problem(&problem);
        Self {
            problem,
            backend: backend.to_string(),
            options: Options::new(),
            config: SessionConfig::default(),
            base,
        }
    }

    fn session(&self) -> Result<SolveSession, NlpError> {
        SolveSession::builder(Arc::clone(&self.problem))
            .backend(&self.backend)
            .options(self.options.clone())
            .config(self.config.clone())
            .build()
    }
}

fn solve_point(session: &mut Result<SolveSession, NlpError>, base: &BufferSet, p: &[f64]) -> SweepPoint {
    let outcome = match session {
        Ok(session) => {
            session.replace_inputs(base.clone());
            session
                .set("p", p)
                .and_then(|_| session.solve().cloned())
        }
        Err(err) => Err(err.clone()),
    };
    SweepPoint {
        p: p.to_vec(),
        outcome,
    }
}

/// Solve `spec.problem` once per entry of `params`, in input order.
pub fn solve_parametric_sweep(spec: &SweepSpec, params: &[Vec<f64>]) -> Vec<SweepPoint> {
    debug!(points = params.len(), backend = %spec.backend, "parametric sweep");

    #[cfg(feature = "parallel")]
    {
        params
            .par_iter()
            .map_init(|| spec.session(), |session, p| solve_point(session, &spec.base, p))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut session = spec.session();
        params
            .iter()
            .map(|p| solve_point(&mut session, &spec.base, p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::Expr;

    /// min (x - a)² s.t. x ≥ 0
    fn shifted_square() -> Problem {
        let x = Expr::sym("x");
        let a = Expr::sym("a");
        Problem::builder()
            .variables([x.clone()])
            .parameters([a.clone()])
            .objective((&x - &a).powi(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_sweep_tracks_parameter() {
        let mut spec = SweepSpec::new(shifted_square(), "ipm");
        spec.base.set("lbx", &[0.0]).unwrap();
        let params: Vec<Vec<f64>> = vec![vec![-1.0], vec![0.5], vec![2.0]];
        let points = solve_parametric_sweep(&spec, &params);

        assert_eq!(points.len(), 3);
        let xs: Vec<f64> = points
            .iter()
            .map(|pt| pt.outcome.as_ref().unwrap().x[0])
            .collect();
        assert!(xs[0].abs() < 1e-6);
        assert!((xs[1] - 0.5).abs() < 1e-6);
        assert!((xs[2] - 2.0).abs() < 1e-6);
        assert_eq!(points[2].p, vec![2.0]);
    }

    #[test]
    fn test_sweep_reports_build_errors_per_point() {
        let spec = SweepSpec::new(shifted_square(), "missing");
        let points = solve_parametric_sweep(&spec, &[vec![1.0], vec![2.0]]);
        for pt in points {
            assert_eq!(pt.outcome, Err(NlpError::UnknownBackend("missing".into())));
        }
    }

    #[test]
    fn test_sweep_rejects_wrong_parameter_length() {
        let spec = SweepSpec::new(shifted_square(), "auglag");
        let points = solve_parametric_sweep(&spec, &[vec![1.0, 2.0]]);
        assert!(matches!(points[0].outcome, Err(NlpError::BufferSize { .. })));
    }
}
