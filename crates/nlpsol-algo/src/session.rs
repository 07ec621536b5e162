//! Solve sessions: one problem, one prepared backend handle, one buffer set.
//!
//! ```text
//! Built ──validate──▶ Validated ──dispatch──▶ Solved
//!   │                     │
//!   └──────────────▶ Failed ◀───────┘
//! ```
//!
//! Every [`SolveSession::solve`] re-validates the buffers before the backend
//! is invoked, so inconsistent bounds never reach a backend. The last
//! successful result stays readable after a later failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nlpsol_core::bounds;
use nlpsol_core::{
    BufferSet, Capability, FailureReason, NlpError, Options, Problem, SolveResult, SolveStats,
    SolveStatus,
};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::multipliers;
use crate::registry::BackendRegistry;
use crate::traits::{BackendHandle, Capabilities, NlpBackend, RawResult, RawStatus, SolveControl};

/// Backend used when the builder is not told otherwise.
pub const DEFAULT_BACKEND: &str = "ipm";

/// Facade-level settings, independent of any backend's options.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Wall-clock limit per solve (default: none). Requires a backend with
    /// timeout support.
    pub timeout: Option<Duration>,
    /// Relative distance to a bound under which the bound counts as active
    /// when multipliers are normalized (default: 1e-6).
    pub activity_tolerance: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            activity_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Constructed or inputs changed since the last validation.
    Built,
    Validated,
    Solved,
    /// The last attempt failed, either in validation or in the backend.
    Failed(NlpError),
}

impl SessionState {
    pub fn error(&self) -> Option<&NlpError> {
        match self {
            SessionState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Built => write!(f, "built"),
            SessionState::Validated => write!(f, "validated"),
            SessionState::Solved => write!(f, "solved"),
            SessionState::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Create a session on the built-in registry.
///
/// ```
/// use nlpsol_algo::nlpsol;
/// use nlpsol_core::{Expr, Options, Problem};
///
/// let x = Expr::sym("x");
/// let problem = Problem::builder()
///     .variables([x.clone()])
///     .objective((&x - 3.0).powi(2))
///     .build()
///     .unwrap();
/// let mut session = nlpsol(problem, "ipm", Options::new()).unwrap();
/// let result = session.solve().unwrap();
/// assert!((result.x[0] - 3.0).abs() < 1e-6);
/// ```
pub fn nlpsol(problem: impl Into<Arc<Problem>>, backend: &str, options: Options) -> Result<SolveSession, NlpError> {
    SolveSession::builder(problem)
        .backend(backend)
        .options(options)
        .build()
}

pub struct SolveSessionBuilder {
    problem: Arc<Problem>,
    registry: Option<BackendRegistry>,
    backend: String,
    options: Options,
    config: SessionConfig,
}

impl SolveSessionBuilder {
    pub fn backend(mut self, id: &str) -> Self {
        self.backend = id.to_string();
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the backend id in `registry` instead of the built-in one.
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolve the backend, check the structural capabilities and prepare
    /// the handle.
    pub fn build(self) -> Result<SolveSession, NlpError> {
        let registry = self.registry.unwrap_or_else(BackendRegistry::with_defaults);
        let backend = registry.resolve(&self.backend)?;
        check_structure(backend.as_ref(), &self.problem, &self.config)?;
        let handle = backend.prepare(&self.problem, &self.options)?;
        debug!(backend = backend.id(), fingerprint = self.problem.fingerprint(), "session built");
        let buffers = fresh_buffers(backend.as_ref(), &self.problem);
        Ok(SolveSession {
            problem: self.problem,
            backend,
            options: self.options,
            config: self.config,
            handle,
            buffers,
            state: SessionState::Built,
            status: SolveStatus::Unsolved,
            result: None,
            structure_builds: 1,
        })
    }
}

/// Capability checks that depend only on the problem and the session
/// config, not on buffer contents.
fn check_structure(backend: &dyn NlpBackend, problem: &Problem, config: &SessionConfig) -> Result<(), NlpError> {
    let caps = backend.capabilities();
    if problem.n_g() == 0 && !caps.supports_empty_constraints {
        return Err(unsupported(backend, Capability::EmptyConstraints));
    }
    if config.timeout.is_some() && !caps.supports_timeout {
        return Err(unsupported(backend, Capability::Timeout));
    }
    Ok(())
}

fn unsupported(backend: &dyn NlpBackend, capability: Capability) -> NlpError {
    NlpError::CapabilityUnsupported {
        backend: backend.id().to_string(),
        capability,
    }
}

fn fresh_buffers(backend: &dyn NlpBackend, problem: &Problem) -> BufferSet {
    let mut buffers = BufferSet::for_problem(problem);
    for key in backend.extension_inputs() {
        buffers.allow_extension(key);
    }
    buffers
}

pub struct SolveSession {
    problem: Arc<Problem>,
    backend: Arc<dyn NlpBackend>,
    options: Options,
    config: SessionConfig,
    handle: Box<dyn BackendHandle>,
    buffers: BufferSet,
    state: SessionState,
    status: SolveStatus,
    result: Option<SolveResult>,
    structure_builds: usize,
}

impl fmt::Debug for SolveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolveSession")
            .field("backend", &self.backend.id())
            .field("n_x", &self.problem.n_x())
            .field("n_g", &self.problem.n_g())
            .field("state", &self.state)
            .field("structure_builds", &self.structure_builds)
            .finish()
    }
}

impl SolveSession {
    pub fn builder(problem: impl Into<Arc<Problem>>) -> SolveSessionBuilder {
        SolveSessionBuilder {
            problem: problem.into(),
            registry: None,
            backend: DEFAULT_BACKEND.to_string(),
            options: Options::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn problem(&self) -> &Arc<Problem> {
        &self.problem
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    /// Number of times the backend's structural setup has run.
    pub fn structure_builds(&self) -> usize {
        self.structure_builds
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    /// Set an input buffer. Any input change returns the session to `Built`.
    pub fn set(&mut self, key: &str, values: &[f64]) -> Result<(), NlpError> {
        self.buffers.set(key, values)?;
        self.touch();
        Ok(())
    }

    /// Broadcast `value` to every slot of an input buffer.
    pub fn fill(&mut self, key: &str, value: f64) -> Result<(), NlpError> {
        self.buffers.fill(key, value)?;
        self.touch();
        Ok(())
    }

    /// Unset an optional input or reset a bound buffer to its default.
    pub fn clear(&mut self, key: &str) -> Result<(), NlpError> {
        self.buffers.clear(key)?;
        self.touch();
        Ok(())
    }

    pub fn input(&self, key: &str) -> Result<Vec<f64>, NlpError> {
        self.buffers.get(key)
    }

    /// Replace all inputs at once. Dimensions are checked on the next
    /// validation.
    pub fn replace_inputs(&mut self, mut buffers: BufferSet) {
        for key in self.backend.extension_inputs() {
            buffers.allow_extension(key);
        }
        self.buffers = buffers;
        self.touch();
    }

    /// Apply several buffer updates, then validate. Nothing is written
    /// unless every update is accepted. The previous result
    /// stays readable until the next successful solve replaces it.
    pub fn reconfigure<I, K, V>(&mut self, updates: I) -> Result<(), NlpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[f64]>,
    {
        let mut staged = self.buffers.clone();
        for (key, values) in updates {
            staged.set(key.as_ref(), values.as_ref())?;
        }
        self.buffers = staged;
        self.touch();
        self.validate()
    }

    /// Seed `x0` from the last result and, when the backend uses them, the
    /// multiplier guesses `lam_x0` / `lam_g0`.
    pub fn warm_start_from_result(&mut self) -> Result<(), NlpError> {
        let result = self.result.as_ref().ok_or(NlpError::NoResultYet)?;
        let (x, lam_x, lam_g) = (result.x.clone(), result.lam_x.clone(), result.lam_g.clone());
        self.buffers.set("x0", &x)?;
        if self.backend.capabilities().supports_warm_start {
            self.buffers.set("lam_x0", &lam_x)?;
            self.buffers.set("lam_g0", &lam_g)?;
        }
        self.touch();
        Ok(())
    }

    /// Switch to another problem descriptor. The backend's structural setup
    /// runs again and all buffers return to their defaults.
    pub fn rebind(&mut self, problem: impl Into<Arc<Problem>>) -> Result<(), NlpError> {
        let problem = problem.into();
        check_structure(self.backend.as_ref(), &problem, &self.config)?;
        self.handle = self.backend.prepare(&problem, &self.options)?;
        self.structure_builds += 1;
        self.buffers = fresh_buffers(self.backend.as_ref(), &problem);
        debug!(
            backend = self.backend.id(),
            fingerprint = problem.fingerprint(),
            builds = self.structure_builds,
            "session rebound"
        );
        self.problem = problem;
        self.result = None;
        self.status = SolveStatus::Unsolved;
        self.state = SessionState::Built;
        Ok(())
    }

    fn touch(&mut self) {
        if !matches!(self.state, SessionState::Built) {
            self.state = SessionState::Built;
        }
    }

    // ========================================================================
    // VALIDATION AND DISPATCH
    // ========================================================================

    /// Check bounds and buffer-dependent capabilities.
    pub fn validate(&mut self) -> Result<(), NlpError> {
        let checked = bounds::validate_buffers(&self.problem, &self.buffers).and_then(|_| self.check_inputs());
        match checked {
            Ok(()) => {
                self.state = SessionState::Validated;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn check_inputs(&self) -> Result<(), NlpError> {
        let caps = self.backend.capabilities();
        if !caps.supports_infinite_bounds && bounds::has_infinite_bounds(&self.buffers) {
            return Err(unsupported(self.backend.as_ref(), Capability::InfiniteBounds));
        }
        if !caps.supports_warm_start && self.buffers.has_multiplier_guess() {
            return Err(unsupported(self.backend.as_ref(), Capability::WarmStart));
        }
        Ok(())
    }

    /// Validate, dispatch to the backend and store the normalized result.
    pub fn solve(&mut self) -> Result<&SolveResult, NlpError> {
        self.validate()?;

        let control = SolveControl::with_timeout(self.config.timeout);
        let start = Instant::now();
        info!(
            backend = self.backend.id(),
            n_x = self.problem.n_x(),
            n_g = self.problem.n_g(),
            "solving"
        );
        let raw = match self.handle.solve(&self.buffers, &control) {
            Ok(raw) => raw,
            Err(err) => return Err(self.fail(err)),
        };
        let elapsed = start.elapsed();

        if let Err(err) = self.check_lengths(&raw) {
            return Err(self.fail(err));
        }
        if !raw.status.is_converged() {
            let reason = failure_reason(&raw, elapsed);
            let err = NlpError::BackendFailure {
                backend: self.backend.id().to_string(),
                reason,
            };
            return Err(self.fail(err));
        }

        let result = self.assemble(raw, elapsed);
        info!(
            backend = self.backend.id(),
            f = result.f,
            iterations = result.stats.iterations,
            solve_time_ms = result.stats.solve_time_ms,
            "solved"
        );
        self.state = SessionState::Solved;
        self.status = SolveStatus::Solved;
        Ok(&*self.result.insert(result))
    }

    /// Alias of [`SolveSession::solve`].
    pub fn evaluate(&mut self) -> Result<&SolveResult, NlpError> {
        self.solve()
    }

    fn check_lengths(&self, raw: &RawResult) -> Result<(), NlpError> {
        let (n, k) = (self.problem.n_x(), self.problem.n_g());
        let ok = raw.x.len() == n && raw.lam_x.len() == n && raw.g.len() == k && raw.lam_g.len() == k;
        if ok {
            Ok(())
        } else {
            Err(NlpError::BackendFailure {
                backend: self.backend.id().to_string(),
                reason: FailureReason::Internal(format!(
                    "result lengths x={} lam_x={} g={} lam_g={} for n_x={} n_g={}",
                    raw.x.len(),
                    raw.lam_x.len(),
                    raw.g.len(),
                    raw.lam_g.len(),
                    n,
                    k
                )),
            })
        }
    }

    fn assemble(&self, mut raw: RawResult, elapsed: Duration) -> SolveResult {
        let tol = self.config.activity_tolerance;
        multipliers::normalize(&mut raw.lam_x, &raw.x, self.buffers.lbx(), self.buffers.ubx(), tol);
        multipliers::normalize(&mut raw.lam_g, &raw.g, self.buffers.lbg(), self.buffers.ubg(), tol);
        let lam_p = self
            .problem
            .functions()
            .eval_grad_p_lag(&raw.x, self.buffers.p(), &raw.lam_g);
        SolveResult {
            x: raw.x,
            f: raw.f,
            g: raw.g,
            lam_x: raw.lam_x,
            lam_g: raw.lam_g,
            lam_p,
            stats: SolveStats {
                backend: self.backend.id().to_string(),
                iterations: raw.iterations,
                return_status: raw.status.to_string(),
                solve_time_ms: elapsed.as_secs_f64() * 1000.0,
            },
            extras: raw.extras,
        }
    }

    fn fail(&mut self, err: NlpError) -> NlpError {
        warn!(backend = self.backend.id(), %err, "solve attempt failed");
        match &err {
            NlpError::BoundsInconsistent { .. } => self.status = SolveStatus::InfeasibleBounds,
            NlpError::BackendFailure { .. } | NlpError::CapabilityUnsupported { .. } => {
                self.status = SolveStatus::BackendFailure
            }
            // usage errors never reached a backend
            _ => {}
        }
        self.state = SessionState::Failed(err.clone());
        err
    }

    // ========================================================================
    // OUTPUTS
    // ========================================================================

    /// The last successful result.
    pub fn result(&self) -> Result<&SolveResult, NlpError> {
        self.result.as_ref().ok_or(NlpError::NoResultYet)
    }

    pub fn output(&self, key: &str) -> Result<Vec<f64>, NlpError> {
        self.result()?.output(key)
    }
}

fn failure_reason(raw: &RawResult, elapsed: Duration) -> FailureReason {
    match raw.status {
        RawStatus::MaxIterations => FailureReason::NonConvergence {
            iterations: raw.iterations,
        },
        RawStatus::Infeasible => FailureReason::Infeasible(raw.message.clone()),
        RawStatus::Timeout => FailureReason::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        },
        RawStatus::NumericalError => FailureReason::Numerical(raw.message.clone()),
        RawStatus::Solved | RawStatus::SolvedToAcceptableLevel => {
            FailureReason::Internal("converged status reported as failure".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::{BoundKind, Expr, OptionSpec};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock backend that returns the clamped initial guess. A negative
    /// parameter makes it report non-convergence.
    struct MockBackend {
        caps: Capabilities,
        prepares: Arc<AtomicUsize>,
        solves: Arc<AtomicUsize>,
        lam_x: f64,
    }

    impl MockBackend {
        fn new(caps: Capabilities) -> Self {
            Self {
                caps,
                prepares: Arc::new(AtomicUsize::new(0)),
                solves: Arc::new(AtomicUsize::new(0)),
                lam_x: 0.0,
            }
        }
    }

    struct MockHandle {
        problem: Arc<Problem>,
        solves: Arc<AtomicUsize>,
        lam_x: f64,
    }

    impl NlpBackend for MockBackend {
        fn id(&self) -> &str {
            "mock"
        }
        fn description(&self) -> &str {
            "mock backend"
        }
        fn capabilities(&self) -> Capabilities {
            self.caps
        }
        fn option_specs(&self) -> &[OptionSpec] {
            &[]
        }
        fn extension_inputs(&self) -> &[&'static str] {
            &["scale"]
        }
        fn prepare(&self, problem: &Arc<Problem>, _options: &Options) -> Result<Box<dyn BackendHandle>, NlpError> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockHandle {
                problem: Arc::clone(problem),
                solves: Arc::clone(&self.solves),
                lam_x: self.lam_x,
            }))
        }
    }

    impl BackendHandle for MockHandle {
        fn solve(&mut self, buffers: &BufferSet, _control: &SolveControl) -> Result<RawResult, NlpError> {
            self.solves.fetch_add(1, Ordering::SeqCst);
            let fun = self.problem.functions();
            let mut x = buffers.initial_guess();
            crate::backends::project(&mut x, buffers.lbx(), buffers.ubx());
            let status = if buffers.p().first().is_some_and(|p| *p < 0.0) {
                RawStatus::MaxIterations
            } else {
                RawStatus::Solved
            };
            Ok(RawResult {
                f: fun.eval_f(&x, buffers.p()),
                g: fun.eval_g(&x, buffers.p()),
                lam_x: vec![self.lam_x; x.len()],
                lam_g: vec![0.0; fun.n_g()],
                x,
                iterations: 3,
                status,
                message: String::new(),
                extras: BTreeMap::new(),
            })
        }
    }

    /// f = (x - 1)² + a x, g = [x]
    fn problem() -> Problem {
        let x = Expr::sym("x");
        let a = Expr::sym("a");
        Problem::builder()
            .variables([x.clone()])
            .parameters([a.clone()])
            .objective((&x - 1.0).powi(2) + &a * &x)
            .constraint(x.clone())
            .build()
            .unwrap()
    }

    fn session_with(backend: MockBackend, config: SessionConfig) -> Result<SolveSession, NlpError> {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(backend));
        SolveSession::builder(problem())
            .registry(registry)
            .backend("mock")
            .config(config)
            .build()
    }

    #[test]
    fn test_no_result_before_solve() {
        let session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        assert_eq!(session.state(), &SessionState::Built);
        assert_eq!(session.status(), SolveStatus::Unsolved);
        assert_eq!(session.result().unwrap_err(), NlpError::NoResultYet);
        assert_eq!(session.output("x").unwrap_err(), NlpError::NoResultYet);
        assert_eq!(session.structure_builds(), 1);
    }

    #[test]
    fn test_inconsistent_bounds_never_reach_backend() {
        let backend = MockBackend::new(Capabilities::all());
        let solves = Arc::clone(&backend.solves);
        let mut session = session_with(backend, SessionConfig::default()).unwrap();
        session.set("lbx", &[-10.0]).unwrap();
        session.set("ubx", &[-20.0]).unwrap();
        let err = session.solve().unwrap_err();
        assert!(matches!(
            err,
            NlpError::BoundsInconsistent {
                kind: BoundKind::Variable,
                index: 0,
                ..
            }
        ));
        assert_eq!(solves.load(Ordering::SeqCst), 0);
        assert_eq!(session.status(), SolveStatus::InfeasibleBounds);
        assert!(matches!(session.state(), SessionState::Failed(_)));
        assert!(session.result().is_err());
    }

    #[test]
    fn test_result_survives_later_failure() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        session.set("x0", &[0.25]).unwrap();
        session.solve().unwrap();
        assert_eq!(session.state(), &SessionState::Solved);

        session.set("p", &[-1.0]).unwrap();
        let err = session.solve().unwrap_err();
        assert!(matches!(
            err,
            NlpError::BackendFailure {
                reason: FailureReason::NonConvergence { iterations: 3 },
                ..
            }
        ));
        assert_eq!(session.status(), SolveStatus::BackendFailure);
        assert_eq!(session.result().unwrap().x, vec![0.25]);

        // a failed session can be reconfigured and solved again
        session.reconfigure([("p", vec![2.0])]).unwrap();
        assert_eq!(session.state(), &SessionState::Validated);
        session.solve().unwrap();
        assert_eq!(session.status(), SolveStatus::Solved);
    }

    #[test]
    fn test_parametric_resolve_reuses_structure() {
        let backend = MockBackend::new(Capabilities::all());
        let prepares = Arc::clone(&backend.prepares);
        let mut session = session_with(backend, SessionConfig::default()).unwrap();
        for a in [0.0, 1.0, 2.0] {
            session.set("p", &[a]).unwrap();
            session.solve().unwrap();
        }
        assert_eq!(prepares.load(Ordering::SeqCst), 1);
        assert_eq!(session.structure_builds(), 1);

        session.rebind(problem()).unwrap();
        assert_eq!(prepares.load(Ordering::SeqCst), 2);
        assert_eq!(session.structure_builds(), 2);
        assert_eq!(session.status(), SolveStatus::Unsolved);
        assert!(session.result().is_err());
    }

    #[test]
    fn test_lam_p_and_stats() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        session.set("x0", &[0.5]).unwrap();
        session.set("p", &[3.0]).unwrap();
        let result = session.solve().unwrap();
        // ∂f/∂a = x
        assert_eq!(result.lam_p, vec![0.5]);
        assert_eq!(result.stats.backend, "mock");
        assert_eq!(result.stats.iterations, 3);
        assert_eq!(result.stats.return_status, "Solve_Succeeded");
        assert_eq!(session.output("f").unwrap(), vec![0.25 + 1.5]);
    }

    #[test]
    fn test_inactive_multipliers_zeroed() {
        let mut backend = MockBackend::new(Capabilities::all());
        backend.lam_x = 0.7;
        let mut session = session_with(backend, SessionConfig::default()).unwrap();
        session.set("x0", &[0.5]).unwrap();
        assert_eq!(session.solve().unwrap().lam_x, vec![0.0]);

        session.set("ubx", &[0.5]).unwrap();
        assert_eq!(session.solve().unwrap().lam_x, vec![0.7]);
    }

    #[test]
    fn test_capability_gating() {
        let none = Capabilities {
            supports_empty_constraints: true,
            ..Capabilities::default()
        };

        let timeout = SessionConfig {
            timeout: Some(Duration::from_secs(1)),
            ..SessionConfig::default()
        };
        assert!(matches!(
            session_with(MockBackend::new(none), timeout),
            Err(NlpError::CapabilityUnsupported {
                capability: Capability::Timeout,
                ..
            })
        ));

        let mut session = session_with(MockBackend::new(none), SessionConfig::default()).unwrap();
        assert!(matches!(
            session.solve(),
            Err(NlpError::CapabilityUnsupported {
                capability: Capability::InfiniteBounds,
                ..
            })
        ));
        assert_eq!(session.status(), SolveStatus::BackendFailure);

        session
            .reconfigure([
                ("lbx", vec![-5.0]),
                ("ubx", vec![5.0]),
                ("lbg", vec![-5.0]),
                ("ubg", vec![5.0]),
            ])
            .unwrap();
        session.set("lam_x0", &[0.0]).unwrap();
        assert!(matches!(
            session.solve(),
            Err(NlpError::CapabilityUnsupported {
                capability: Capability::WarmStart,
                ..
            })
        ));
        session.clear("lam_x0").unwrap();
        assert!(session.solve().is_ok());
    }

    #[test]
    fn test_empty_constraints_gated_at_build() {
        let caps = Capabilities {
            supports_empty_constraints: false,
            ..Capabilities::all()
        };
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::new(caps)));
        let x = Expr::sym("x");
        let unconstrained = Problem::builder()
            .variables([x.clone()])
            .objective(x.powi(2))
            .build()
            .unwrap();
        let err = SolveSession::builder(unconstrained)
            .registry(registry)
            .backend("mock")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            NlpError::CapabilityUnsupported {
                capability: Capability::EmptyConstraints,
                ..
            }
        ));
    }

    #[test]
    fn test_warm_start_copies_result() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        assert_eq!(session.warm_start_from_result(), Err(NlpError::NoResultYet));
        session.set("x0", &[0.3]).unwrap();
        session.solve().unwrap();
        session.clear("x0").unwrap();
        session.warm_start_from_result().unwrap();
        assert_eq!(session.input("x0").unwrap(), vec![0.3]);
        assert_eq!(session.input("lam_g0").unwrap(), vec![0.0]);
        assert!(session.buffers().has_multiplier_guess());
    }

    #[test]
    fn test_unknown_keys_and_backends() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        assert_eq!(
            session.set("lbz", &[0.0]),
            Err(NlpError::UnknownBufferKey("lbz".into()))
        );
        // extension inputs declared by the backend are accepted
        session.set("scale", &[2.0]).unwrap();
        assert_eq!(session.input("scale").unwrap(), vec![2.0]);

        let err = SolveSession::builder(problem()).backend("nope").build().unwrap_err();
        assert_eq!(err, NlpError::UnknownBackend("nope".into()));
    }

    #[test]
    fn test_replaced_inputs_checked_against_problem() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        session.replace_inputs(BufferSet::new(2, 1, 1));
        assert!(matches!(session.solve(), Err(NlpError::BufferSize { .. })));
        assert_eq!(session.status(), SolveStatus::Unsolved);
    }

    #[test]
    fn test_rejected_reconfigure_writes_nothing() {
        let mut session = session_with(MockBackend::new(Capabilities::all()), SessionConfig::default()).unwrap();
        session.solve().unwrap();
        let err = session
            .reconfigure([("ubx", vec![0.5]), ("bogus", vec![1.0])])
            .unwrap_err();
        assert_eq!(err, NlpError::UnknownBufferKey("bogus".into()));
        assert_eq!(session.state(), &SessionState::Solved);
        assert_eq!(session.input("ubx").unwrap(), vec![f64::INFINITY]);
    }
}
