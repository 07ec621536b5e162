//! # nlpsol-algo: solver backends and solve sessions
//!
//! This crate turns a [`nlpsol_core::Problem`] into numbers. It provides the
//! backend contract, three pure-Rust backends, and the session state machine
//! that validates inputs before any backend is invoked.
//!
//! ## Backends
//!
//! | id | Method | Timeout | QP sub-solver |
//! |----|--------|---------|---------------|
//! | `ipm` | Primal-dual interior point with log barrier | yes | - |
//! | `sqp` | Sequential quadratic programming, ℓ1 merit | no | `active_set`, `clarabel` |
//! | `auglag` | Augmented Lagrangian, argmin L-BFGS inner solve | no | - |
//!
//! ### Architecture
//!
//! - **[`NlpBackend`]**: factory that prepares a problem once
//! - **[`BackendHandle`]**: prepared state, solved repeatedly with new buffers
//! - **[`BackendRegistry`]**: lookup by id
//! - **[`SolveSession`]**: validation, dispatch, multiplier normalization
//!
//! Multipliers follow `∇f + (∂g/∂x)ᵀ lam_g + lam_x = 0` for every backend.
//!
//! ## Example
//!
//! ```
//! use nlpsol_algo::SolveSession;
//! use nlpsol_core::{Expr, Options, Problem};
//!
//! let x = Expr::sym("x");
//! let y = Expr::sym("y");
//! let problem = Problem::builder()
//!     .variables([x.clone(), y.clone()])
//!     .objective(x.powi(2) + y.powi(2))
//!     .constraint(&x + &y)
//!     .build()
//!     .unwrap();
//!
//! let mut session = SolveSession::builder(problem)
//!     .backend("sqp")
//!     .options(Options::new().with("max_iter", 50))
//!     .build()
//!     .unwrap();
//! session.set("lbg", &[1.0]).unwrap();
//! let result = session.solve().unwrap();
//! assert!((result.x[0] - 0.5).abs() < 1e-6);
//! assert!(result.lam_g[0] < 0.0);
//! ```

pub mod backends;
pub mod hessian;
pub mod linalg;
pub mod multipliers;
pub mod qp;
pub mod registry;
pub mod session;
pub mod sweep;
pub mod traits;

pub use backends::{AugLagBackend, AugLagSettings, IpmBackend, IpmSettings, SqpBackend, SqpSettings};
pub use registry::BackendRegistry;
pub use session::{nlpsol, SessionConfig, SessionState, SolveSession, SolveSessionBuilder};
pub use sweep::{solve_parametric_sweep, SweepPoint, SweepSpec};
pub use traits::{BackendHandle, Capabilities, NlpBackend, RawResult, RawStatus, SolveControl};
