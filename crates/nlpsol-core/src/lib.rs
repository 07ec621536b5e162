//! # nlpsol-core: problem descriptors and the buffer protocol
//!
//! Everything a solver backend needs to know about a nonlinear program,
//! independent of how it is solved:
//!
//! - [`Expr`] - symbolic scalar expressions with differentiation
//! - [`Problem`] - the immutable problem descriptor (`x`, `p`, `f`, `g`)
//! - [`NlpFunctions`] - compiled objective/constraint callbacks and derivatives
//! - [`BufferSet`] - named input buffers (`x0`, `lbx`, `ubx`, `lbg`, `ubg`, `p`, ...)
//! - [`bounds`] - bound consistency validation
//! - [`SolveResult`] / [`SolveStatus`] - outputs of a solve
//! - [`Options`] - backend option mapping with per-backend schemas
//! - [`Permutation`] - relabeling of variables and constraints
//!
//! ## Example
//!
//! ```
//! use nlpsol_core::{BufferSet, Expr, Problem};
//!
//! let x = Expr::sym("x");
//! let y = Expr::sym("y");
//! let problem = Problem::builder()
//!     .variables([x.clone(), y.clone()])
//!     .objective((1.0 - &x).powi(2) + 100.0 * (&y - x.powi(2)).powi(2))
//!     .constraint(x.powi(2) + y.powi(2))
//!     .build()
//!     .unwrap();
//!
//! let mut buffers = BufferSet::for_problem(&problem);
//! buffers.set("ubg", &[1.0]).unwrap();
//! assert!(nlpsol_core::bounds::validate(&buffers).is_ok());
//! ```

pub mod bounds;
pub mod buffers;
pub mod derivatives;
pub mod error;
pub mod expr;
pub mod options;
mod parse;
pub mod permutation;
pub mod problem;
pub mod solution;

pub use buffers::{BufferKey, BufferSet};
pub use derivatives::NlpFunctions;
pub use error::{BoundKind, Capability, FailureReason, NlpError, NlpResult, ParseError};
pub use expr::{BinaryOp, Expr, Tape, UnaryOp};
pub use options::{validate_options, OptionSpec, OptionType, OptionValue, Options};
pub use permutation::Permutation;
pub use problem::{Problem, ProblemBuilder};
pub use solution::{SolveResult, SolveStats, SolveStatus};
