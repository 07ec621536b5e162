use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use nlpsol_algo::SolveSession;
use nlpsol_cli::config::NlpsolConfig;
use nlpsol_cli::problem_file::ProblemFile;
use tabwriter::TabWriter;

use super::{resolve_backend, resolve_options};

/// Build the problem, prepare the backend and validate the inputs, without
/// solving.
pub fn run(path: &Path, backend: Option<&str>, assignments: &[String], config: &NlpsolConfig) -> Result<()> {
    let file = ProblemFile::load(path)?;
    let problem = file
        .problem()
        .with_context(|| format!("building problem from {}", path.display()))?;
    let backend = resolve_backend(backend, &file, config);
    let options = resolve_options(&backend, &file, config, assignments)?;

    let functions = problem.functions();
    let mut tw = TabWriter::new(io::stdout().lock());
    writeln!(tw, "problem\t{}", path.display())?;
    writeln!(tw, "variables\t{}", problem.n_x())?;
    writeln!(tw, "parameters\t{}", problem.n_p())?;
    writeln!(
        tw,
        "constraints\t{} ({})",
        problem.n_g(),
        if functions.constraints_are_linear() { "linear" } else { "nonlinear" }
    )?;
    writeln!(tw, "jacobian nonzeros\t{}", functions.jac_g_sparsity().len())?;
    writeln!(tw, "hessian nonzeros\t{}", functions.hess_lag_sparsity().len())?;
    writeln!(tw, "backend\t{}", backend)?;
    tw.flush()?;
    drop(tw);

    let mut session = SolveSession::builder(problem)
        .backend(&backend)
        .options(options)
        .build()
        .with_context(|| format!("preparing backend '{}'", backend))?;
    file.apply_inputs(&mut session)
        .with_context(|| format!("inputs of {}", path.display()))?;
    session
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    println!("ok");
    Ok(())
}
