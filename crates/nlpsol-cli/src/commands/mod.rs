pub mod backends;
pub mod check;
pub mod solve;

use anyhow::{Context, Result};
use nlpsol_cli::config::NlpsolConfig;
use nlpsol_cli::problem_file::ProblemFile;
use nlpsol_core::Options;

/// Command line, then problem file, then configured default.
pub fn resolve_backend(cli: Option<&str>, file: &ProblemFile, config: &NlpsolConfig) -> String {
    cli.or(file.backend.as_deref())
        .unwrap_or(config.solver.default_backend.as_str())
        .to_string()
}

/// Configured defaults, overridden by the problem file, overridden by
/// `-O key=value` assignments.
pub fn resolve_options(
    backend: &str,
    file: &ProblemFile,
    config: &NlpsolConfig,
    assignments: &[String],
) -> Result<Options> {
    let mut options = config.backend_options(backend).merged(&file.options);
    for assignment in assignments {
        options
            .set_assignment(assignment)
            .with_context(|| format!("option '{}'", assignment))?;
    }
    Ok(options)
}
