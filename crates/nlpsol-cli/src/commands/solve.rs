use std::fs::File;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nlpsol_algo::{BackendRegistry, SessionConfig, SolveSession};
use nlpsol_cli::cli::{OutputFormat, SolveArgs};
use nlpsol_cli::config::NlpsolConfig;
use nlpsol_cli::parse_buffer_assignment;
use nlpsol_cli::problem_file::ProblemFile;
use nlpsol_cli::report::{write_json, write_text, SolveReport};
use tracing::info;

use super::{resolve_backend, resolve_options};

pub fn run(args: &SolveArgs, config: &NlpsolConfig) -> Result<()> {
    let file = ProblemFile::load(&args.problem)?;
    let problem = file
        .problem()
        .with_context(|| format!("building problem from {}", args.problem.display()))?;
    let backend = resolve_backend(args.backend.as_deref(), &file, config);
    let options = resolve_options(&backend, &file, config, &args.options)?;
    let timeout = session_timeout(&backend, args.timeout, config)?;

    info!(
        "Solving {} with '{}' ({} variables, {} constraints)",
        args.problem.display(),
        backend,
        problem.n_x(),
        problem.n_g()
    );
    let mut session = SolveSession::builder(problem)
        .backend(&backend)
        .options(options)
        .config(SessionConfig {
            timeout,
            ..SessionConfig::default()
        })
        .build()
        .with_context(|| format!("preparing backend '{}'", backend))?;
    file.apply_inputs(&mut session)
        .with_context(|| format!("inputs of {}", args.problem.display()))?;
    for assignment in &args.set {
        let (key, values) = parse_buffer_assignment(assignment)?;
        file.apply_assignment(&mut session, &key, &values)
            .with_context(|| format!("--set {}", assignment))?;
    }

    let outcome = session.solve().cloned();
    let report = SolveReport {
        status: session.status(),
        backend: &backend,
        result: outcome.as_ref().ok(),
        error: outcome.as_ref().err().map(|e| e.to_string()),
    };
    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    match args.format {
        OutputFormat::Text => write_text(&mut out, &report)?,
        OutputFormat::Json => write_json(&mut out, &report)?,
    }
    out.flush()?;

    outcome
        .map(|_| ())
        .with_context(|| format!("solving {}", args.problem.display()))
}

/// `--timeout` always applies; the configured timeout only for backends
/// that can honour it.
fn session_timeout(backend: &str, cli: Option<f64>, config: &NlpsolConfig) -> Result<Option<Duration>> {
    if let Some(secs) = cli {
        return Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| anyhow!("invalid --timeout {}: {}", secs, e));
    }
    if config.solver.timeout_seconds == 0 {
        return Ok(None);
    }
    let supported = BackendRegistry::with_defaults()
        .get(backend)
        .map(|b| b.capabilities().supports_timeout)
        .unwrap_or(false);
    Ok(supported.then(|| Duration::from_secs(config.solver.timeout_seconds)))
}
