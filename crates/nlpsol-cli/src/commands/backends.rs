use std::io;

use anyhow::Result;
use nlpsol_algo::{BackendRegistry, NlpBackend};
use nlpsol_cli::cli::OutputFormat;
use nlpsol_cli::report::{write_backends_json, write_backends_text};

pub fn run(format: OutputFormat) -> Result<()> {
    let registry = BackendRegistry::with_defaults();
    let backends: Vec<_> = registry.list().into_iter().filter_map(|id| registry.get(id)).collect();
    let refs: Vec<&dyn NlpBackend> = backends.iter().map(|b| b.as_ref()).collect();
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Text => write_backends_text(&mut out, &refs),
        OutputFormat::Json => write_backends_json(&mut out, &refs),
    }
}
