pub mod cli;
pub mod config;
pub mod problem_file;
pub mod report;

use anyhow::{anyhow, Context, Result};

/// Parse `key=v1,v2,...` into a buffer key and its values. `inf` and
/// `-inf` are accepted.
pub fn parse_buffer_assignment(text: &str) -> Result<(String, Vec<f64>)> {
    let (key, values) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUES, got '{}'", text))?;
    let values = values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid number '{}' for '{}'", v.trim(), key))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((key.trim().to_string(), values))
}
