//! User configuration, read from `~/.nlpsol/config.toml`.
//!
//! ```toml
//! [solver]
//! default_backend = "sqp"
//! timeout_seconds = 30
//!
//! [logging]
//! level = "warn"
//!
//! [backends.ipm]
//! max_iter = 500
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nlpsol_algo::session::DEFAULT_BACKEND;
use nlpsol_core::Options;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NlpsolConfig {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default options per backend id, applied before the problem file's
    /// own options.
    #[serde(default)]
    pub backends: BTreeMap<String, Options>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverConfig {
    /// Backend used when neither the command line nor the problem file
    /// names one.
    #[serde(default = "default_backend")]
    pub default_backend: String,
    /// Wall-clock limit per solve in seconds (0 = no limit).
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            timeout_seconds: 0,
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive: trace, debug, info, warn, error.
    /// `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl NlpsolConfig {
    /// Configured default options for `backend` (empty when none).
    pub fn backend_options(&self, backend: &str) -> Options {
        self.backends.get(backend).cloned().unwrap_or_default()
    }
}

/// Location: ~/.nlpsol/config.toml
pub fn config_path() -> Result<PathBuf> {
    dirs::home_dir()
        .ok_or_else(|| anyhow!("Cannot determine home directory"))
        .map(|h| h.join(".nlpsol").join("config.toml"))
}

/// Load from `path`, or from [`config_path`] when `None`. A missing file
/// yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<NlpsolConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    if !path.exists() {
        return Ok(NlpsolConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_location() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains(".nlpsol"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, NlpsolConfig::default());
        assert_eq!(config.solver.default_backend, "ipm");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_partial_file() {
        let config: NlpsolConfig = toml::from_str(
            r#"
            [solver]
            default_backend = "sqp"

            [backends.ipm]
            max_iter = 500
            hessian_approximation = "limited-memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.solver.default_backend, "sqp");
        assert_eq!(config.solver.timeout_seconds, 0);
        assert_eq!(config.logging, LoggingConfig::default());
        let ipm = config.backend_options("ipm");
        assert_eq!(ipm.get_i64("max_iter"), Some(500));
        assert_eq!(ipm.get_str("hessian_approximation"), Some("limited-memory"));
        assert!(config.backend_options("sqp").is_empty());
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[solver\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("config.toml"));
    }
}
