use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint};

#[derive(Parser, Debug)]
#[command(name = "nlpsol", author, version, about = "Solve nonlinear programs through a uniform backend facade", long_about = None)]
pub struct Cli {
    /// Default log filter (overrides the config file; RUST_LOG overrides both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file, defaults to ~/.nlpsol/config.toml
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Solve the problem described in a TOML file
    Solve(SolveArgs),
    /// Validate a problem file and its bounds without solving
    Check {
        /// Problem file
        #[arg(value_hint = ValueHint::FilePath)]
        problem: PathBuf,

        /// Backend whose options and capabilities to check against
        #[arg(short, long)]
        backend: Option<String>,

        /// Backend option as key=value (repeatable)
        #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// List available backends with their capabilities and options
    Backends {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(clap::Args, Debug)]
pub struct SolveArgs {
    /// Problem file
    #[arg(value_hint = ValueHint::FilePath)]
    pub problem: PathBuf,

    /// Backend id (overrides the problem file and the config default)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Backend option as key=value (repeatable)
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Input buffer (or declared parameter/variable name) as key=v1,v2,...
    /// (repeatable, applied after the file's inputs)
    #[arg(short, long = "set", value_name = "KEY=VALUES")]
    pub set: Vec<String>,

    /// Wall-clock limit in seconds (overrides the config file)
    #[arg(long)]
    pub timeout: Option<f64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
