//! CLI command definitions
//!
//! Defines the clap commands for the testenv CLI.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run test cases against the client
    Run {
        /// YAML test case files, run in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        overrides: RunOverrides,

        /// Output format for the results
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Parse and validate test case files without running them
    Check {
        /// YAML test case files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Command line overrides, applied on top of the config file and environment
#[derive(Args, Debug, Default, Clone)]
pub struct RunOverrides {
    /// Client executable under test (path, or a name looked up in PATH)
    #[arg(long)]
    pub client: Option<PathBuf>,

    /// Keep each test's working directory after the run
    #[arg(long)]
    pub keep_env: bool,

    /// Seconds to wait after starting the servers, before invoking the client
    #[arg(long, value_name = "SECS")]
    pub server_wait: Option<f64>,

    /// Seconds after which a client invocation is killed
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory in which test working directories are created
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Configuration file (default: the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored human-readable report
    Text,
    /// One JSON document with every result
    Json,
}
