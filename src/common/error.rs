//! Error types for the test environment
//!
//! Verification failures carry enough context to be printed as-is: content
//! mismatches include a rendered diff, header mismatches the offending names.

use std::io;
use thiserror::Error;

use crate::testing::Phase;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test environment
#[derive(Error, Debug)]
pub enum Error {
    // === Declarative Surface Errors ===
    #[error("{phase} function '{name}' not defined")]
    UnknownHook { phase: Phase, name: String },

    #[error("Invalid test case '{name}': {message}")]
    TestCaseParse { name: String, message: String },

    #[error("No value bound for placeholder '{{{{{0}}}}}'")]
    UnresolvedPlaceholder(String),

    // === Invocation Errors ===
    #[error("Client executable could not be started: {0}")]
    Execution(String),

    #[error("Client did not exit within {0} seconds")]
    InvocationTimeout(u64),

    // === Verification Errors ===
    #[error("Return codes do not match. Expected: {expected}, Actual: {actual}")]
    ReturnCodeMismatch { expected: i32, actual: i32 },

    #[error("Expected file {0} not found")]
    MissingFile(String),

    #[error("Contents of {path} do not match\n{diff}")]
    ContentMismatch { path: String, diff: String },

    #[error("Extra files downloaded: {}", .0.join(", "))]
    UnexpectedFiles(Vec<String>),

    #[error("Not all files were crawled correctly on server {server}: {}", .diff.join(", "))]
    CrawlMismatch { server: usize, diff: Vec<String> },

    // === Server Errors ===
    #[error("Mock server error: {0}")]
    Server(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Unhandled fault: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unknown hook error for the given phase
    pub fn unknown_hook(phase: Phase, name: &str) -> Self {
        Self::UnknownHook {
            phase,
            name: name.to_string(),
        }
    }

    /// Create a test case parse error
    pub fn test_case_parse(name: &str, message: impl std::fmt::Display) -> Self {
        Self::TestCaseParse {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error is a failed expectation about the client's behavior,
    /// as opposed to a problem with the test case or the environment
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            Error::ReturnCodeMismatch { .. }
                | Error::MissingFile(_)
                | Error::ContentMismatch { .. }
                | Error::UnexpectedFiles(_)
                | Error::CrawlMismatch { .. }
        )
    }

    /// Short machine-readable code used in JSON reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownHook { .. } => "UNKNOWN_HOOK",
            Error::TestCaseParse { .. } => "TEST_CASE_PARSE",
            Error::UnresolvedPlaceholder(_) => "UNRESOLVED_PLACEHOLDER",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::InvocationTimeout(_) => "INVOCATION_TIMEOUT",
            Error::ReturnCodeMismatch { .. } => "RETURN_CODE_MISMATCH",
            Error::MissingFile(_) => "MISSING_FILE",
            Error::ContentMismatch { .. } => "CONTENT_MISMATCH",
            Error::UnexpectedFiles(_) => "UNEXPECTED_FILES",
            Error::CrawlMismatch { .. } => "CRAWL_MISMATCH",
            Error::Server(_) => "SERVER_ERROR",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "UNHANDLED_FAULT",
        }
    }
}
