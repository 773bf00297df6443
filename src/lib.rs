//! Client Test Environment - black-box tests for network download clients
//!
//! Test cases are declared in YAML: the servers to start and the files they
//! host, the options passed to the client, and what the client must leave
//! behind. The engine runs the client against local mock servers and checks
//! the outcome.

pub mod cli;
pub mod commands;
pub mod common;
pub mod server;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{RunSettings, TestCase, TestResult};
