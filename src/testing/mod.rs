//! Declarative test engine
//!
//! Reads YAML test cases, starts the mock servers they describe, runs the
//! client under test against them and verifies exit code, downloaded files
//! and the request headers each server observed.

mod hooks;
mod invoke;
mod lifecycle;
mod model;
mod runner;
mod template;
mod verify;

pub use hooks::{CrawlExpectation, Phase, PostHook, PreHook, TestOption};
pub use invoke::{build_argv, split_options, Invoker};
pub use lifecycle::{DomainIndex, ServerHarvest, ServerSet};
pub use model::{
    AuthScheme, Credentials, ResourceFile, RuleSet, RuleSpec, ServerKind, ServerSettings,
    TestCase,
};
pub use runner::{run_file, run_suite, run_test_case, RunSettings, TestResult, TestState};
pub use template::TemplateContext;
pub use verify::{check_crawled, check_files, check_return_code, snapshot, Snapshot};
