//! Test runner implementation
//!
//! Drives one test case through its states:
//!
//! `Init → EnvReady → ServersStarted → PreHooksDone → Invoked →
//! ServersStopped → PostHooksDone → CleanedUp`
//!
//! Whatever fails, servers are stopped exactly once before the error is
//! reported and the working directory is removed (unless kept on request).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::common::config::{Config, ServerConfig};
use crate::common::{Error, Result};

use super::hooks::{
    apply_test_options, run_post_hooks, run_pre_hooks, PostHookContext, PreHookContext,
};
use super::invoke::{build_argv, Invoker};
use super::lifecycle::ServerSet;
use super::model::TestCase;
use super::template::TemplateContext;

/// Settings shared by every test case of a run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub client: PathBuf,
    /// Parent of the per-test working directories
    pub work_dir: PathBuf,
    pub server_wait: Option<Duration>,
    pub timeout: Duration,
    /// Keep working directories after the run
    pub keep_env: bool,
    pub server: ServerConfig,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            client: config.client.path.clone(),
            work_dir: config.run.work_dir.clone(),
            server_wait: config.server_wait()?,
            timeout: Duration::from_secs(config.run.invocation_timeout_secs),
            keep_env: config.run.keep_env,
            server: config.server.clone(),
        })
    }

    fn invoker(&self) -> Invoker {
        Invoker {
            client: self.client.clone(),
            server_wait: self.server_wait,
            timeout: self.timeout,
        }
    }
}

/// Execution state of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TestState {
    Init,
    EnvReady,
    ServersStarted,
    PreHooksDone,
    Invoked,
    ServersStopped,
    PostHooksDone,
    CleanedUp,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestState::Init => "init",
            TestState::EnvReady => "environment ready",
            TestState::ServersStarted => "servers started",
            TestState::PreHooksDone => "pre-test hooks done",
            TestState::Invoked => "client invoked",
            TestState::ServersStopped => "servers stopped",
            TestState::PostHooksDone => "post-test hooks done",
            TestState::CleanedUp => "cleaned up",
        };
        write!(f, "{}", name)
    }
}

/// Result of a test run
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    /// Last state reached; for a failed test, the state it failed after
    pub state: TestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    /// Whether the error is a failed expectation about the client
    pub verification_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    pub duration_ms: u64,
}

impl TestResult {
    fn failed_to_load(path: &Path, error: &Error) -> Self {
        Self {
            name: path.display().to_string(),
            passed: false,
            state: TestState::Init,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
            verification_failure: false,
            return_code: None,
            duration_ms: 0,
        }
    }
}

/// Tracks the state machine of one test case
struct Progress<'a> {
    name: &'a str,
    state: TestState,
    return_code: Option<i32>,
}

impl Progress<'_> {
    fn advance(&mut self, state: TestState) {
        tracing::debug!(test = self.name, from = %self.state, to = %state, "State transition");
        self.state = state;
    }
}

/// Exclusive working directory of one test case
///
/// Removed by [`TestEnv::cleanup`], or on drop as a fallback, unless kept.
struct TestEnv {
    path: PathBuf,
    keep: bool,
    released: bool,
}

impl TestEnv {
    /// Create `<work_dir>/<name>-test`, replacing any leftover from a previous run
    fn create(work_dir: &Path, name: &str, keep: bool) -> Result<Self> {
        let path = work_dir.join(format!("{}-test", name));
        if path.exists() {
            tracing::debug!(path = %path.display(), "Removing stale test environment");
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        let path = path.canonicalize()?;

        Ok(Self {
            path,
            keep,
            released: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn cleanup(mut self) -> Result<()> {
        self.released = true;
        if self.keep {
            tracing::info!(path = %self.path.display(), "Keeping test environment");
            return Ok(());
        }
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        if self.released || self.keep {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to remove test environment: {}", e);
        }
    }
}

/// Run a validated test case to completion
pub async fn run_test_case(case: &TestCase, settings: &RunSettings) -> TestResult {
    let started = Instant::now();
    let mut progress = Progress {
        name: &case.name,
        state: TestState::Init,
        return_code: None,
    };

    tracing::debug!(test = %case.name, "Running test case");
    let outcome = execute(case, settings, &mut progress).await;

    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(()) => TestResult {
            name: case.name.clone(),
            passed: true,
            state: progress.state,
            error: None,
            error_code: None,
            verification_failure: false,
            return_code: progress.return_code,
            duration_ms,
        },
        Err(e) => {
            tracing::debug!(test = %case.name, state = %progress.state, "Test failed: {}", e);
            TestResult {
                name: case.name.clone(),
                passed: false,
                state: progress.state,
                error: Some(e.to_string()),
                error_code: Some(e.code()),
                verification_failure: e.is_verification(),
                return_code: progress.return_code,
                duration_ms,
            }
        }
    }
}

async fn execute(case: &TestCase, settings: &RunSettings, progress: &mut Progress<'_>) -> Result<()> {
    let env = TestEnv::create(&settings.work_dir, &case.name, settings.keep_env)?;
    progress.advance(TestState::EnvReady);

    let outcome = run_in_env(case, settings, env.path(), progress).await;
    let cleaned = env.cleanup();

    if let (Err(_), Err(e)) = (&outcome, &cleaned) {
        tracing::warn!(test = %progress.name, "Failed to remove test environment: {}", e);
    }
    outcome?;
    cleaned?;
    progress.advance(TestState::CleanedUp);
    Ok(())
}

async fn run_in_env(
    case: &TestCase,
    settings: &RunSettings,
    workdir: &Path,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let mut servers = ServerSet::start(&case.servers, &settings.server).await?;
    progress.advance(TestState::ServersStarted);

    let templates = servers.template_context();
    let invoked = prepare_and_invoke(case, settings, workdir, &mut servers, &templates, progress).await;

    // Harvest and stop on every path, before any error surfaces
    let harvest = servers.stop().await;
    let return_code = invoked?;
    progress.advance(TestState::ServersStopped);

    let ctx = PostHookContext {
        workdir,
        return_code,
        harvest: &harvest,
        templates: &templates,
    };
    run_post_hooks(&case.post_hooks, &ctx)?;
    progress.advance(TestState::PostHooksDone);
    Ok(())
}

async fn prepare_and_invoke(
    case: &TestCase,
    settings: &RunSettings,
    workdir: &Path,
    servers: &mut ServerSet,
    templates: &TemplateContext,
    progress: &mut Progress<'_>,
) -> Result<i32> {
    let mut ctx = PreHookContext {
        workdir,
        servers: &mut *servers,
        templates,
    };
    run_pre_hooks(&case.pre_hooks, &mut ctx).await?;
    progress.advance(TestState::PreHooksDone);

    let invocation = apply_test_options(&case.test_options, templates)?;
    let argv = build_argv(&invocation.options, &invocation.urls, &servers.domain_index())?;

    let return_code = settings.invoker().invoke(&argv, workdir).await?;
    progress.return_code = Some(return_code);
    progress.advance(TestState::Invoked);
    Ok(return_code)
}

/// Load and run one test case file
pub async fn run_file(path: &Path, settings: &RunSettings) -> TestResult {
    match TestCase::load(path) {
        Ok(case) => run_test_case(&case, settings).await,
        Err(e) => {
            tracing::debug!(path = %path.display(), "Failed to load test case: {}", e);
            TestResult::failed_to_load(path, &e)
        }
    }
}

/// Run test case files one after another
pub async fn run_suite(paths: &[PathBuf], settings: &RunSettings) -> Vec<TestResult> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        results.push(run_file(path, settings).await);
    }
    results
}
