//! CLI command handling
//!
//! Dispatches CLI commands to the test engine and formats output.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::{Commands, OutputFormat, RunOverrides};
use crate::common::config::Config;
use crate::common::Result;
use crate::testing::{self, RunSettings, TestCase, TestResult};

/// Dispatch a CLI command
///
/// Returns whether every test case passed (or validated).
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            files,
            overrides,
            format,
        } => {
            let config = load_config(&overrides)?;
            let settings = RunSettings::from_config(&config)?;
            tracing::debug!(?settings, "Resolved run settings");

            let results = match format {
                OutputFormat::Text => run_with_report(&files, &settings).await,
                OutputFormat::Json => {
                    let results = testing::run_suite(&files, &settings).await;
                    print_json(&results)?;
                    results
                }
            };

            Ok(results.iter().all(|r| r.passed))
        }

        Commands::Check { files } => Ok(check_files(&files)),
    }
}

/// Config file, then environment, then command line
fn load_config(overrides: &RunOverrides) -> Result<Config> {
    load_config_with(overrides, |key| std::env::var(key).ok())
}

fn load_config_with<F>(overrides: &RunOverrides, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &overrides.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_from(env)?;

    if let Some(client) = &overrides.client {
        config.client.path = client.clone();
    }
    if overrides.keep_env {
        config.run.keep_env = true;
    }
    if let Some(wait) = overrides.server_wait {
        config.run.server_wait_secs = wait;
    }
    if let Some(timeout) = overrides.timeout {
        config.run.invocation_timeout_secs = timeout;
    }
    if let Some(work_dir) = &overrides.work_dir {
        config.run.work_dir = work_dir.clone();
    }

    config.server_wait()?;
    Ok(config)
}

async fn run_with_report(files: &[PathBuf], settings: &RunSettings) -> Vec<TestResult> {
    let mut results = Vec::with_capacity(files.len());

    for path in files {
        println!(
            "\n{} {}",
            "Running Test:".blue().bold(),
            path.display().to_string().white().bold()
        );
        let result = testing::run_file(path, settings).await;
        print_result(&result);
        results.push(result);
    }

    print_summary(&results);
    results
}

fn print_result(result: &TestResult) {
    if result.passed {
        println!(
            "  {} {} {}",
            "✓".green(),
            result.name,
            format!("({} ms)", result.duration_ms).dimmed()
        );
        return;
    }

    let label = if result.verification_failure {
        "Test Failed"
    } else {
        "Error"
    };
    println!("  {} {}: {}", "✗".red(), result.name, label.red().bold());
    println!("    {} {}", "after:".dimmed(), result.state);
    if let Some(code) = result.return_code {
        println!("    {} {}", "client exit code:".dimmed(), code);
    }
    if let Some(error) = &result.error {
        for line in error.lines() {
            println!("    {}", line);
        }
    }
}

fn print_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;

    println!();
    if failed == 0 {
        println!(
            "{} {}",
            "✓".green().bold(),
            format!("All {} tests passed", passed).green().bold()
        );
    } else {
        println!(
            "{} {}",
            "✗".red().bold(),
            format!("{} of {} tests failed", failed, results.len()).red().bold()
        );
        for result in results.iter().filter(|r| !r.passed) {
            println!("  - {}", result.name);
        }
    }
}

fn print_json(results: &[TestResult]) -> Result<()> {
    let passed = results.iter().filter(|r| r.passed).count();
    let report = serde_json::json!({
        "passed": passed,
        "failed": results.len() - passed,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check_files(files: &[PathBuf]) -> bool {
    let mut valid = true;
    for path in files {
        if !check_file(path) {
            valid = false;
        }
    }
    valid
}

fn check_file(path: &Path) -> bool {
    match TestCase::load(path) {
        Ok(case) => {
            println!(
                "{} {} {}",
                "✓".green(),
                path.display(),
                format!("({})", case.name).dimmed()
            );
            true
        }
        Err(e) => {
            println!("{} {}: {}", "✗".red(), path.display(), e);
            false
        }
    }
}
