//! Hook phases and their dispatch
//!
//! Every capability a test case can name is a variant of one of the three
//! closed enums below. Names are matched once, when the test case is parsed;
//! after that, dispatch is an exhaustive `match` and runs entries strictly in
//! declaration order, stopping at the first failure.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path};
use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::common::{Error, Result};

use super::lifecycle::{ServerHarvest, ServerSet};
use super::model::{ResourceFile, ServerSettings};
use super::template::TemplateContext;
use super::verify;

/// The three ordered stages of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Test,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "Pre Test"),
            Phase::Test => write!(f, "Test Option"),
            Phase::Post => write!(f, "Post Test"),
        }
    }
}

/// Capabilities of the pre-test phase
#[derive(Debug, Clone, PartialEq)]
pub enum PreHook {
    /// Files (and their rules) hosted by each server, by server index
    ServerFiles(Vec<Vec<ResourceFile>>),
    /// Files created in the working directory before the client runs
    LocalFiles(Vec<ResourceFile>),
    /// Settings applied to every server
    ServerConf(ServerSettings),
}

impl PreHook {
    pub fn parse(name: &str, value: serde_yaml::Value) -> Result<Self> {
        Ok(match name {
            "ServerFiles" => PreHook::ServerFiles(serde_yaml::from_value(value)?),
            "LocalFiles" => PreHook::LocalFiles(serde_yaml::from_value(value)?),
            "ServerConf" => PreHook::ServerConf(serde_yaml::from_value(value)?),
            _ => return Err(Error::unknown_hook(Phase::Pre, name)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PreHook::ServerFiles(_) => "ServerFiles",
            PreHook::LocalFiles(_) => "LocalFiles",
            PreHook::ServerConf(_) => "ServerConf",
        }
    }
}

/// Capabilities of the test-option phase
#[derive(Debug, Clone, PartialEq)]
pub enum TestOption {
    /// Base option string passed to the client, shell-quoted
    Commands(String),
    /// Paths requested from each server, by server index
    Urls(Vec<Vec<String>>),
}

impl TestOption {
    pub fn parse(name: &str, value: serde_yaml::Value) -> Result<Self> {
        Ok(match name {
            "Commands" | "WgetCommands" => TestOption::Commands(serde_yaml::from_value(value)?),
            "Urls" => TestOption::Urls(serde_yaml::from_value(value)?),
            _ => return Err(Error::unknown_hook(Phase::Test, name)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestOption::Commands(_) => "Commands",
            TestOption::Urls(_) => "Urls",
        }
    }
}

/// Which request headers each server is expected to have seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlExpectation {
    /// Exactly the headers declared by the server's `ExpectHeader` rules
    Declared,
    /// An explicit list of header names per server
    Explicit(Vec<Vec<String>>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCrawlExpectation {
    Keyword(String),
    Lists(Vec<Vec<String>>),
}

impl CrawlExpectation {
    fn parse(value: serde_yaml::Value) -> Result<Self> {
        match serde_yaml::from_value(value)? {
            RawCrawlExpectation::Keyword(word) if word == "declared" => Ok(Self::Declared),
            RawCrawlExpectation::Keyword(word) => Err(Error::Config(format!(
                "FilesCrawled expects 'declared' or per-server header lists, got '{}'",
                word
            ))),
            RawCrawlExpectation::Lists(lists) => Ok(Self::Explicit(lists)),
        }
    }
}

/// Capabilities of the post-test phase
#[derive(Debug, Clone, PartialEq)]
pub enum PostHook {
    /// Exact exit status expected from the client
    ExpectedRetcode(i32),
    /// Exact set of files expected in the working directory
    ExpectedFiles(Vec<ResourceFile>),
    /// Request headers each server must have observed
    FilesCrawled(CrawlExpectation),
}

impl PostHook {
    pub fn parse(name: &str, value: serde_yaml::Value) -> Result<Self> {
        Ok(match name {
            "ExpectedRetcode" => PostHook::ExpectedRetcode(serde_yaml::from_value(value)?),
            "ExpectedFiles" => PostHook::ExpectedFiles(serde_yaml::from_value(value)?),
            "FilesCrawled" => PostHook::FilesCrawled(CrawlExpectation::parse(value)?),
            _ => return Err(Error::unknown_hook(Phase::Post, name)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PostHook::ExpectedRetcode(_) => "ExpectedRetcode",
            PostHook::ExpectedFiles(_) => "ExpectedFiles",
            PostHook::FilesCrawled(_) => "FilesCrawled",
        }
    }
}

// === Pre-test phase ===

/// State the pre-test hooks act on
pub struct PreHookContext<'a> {
    pub workdir: &'a Path,
    pub servers: &'a mut ServerSet,
    pub templates: &'a TemplateContext,
}

/// Run the pre-test hooks in order, stopping at the first failure
pub async fn run_pre_hooks(hooks: &[PreHook], ctx: &mut PreHookContext<'_>) -> Result<()> {
    for hook in hooks {
        tracing::debug!(hook = hook.name(), "Running pre-test hook");
        match hook {
            PreHook::ServerFiles(per_server) => seed_server_files(per_server, ctx).await?,
            PreHook::LocalFiles(files) => write_local_files(files, ctx.workdir, ctx.templates)?,
            PreHook::ServerConf(settings) => ctx.servers.apply_settings(settings).await,
        }
    }
    Ok(())
}

async fn seed_server_files(per_server: &[Vec<ResourceFile>], ctx: &mut PreHookContext<'_>) -> Result<()> {
    for (index, files) in per_server.iter().enumerate() {
        let resolved = files
            .iter()
            .map(|file| resolve_content(file, ctx.templates))
            .collect::<Result<Vec<_>>>()?;
        ctx.servers.configure(index, resolved).await?;
    }
    Ok(())
}

fn write_local_files(files: &[ResourceFile], workdir: &Path, templates: &TemplateContext) -> Result<()> {
    for file in files {
        let relative = Path::new(&file.name);
        let is_contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_contained || file.name.is_empty() {
            return Err(Error::Config(format!(
                "Local file '{}' must be a relative path inside the test directory",
                file.name
            )));
        }

        let path = workdir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, templates.resolve(&file.content)?)?;

        if let Some(timestamp) = file.timestamp {
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64);
            fs::File::options().write(true).open(&path)?.set_modified(mtime)?;
        }
        tracing::debug!(file = %file.name, "Created local file");
    }
    Ok(())
}

fn resolve_content(file: &ResourceFile, templates: &TemplateContext) -> Result<ResourceFile> {
    Ok(ResourceFile {
        content: templates.resolve(&file.content)?,
        ..file.clone()
    })
}

// === Test-option phase ===

/// Client arguments collected from the test-option phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Base option string, placeholders resolved
    pub options: String,
    /// Requested paths, by server index
    pub urls: Vec<Vec<String>>,
}

/// Apply the test options in order, producing the invocation to run
pub fn apply_test_options(options: &[TestOption], templates: &TemplateContext) -> Result<Invocation> {
    let mut invocation = Invocation::default();
    for option in options {
        tracing::debug!(option = option.name(), "Applying test option");
        match option {
            TestOption::Commands(commands) => invocation.options = templates.resolve(commands)?,
            TestOption::Urls(urls) => invocation.urls = urls.clone(),
        }
    }
    Ok(invocation)
}

// === Post-test phase ===

/// Observations the post-test hooks verify against
pub struct PostHookContext<'a> {
    pub workdir: &'a Path,
    pub return_code: i32,
    pub harvest: &'a [ServerHarvest],
    pub templates: &'a TemplateContext,
}

/// Run the post-test hooks in order, stopping at the first failure
pub fn run_post_hooks(hooks: &[PostHook], ctx: &PostHookContext<'_>) -> Result<()> {
    for hook in hooks {
        tracing::debug!(hook = hook.name(), "Running post-test hook");
        match hook {
            PostHook::ExpectedRetcode(expected) => {
                verify::check_return_code(*expected, ctx.return_code)?
            }
            PostHook::ExpectedFiles(files) => {
                let expected = files
                    .iter()
                    .map(|file| resolve_content(file, ctx.templates))
                    .collect::<Result<Vec<_>>>()?;
                verify::check_files(&expected, verify::snapshot(ctx.workdir)?)?
            }
            PostHook::FilesCrawled(expectation) => {
                let expected: Vec<BTreeSet<String>> = match expectation {
                    CrawlExpectation::Declared => {
                        ctx.harvest.iter().map(|h| h.declared.clone()).collect()
                    }
                    CrawlExpectation::Explicit(lists) => lists
                        .iter()
                        .map(|names| names.iter().cloned().collect())
                        .collect(),
                };
                let observed: Vec<_> = ctx.harvest.iter().map(|h| h.observed.clone()).collect();
                verify::check_crawled(&expected, &observed)?
            }
        }
    }
    Ok(())
}
