//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Environment variable that keeps the per-test working directory around
pub const ENV_NO_CLEANUP: &str = "NO_CLEANUP";

/// Environment variable holding the pre-invocation delay, in seconds
pub const ENV_SERVER_WAIT: &str = "SERVER_WAIT";

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Client under test
    #[serde(default)]
    pub client: ClientConfig,

    /// Per-run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Mock server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration for the client executable under test
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Path to the executable, or a bare name looked up in PATH
    #[serde(default = "default_client")]
    pub path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path: default_client(),
        }
    }
}

fn default_client() -> PathBuf {
    PathBuf::from("wget")
}

/// Settings applied to every test case in a run
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Directory in which per-test working directories are created
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Delay before invoking the client, to let servers settle
    #[serde(default)]
    pub server_wait_secs: f64,

    /// Upper bound on a single client invocation
    #[serde(default = "default_invocation_timeout")]
    pub invocation_timeout_secs: u64,

    /// Keep working directories after the run (debugging aid)
    #[serde(default)]
    pub keep_env: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            server_wait_secs: 0.0,
            invocation_timeout_secs: default_invocation_timeout(),
            keep_env: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_invocation_timeout() -> u64 {
    300
}

/// Mock server settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the mock servers bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Realm announced in authentication challenges
    #[serde(default = "default_realm")]
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            realm: default_realm(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_realm() -> String {
    "Wget-Test".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.server_wait()?;
        Ok(config)
    }

    /// Apply the environment-level controls on top of the file settings
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Like [`Config::apply_env`], reading variables through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_NO_CLEANUP).is_some() {
            self.run.keep_env = true;
        }

        if let Some(wait) = lookup(ENV_SERVER_WAIT) {
            self.run.server_wait_secs = wait.trim().parse().map_err(|_| {
                super::Error::Config(format!("Invalid {} value: '{}'", ENV_SERVER_WAIT, wait))
            })?;
            self.server_wait()?;
        }

        Ok(())
    }

    /// Pre-invocation delay, if any
    ///
    /// Zero or negative waits mean no delay; NaN, infinite and
    /// unrepresentable values are configuration errors.
    pub fn server_wait(&self) -> Result<Option<Duration>> {
        let secs = self.run.server_wait_secs;
        if !secs.is_finite() {
            return Err(super::Error::Config(format!(
                "server_wait_secs must be a finite number, got {}",
                secs
            )));
        }
        if secs <= 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(secs).map(Some).map_err(|e| {
            super::Error::Config(format!("Invalid server_wait_secs {}: {}", secs, e))
        })
    }
}
