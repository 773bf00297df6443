//! Configuration and executable paths

use std::path::{Path, PathBuf};

use super::{Error, Result};

/// Name used for the configuration directory
const APP_NAME: &str = "client-testenv";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/client-testenv/`
/// - macOS: `~/Library/Application Support/client-testenv/`
/// - Windows: `%APPDATA%\client-testenv\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Resolve the client executable to an absolute path
///
/// Anything containing a path separator is taken relative to the current
/// directory; a bare name is searched for in PATH.
pub fn resolve_client(client: &Path) -> Result<PathBuf> {
    let is_bare_name = client.components().count() == 1 && !client.is_absolute();

    if is_bare_name {
        return which::which(client).map_err(|_| {
            Error::Execution(format!(
                "'{}' was not found in PATH",
                client.display()
            ))
        });
    }

    let absolute = if client.is_relative() {
        std::env::current_dir()?.join(client)
    } else {
        client.to_path_buf()
    };

    if !absolute.is_file() {
        return Err(Error::Execution(format!(
            "The client executable does not exist at {}",
            absolute.display()
        )));
    }

    Ok(absolute)
}
