//! Verification of the client's observable behavior
//!
//! All checks are exact: the working directory must hold precisely the
//! expected files, and each server must have observed precisely the expected
//! header names.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use similar::TextDiff;
use walkdir::WalkDir;

use crate::common::{Error, Result};

use super::model::ResourceFile;

/// Relative path (always `/`-separated) to file content
pub type Snapshot = BTreeMap<String, Vec<u8>>;

/// Capture every regular file below `dir`
pub fn snapshot(dir: &Path) -> Result<Snapshot> {
    let mut files = Snapshot::new();

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Internal(format!("Walked outside of {}: {}", dir.display(), e)))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.insert(key, std::fs::read(entry.path())?);
    }

    Ok(files)
}

/// The client must exit with exactly the expected status
pub fn check_return_code(expected: i32, actual: i32) -> Result<()> {
    if expected != actual {
        return Err(Error::ReturnCodeMismatch { expected, actual });
    }
    Ok(())
}

/// The snapshot must equal the expected files as a set of (path, content)
///
/// Expected entries are checked in order, so the first missing or differing
/// file is the one reported. Whatever remains afterwards is unexpected.
pub fn check_files(expected: &[ResourceFile], mut snapshot: Snapshot) -> Result<()> {
    for file in expected {
        let Some(actual) = snapshot.remove(&file.name) else {
            return Err(Error::MissingFile(file.name.clone()));
        };

        if actual != file.content.as_bytes() {
            let actual = String::from_utf8_lossy(&actual);
            return Err(Error::ContentMismatch {
                path: file.name.clone(),
                diff: render_diff(&actual, &file.content),
            });
        }
    }

    if !snapshot.is_empty() {
        return Err(Error::UnexpectedFiles(snapshot.into_keys().collect()));
    }

    Ok(())
}

/// Each server's observed headers must equal its expected headers
pub fn check_crawled(expected: &[BTreeSet<String>], observed: &[BTreeSet<String>]) -> Result<()> {
    if expected.len() != observed.len() {
        return Err(Error::Config(format!(
            "FilesCrawled lists {} servers but {} are running",
            expected.len(),
            observed.len()
        )));
    }

    for (server, (expected, observed)) in expected.iter().zip(observed).enumerate() {
        let diff: Vec<String> = expected.symmetric_difference(observed).cloned().collect();
        if !diff.is_empty() {
            tracing::debug!(server, ?expected, ?observed, "Crawled header sets differ");
            return Err(Error::CrawlMismatch { server, diff });
        }
    }

    Ok(())
}

/// Line-based unified diff from the actual content to the expected content
pub fn render_diff(actual: &str, expected: &str) -> String {
    TextDiff::from_lines(actual, expected)
        .unified_diff()
        .context_radius(3)
        .header("Actual", "Expected")
        .to_string()
}
