//! Building and running the client command line

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::common::paths::resolve_client;
use crate::common::{Error, Result};

use super::lifecycle::DomainIndex;

/// Split an option string into arguments with POSIX quoting rules
///
/// Single quotes are literal. Inside double quotes a backslash escapes only
/// `"` and `\`; before any other character it is kept as is. Outside quotes
/// a backslash escapes the next character. `$`, `` ` `` and `#` carry no
/// meaning and no expansion of any kind is performed.
pub fn split_options(input: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated(input, "single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated(input, "double quote")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated(input, "double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(unterminated(input, "escape")),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        args.push(current);
    }
    Ok(args)
}

fn unterminated(input: &str, what: &str) -> Error {
    Error::Config(format!("Unterminated {} in options: {}", what, input))
}

/// Full argument vector: options first, then URLs index-major, path-minor
pub fn build_argv(options: &str, urls: &[Vec<String>], domains: &DomainIndex) -> Result<Vec<String>> {
    let mut argv = split_options(options)?;

    for (index, paths) in urls.iter().enumerate() {
        for path in paths {
            let url = domains.url(index, path).ok_or_else(|| {
                Error::Config(format!(
                    "URL '{}' targets server {} but only {} are running",
                    path,
                    index,
                    domains.len()
                ))
            })?;
            argv.push(url);
        }
    }

    Ok(argv)
}

/// Runs the client under test
#[derive(Debug, Clone)]
pub struct Invoker {
    pub client: PathBuf,
    /// Delay before spawning, to let servers settle
    pub server_wait: Option<Duration>,
    pub timeout: Duration,
}

impl Invoker {
    /// Run the client in `workdir` and return its exit code
    ///
    /// A client killed by a signal is reported as `-1`.
    pub async fn invoke(&self, argv: &[String], workdir: &Path) -> Result<i32> {
        let program = resolve_client(&self.client)?;

        if let Some(wait) = self.server_wait {
            tracing::debug!(?wait, "Waiting for servers to settle");
            tokio::time::sleep(wait).await;
        }

        tracing::info!("Invoking {} {}", program.display(), argv.join(" "));

        let mut child = Command::new(&program)
            .args(argv)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Execution(format!("Failed to start {}: {}", program.display(), e))
            })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Client timed out, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill client: {}", e);
                }
                return Err(Error::InvocationTimeout(self.timeout.as_secs()));
            }
        };

        Ok(match status.code() {
            Some(code) => code,
            None => {
                tracing::warn!(%status, "Client was terminated by a signal");
                -1
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ServerKind;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_options_quoting() {
        assert_eq!(split_options("").unwrap(), Vec::<String>::new());
        assert_eq!(split_options("  -d   -q ").unwrap(), strings(&["-d", "-q"]));
        assert_eq!(
            split_options(r#"--header="X-Name: a b" --user='Pac man' a\ b"#).unwrap(),
            strings(&["--header=X-Name: a b", "--user=Pac man", "a b"])
        );
        assert_eq!(
            split_options(r#""say \"hi\"" '' x"#).unwrap(),
            strings(&["say \"hi\"", "", "x"])
        );
    }

    #[test]
    fn test_split_options_double_quote_escapes() {
        assert_eq!(
            split_options(r#""cost \$5" "tick \`x\`" "back\\slash""#).unwrap(),
            strings(&[r"cost \$5", r"tick \`x\`", r"back\slash"])
        );
        assert_eq!(
            split_options(r"\$HOME #not-a-comment").unwrap(),
            strings(&["$HOME", "#not-a-comment"])
        );
    }

    #[test]
    fn test_split_options_unterminated() {
        assert!(matches!(split_options("'oops"), Err(Error::Config(_))));
        assert!(matches!(split_options("\"oops"), Err(Error::Config(_))));
        assert!(matches!(split_options("oops\\"), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_argv_order_is_index_major() {
        let domains = DomainIndex::new(vec![
            (ServerKind::Http, "127.0.0.1:1/".to_string()),
            (ServerKind::Https, "127.0.0.1:2/".to_string()),
        ]);
        let urls = vec![strings(&["a", "b"]), strings(&["c"])];
        let argv = build_argv("-d --no-check-certificate", &urls, &domains).unwrap();
        assert_eq!(
            argv,
            strings(&[
                "-d",
                "--no-check-certificate",
                "http://127.0.0.1:1/a",
                "http://127.0.0.1:1/b",
                "https://127.0.0.1:2/c",
            ])
        );
    }

    #[test]
    fn test_build_argv_rejects_unknown_server() {
        let domains = DomainIndex::new(vec![(ServerKind::Http, "127.0.0.1:1/".to_string())]);
        let urls = vec![vec![], strings(&["x"])];
        assert!(matches!(build_argv("", &urls, &domains), Err(Error::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_reports_exit_code_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = Invoker {
            client: PathBuf::from("sh"),
            server_wait: None,
            timeout: Duration::from_secs(30),
        };
        let code = invoker
            .invoke(&strings(&["-c", "echo hi > out; exit 3"]), dir.path())
            .await
            .unwrap();
        assert_eq!(code, 3);
        assert_eq!(std::fs::read_to_string(dir.path().join("out")).unwrap(), "hi\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = Invoker {
            client: PathBuf::from("sleep"),
            server_wait: None,
            timeout: Duration::from_millis(200),
        };
        let err = invoker.invoke(&strings(&["10"]), dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvocationTimeout(_)));
    }

    #[tokio::test]
    async fn test_invoke_missing_client() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = Invoker {
            client: PathBuf::from("definitely-not-a-real-client-binary"),
            server_wait: None,
            timeout: Duration::from_secs(1),
        };
        let err = invoker.invoke(&[], dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
