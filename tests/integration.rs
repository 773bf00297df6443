//! End-to-end integration tests for the test engine
//!
//! These tests run whole test cases through the engine, with the
//! `mock_client` fixture binary standing in for the client under test:
//! 1. Start mock servers described by the test case
//! 2. Invoke the fixture client against them
//! 3. Verify exit code, downloaded files and crawled headers

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use testenv::common::config::ServerConfig;
use testenv::testing::{run_file, run_test_case, TestState};
use testenv::{RunSettings, TestCase, TestResult};

/// Test context with a scratch work directory
struct TestContext {
    work_dir: TempDir,
    settings: RunSettings,
}

impl TestContext {
    fn new() -> Self {
        let work_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let settings = RunSettings {
            client: PathBuf::from(env!("CARGO_BIN_EXE_mock_client")),
            work_dir: work_dir.path().to_path_buf(),
            server_wait: None,
            timeout: Duration::from_secs(60),
            keep_env: false,
            server: ServerConfig::default(),
        };
        Self { work_dir, settings }
    }

    async fn run(&self, yaml: &str) -> TestResult {
        let case = TestCase::from_yaml_str(yaml).expect("Test case should parse");
        run_test_case(&case, &self.settings).await
    }

    fn path(&self) -> &Path {
        self.work_dir.path()
    }

    /// Entries left behind in the work directory
    fn leftovers(&self) -> Vec<String> {
        fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn assert_passed(result: &TestResult) {
    assert!(
        result.passed,
        "Test '{}' failed after {}: {:?}",
        result.name, result.state, result.error
    );
    assert_eq!(result.state, TestState::CleanedUp);
}

#[tokio::test]
async fn test_single_download() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Single Download
servers: [HTTP]
pre_test:
  ServerFiles:
    - - {name: File1, content: "hello"}
test_options:
  Commands: "-d"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: File1, content: "hello"}
"#,
        )
        .await;

    assert_passed(&result);
    assert_eq!(result.return_code, Some(0));
    assert!(ctx.leftovers().is_empty());
}

#[tokio::test]
async fn test_forbidden_response_code() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Forbidden Retcode
pre_test:
  ServerFiles:
    - - name: File1
        content: "Forbidden file"
        rules: {Response: 403}
test_options:
  Urls: [[File1]]
post_test:
  ExpectedFiles: []
  ExpectedRetcode: 8
"#,
        )
        .await;

    assert_passed(&result);
    assert_eq!(result.return_code, Some(8));
}

const CONTENT_DISPOSITION: &str = r#"
name: Content Disposition
pre_test:
  ServerFiles:
    - - name: File1
        content: "Archive contents"
        rules:
          SendHeader: {Content-Disposition: "Attachment; filename=Arch"}
test_options:
  Commands: "{{options}}"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: Arch, content: "Archive contents"}
"#;

#[tokio::test]
async fn test_content_disposition_names_the_file() {
    let ctx = TestContext::new();
    let result = ctx
        .run(&CONTENT_DISPOSITION.replace("{{options}}", "--content-disposition"))
        .await;
    assert_passed(&result);
}

#[tokio::test]
async fn test_ignored_content_disposition_fails_verification() {
    let ctx = TestContext::new();
    let result = ctx.run(&CONTENT_DISPOSITION.replace("{{options}}", "-d")).await;

    assert!(!result.passed);
    assert!(result.verification_failure);
    assert_eq!(result.error_code, Some("MISSING_FILE"));
    assert!(result.error.as_deref().unwrap_or_default().contains("Arch"));
    assert!(ctx.leftovers().is_empty());
}

#[tokio::test]
async fn test_two_servers_and_local_file() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Two Servers
servers: [HTTP, HTTP]
pre_test:
  ServerFiles:
    - - {name: File1, content: "from the first server"}
    - - {name: File2, content: "from the second server"}
  LocalFiles:
    - {name: File3, content: "already here"}
test_options:
  Urls: [[File1], [File2]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: File1, content: "from the first server"}
    - {name: File2, content: "from the second server"}
    - {name: File3, content: "already here"}
"#,
        )
        .await;

    assert_passed(&result);
}

#[tokio::test]
async fn test_two_servers_missing_download_is_reported() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Two Servers Missing
servers: [HTTP, HTTP]
pre_test:
  ServerFiles:
    - - {name: File1, content: "one"}
    - - {name: File2, content: "two"}
test_options:
  Urls: [[File1], []]
post_test:
  ExpectedFiles:
    - {name: File1, content: "one"}
    - {name: File2, content: "two"}
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.error_code, Some("MISSING_FILE"));
}

const METADATA_ONLY: &str = r#"
name: Metadata Only
pre_test:
  ServerFiles:
    - - {name: File1, content: "body that must not be saved"}
test_options:
  Commands: "--method={{method}}"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles: []
"#;

#[tokio::test]
async fn test_head_request_writes_nothing() {
    let ctx = TestContext::new();
    let result = ctx.run(&METADATA_ONLY.replace("{{method}}", "HEAD")).await;
    assert_passed(&result);
}

#[tokio::test]
async fn test_body_transfer_is_unexpected() {
    let ctx = TestContext::new();
    let result = ctx.run(&METADATA_ONLY.replace("{{method}}", "GET")).await;

    assert!(!result.passed);
    assert_eq!(result.error_code, Some("UNEXPECTED_FILES"));
    assert_eq!(
        result.error.as_deref(),
        Some("Extra files downloaded: File1")
    );
}

#[tokio::test]
async fn test_authentication_and_crawled_headers() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Basic Auth
pre_test:
  ServerFiles:
    - - name: File1
        content: "cookie"
        rules:
          Authentication: {Type: Basic, User: Pacman, Pass: Omnomnom}
          ExpectHeader: {X-Check: "yes"}
test_options:
  Commands: "--user=Pacman --password=Omnomnom '--header=X-Check: yes'"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: File1, content: "cookie"}
  FilesCrawled: declared
"#,
        )
        .await;

    assert_passed(&result);
}

#[tokio::test]
async fn test_post_appends_to_resource() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Post Request
pre_test:
  ServerFiles:
    - - {name: File1, content: "Existing"}
test_options:
  Commands: "--method=post --body-data=TestMessage"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: File1, content: "Existing\nTestMessage"}
"#,
        )
        .await;

    assert_passed(&result);
}

#[tokio::test]
async fn test_body_data_without_method_is_a_client_error() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Post Without Method
pre_test:
  ServerFiles:
    - - {name: File1, content: "Existing"}
test_options:
  Commands: "--body-data=TestMessage"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.return_code, Some(1));
    assert_eq!(result.error_code, Some("RETURN_CODE_MISMATCH"));
}

#[tokio::test]
async fn test_https_download_without_certificate_check() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: HTTPS Download
servers: [HTTPS]
pre_test:
  ServerFiles:
    - - {name: File1, content: "over TLS on {{port}}"}
test_options:
  Commands: "--no-check-certificate"
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 0
  ExpectedFiles:
    - {name: File1, content: "over TLS on {{port}}"}
"#,
        )
        .await;

    assert_passed(&result);
}

#[tokio::test]
async fn test_https_self_signed_certificate_is_refused_by_default() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: HTTPS Verified
servers: [HTTPS]
pre_test:
  ServerFiles:
    - - {name: File1, content: "secret"}
test_options:
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 4
  ExpectedFiles: []
"#,
        )
        .await;

    assert_passed(&result);
}

/// Port of the first server, as written into the kept `port` file
fn kept_port(ctx: &TestContext, name: &str) -> u16 {
    let path = ctx.path().join(format!("{}-test", name)).join("port");
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
        .trim()
        .parse()
        .unwrap()
}

fn assert_port_closed(port: u16) {
    assert!(
        std::net::TcpStream::connect(("127.0.0.1", port)).is_err(),
        "Server on port {} is still accepting connections",
        port
    );
}

#[tokio::test]
async fn test_servers_stop_after_pre_hook_failure() {
    let mut ctx = TestContext::new();
    ctx.settings.keep_env = true;
    let result = ctx
        .run(
            r#"
name: Pre Failure
pre_test:
  LocalFiles:
    - {name: port, content: "{{port}}"}
  ServerFiles:
    - - {name: File1, content: "{{nothing}}"}
test_options:
  Urls: [[File1]]
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.state, TestState::ServersStarted);
    assert_eq!(result.return_code, None);
    assert_port_closed(kept_port(&ctx, "Pre Failure"));
}

#[tokio::test]
async fn test_servers_stop_after_test_option_failure() {
    let mut ctx = TestContext::new();
    ctx.settings.keep_env = true;
    let result = ctx
        .run(
            r#"
name: Option Failure
pre_test:
  LocalFiles:
    - {name: port, content: "{{port}}"}
test_options:
  Commands: "--header=X-Thing:{{nothing}}"
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.state, TestState::PreHooksDone);
    assert_port_closed(kept_port(&ctx, "Option Failure"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_servers_stop_after_invocation_timeout() {
    let mut ctx = TestContext::new();
    ctx.settings.keep_env = true;
    ctx.settings.client = PathBuf::from("sleep");
    ctx.settings.timeout = Duration::from_millis(300);
    let result = ctx
        .run(
            r#"
name: Timeout Failure
pre_test:
  LocalFiles:
    - {name: port, content: "{{port}}"}
test_options:
  Commands: "10"
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.error_code, Some("INVOCATION_TIMEOUT"));
    assert_eq!(result.state, TestState::PreHooksDone);
    assert_port_closed(kept_port(&ctx, "Timeout Failure"));
}

#[tokio::test]
async fn test_placeholders_reach_file_content() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Placeholders
pre_test:
  ServerFiles:
    - - {name: File1, content: "served on {{port}}"}
test_options:
  Urls: [[File1]]
post_test:
  ExpectedFiles:
    - {name: File1, content: "served on {{port0}}"}
"#,
        )
        .await;

    assert_passed(&result);
}

#[tokio::test]
async fn test_failure_tears_everything_down() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Wrong Expectation
pre_test:
  ServerFiles:
    - - {name: File1}
test_options:
  Urls: [[File1]]
post_test:
  ExpectedRetcode: 4
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.error_code, Some("RETURN_CODE_MISMATCH"));
    assert_eq!(result.state, TestState::ServersStopped);
    assert!(ctx.leftovers().is_empty());
}

#[tokio::test]
async fn test_unresolved_placeholder_fails_before_invocation() {
    let ctx = TestContext::new();
    let result = ctx
        .run(
            r#"
name: Bad Placeholder
test_options:
  Commands: "--header=X-Thing:{{nothing}}"
"#,
        )
        .await;

    assert!(!result.passed);
    assert_eq!(result.state, TestState::PreHooksDone);
    assert_eq!(result.return_code, None);
    assert!(ctx.leftovers().is_empty());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let ctx = TestContext::new();
    let yaml = r#"
name: Rerun
pre_test:
  ServerFiles:
    - - {name: File1, content: "again"}
test_options:
  Urls: [[File1]]
post_test:
  ExpectedFiles:
    - {name: File1, content: "again"}
"#;

    let first = ctx.run(yaml).await;
    let second = ctx.run(yaml).await;
    assert_passed(&first);
    assert_passed(&second);
    assert_eq!(first.return_code, second.return_code);
}

#[tokio::test]
async fn test_keep_env_preserves_directory() {
    let mut ctx = TestContext::new();
    ctx.settings.keep_env = true;
    let result = ctx
        .run(
            r#"
name: Kept
pre_test:
  ServerFiles:
    - - {name: File1, content: "kept"}
test_options:
  Urls: [[File1]]
"#,
        )
        .await;

    assert_passed(&result);
    let kept = ctx.path().join("Kept-test").join("File1");
    assert_eq!(fs::read_to_string(kept).unwrap(), "kept");
}

#[test]
fn test_bundled_test_cases_parse() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("testcases");
    let mut count = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        TestCase::load(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        count += 1;
    }
    assert!(count > 0);
}

#[tokio::test]
async fn test_run_file_with_unknown_hook() {
    let ctx = TestContext::new();
    let path = ctx.path().join("unknown.yaml");
    fs::write(&path, "name: Unknown\ntest_options:\n  Commandz: \"-d\"\n").unwrap();

    let result = run_file(&path, &ctx.settings).await;
    assert!(!result.passed);
    assert_eq!(
        result.error.as_deref(),
        Some("Test Option function 'Commandz' not defined")
    );
}
