//! Test case data model
//!
//! Defines the data structures for deserializing YAML test cases. The three
//! hook phases are read as ordered mappings and then validated against the
//! closed capability sets in [`super::hooks`].

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

use super::hooks::{Phase, PostHook, PreHook, TestOption};

/// Kind of mock server hosting a test's resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerKind {
    /// Plaintext HTTP
    #[serde(rename = "HTTP", alias = "http")]
    Http,
    /// TLS-terminated HTTP
    #[serde(rename = "HTTPS", alias = "https")]
    Https,
}

impl ServerKind {
    /// URL scheme prefix used when building request URLs
    pub fn scheme(&self) -> &'static str {
        match self {
            ServerKind::Http => "http://",
            ServerKind::Https => "https://",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Http => write!(f, "HTTP"),
            ServerKind::Https => write!(f, "HTTPS"),
        }
    }
}

/// A file hosted by a server, seeded locally, or expected on disk
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceFile {
    /// Relative path, as served and as expected on disk
    pub name: String,
    /// Text payload
    #[serde(default = "default_content")]
    pub content: String,
    /// Modification time in seconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Rules forwarded to the server owning this resource
    #[serde(default)]
    pub rules: RuleSet,
}

fn default_content() -> String {
    "Test Contents".to_string()
}

impl ResourceFile {
    /// Create a resource with no rules
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            timestamp: None,
            rules: RuleSet::default(),
        }
    }

    /// Attach a rule (builder style, used by tests)
    pub fn with_rule(mut self, rule: RuleSpec) -> Self {
        self.rules.0.push(rule);
        self
    }
}

/// Supported authentication schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    Basic,
}

/// Credentials required by an `Authentication` rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "Type", alias = "type")]
    pub scheme: AuthScheme,
    #[serde(rename = "User", alias = "user")]
    pub user: String,
    #[serde(rename = "Pass", alias = "pass")]
    pub pass: String,
}

/// A declarative expectation or forced behavior attached to one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSpec {
    /// Require credentials before serving
    Authentication(Credentials),
    /// Request headers that must be present with the given values
    ExpectHeader(IndexMap<String, String>),
    /// Request headers that must not be sent with the given values
    RejectHeader(IndexMap<String, String>),
    /// Force the response status code
    Response(u16),
    /// Extra headers attached to the response
    SendHeader(IndexMap<String, String>),
}

impl RuleSpec {
    /// Name of the rule kind, as written in test cases
    pub fn kind(&self) -> &'static str {
        match self {
            RuleSpec::Authentication(_) => "Authentication",
            RuleSpec::ExpectHeader(_) => "ExpectHeader",
            RuleSpec::RejectHeader(_) => "RejectHeader",
            RuleSpec::Response(_) => "Response",
            RuleSpec::SendHeader(_) => "SendHeader",
        }
    }
}

/// Ordered rules of one resource, at most one per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet(pub Vec<RuleSpec>);

impl RuleSet {
    pub fn iter(&self) -> impl Iterator<Item = &RuleSpec> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Header names the client is expected to send for this resource
    pub fn expected_header_names(&self) -> impl Iterator<Item = &String> {
        self.0
            .iter()
            .filter_map(|rule| match rule {
                RuleSpec::ExpectHeader(headers) => Some(headers.keys()),
                _ => None,
            })
            .flatten()
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Entries(entries) = Entries::deserialize(deserializer)?;
        let mut rules = Vec::with_capacity(entries.len());

        for (kind, payload) in entries {
            let rule = match kind.as_str() {
                "Authentication" => serde_yaml::from_value(payload).map(RuleSpec::Authentication),
                "ExpectHeader" => serde_yaml::from_value(payload).map(RuleSpec::ExpectHeader),
                "RejectHeader" => serde_yaml::from_value(payload).map(RuleSpec::RejectHeader),
                "Response" => serde_yaml::from_value(payload).map(RuleSpec::Response),
                "SendHeader" => serde_yaml::from_value(payload).map(RuleSpec::SendHeader),
                other => return Err(de::Error::custom(format!("unknown rule '{}'", other))),
            }
            .map_err(|e| de::Error::custom(format!("rule '{}': {}", kind, e)))?;
            rules.push(rule);
        }

        Ok(RuleSet(rules))
    }
}

/// Mapping entries in document order
///
/// Unlike a map type, a repeated key is an error instead of silently
/// replacing the earlier entry.
#[derive(Debug, Default)]
struct Entries(Vec<(String, serde_yaml::Value)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> de::Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Entries, E> {
                Ok(Entries::default())
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Entries, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries: Vec<(String, serde_yaml::Value)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, serde_yaml::Value>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Settings applied to every server by the `ServerConf` pre-hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Headers attached to every response
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Value of the `Server` response header
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Test case as written on disk, before hook validation
#[derive(Deserialize, Debug)]
struct RawTestCase {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_servers")]
    servers: Vec<ServerKind>,
    #[serde(default, alias = "pre_hook")]
    pre_test: Entries,
    #[serde(default, alias = "test_params")]
    test_options: Entries,
    #[serde(default, alias = "post_hook")]
    post_test: Entries,
}

fn default_servers() -> Vec<ServerKind> {
    vec![ServerKind::Http]
}

/// A validated, immutable test case
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Name of the test; also names its working directory
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// One server is started per entry, in order
    pub servers: Vec<ServerKind>,
    /// Pre-test hooks, in declaration order
    pub pre_hooks: Vec<PreHook>,
    /// Test options, in declaration order
    pub test_options: Vec<TestOption>,
    /// Post-test hooks, in declaration order
    pub post_hooks: Vec<PostHook>,
}

impl TestCase {
    /// Parse and validate a test case from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawTestCase = serde_yaml::from_str(content)?;
        Self::from_raw(raw)
    }

    /// Load a test case from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            Error::Yaml(e) => Error::test_case_parse(&path.display().to_string(), e),
            other => other,
        })
    }

    fn from_raw(raw: RawTestCase) -> Result<Self> {
        if raw.name.trim().is_empty() {
            return Err(Error::test_case_parse(&raw.name, "name must not be empty"));
        }
        if raw.name.contains(['/', '\\']) {
            return Err(Error::test_case_parse(
                &raw.name,
                "name must not contain path separators",
            ));
        }
        if raw.servers.is_empty() {
            return Err(Error::test_case_parse(&raw.name, "at least one server is required"));
        }

        let pre_hooks = parse_phase(&raw.name, Phase::Pre, raw.pre_test, PreHook::parse)?;
        let test_options =
            parse_phase(&raw.name, Phase::Test, raw.test_options, TestOption::parse)?;
        let post_hooks = parse_phase(&raw.name, Phase::Post, raw.post_test, PostHook::parse)?;

        let case = TestCase {
            name: raw.name,
            description: raw.description,
            servers: raw.servers,
            pre_hooks,
            test_options,
            post_hooks,
        };
        case.check_server_arity()?;
        Ok(case)
    }

    /// Per-server payloads must line up with the server list
    fn check_server_arity(&self) -> Result<()> {
        let servers = self.servers.len();
        let check = |what: &str, len: usize| {
            if len != servers {
                Err(Error::test_case_parse(
                    &self.name,
                    format!("{} has {} entries but {} servers are declared", what, len, servers),
                ))
            } else {
                Ok(())
            }
        };

        for hook in &self.pre_hooks {
            if let PreHook::ServerFiles(files) = hook {
                check("ServerFiles", files.len())?;
            }
        }
        for option in &self.test_options {
            if let TestOption::Urls(urls) = option {
                check("Urls", urls.len())?;
            }
        }
        for hook in &self.post_hooks {
            if let PostHook::FilesCrawled(super::hooks::CrawlExpectation::Explicit(lists)) = hook {
                check("FilesCrawled", lists.len())?;
            }
        }
        Ok(())
    }
}

fn parse_phase<T, F>(
    case: &str,
    phase: Phase,
    Entries(entries): Entries,
    parse: F,
) -> Result<Vec<T>>
where
    F: Fn(&str, serde_yaml::Value) -> Result<T>,
{
    entries
        .into_iter()
        .map(|(name, value)| {
            parse(&name, value).map_err(|e| match e {
                Error::Yaml(e) => {
                    Error::test_case_parse(case, format!("{} '{}': {}", phase, name, e))
                }
                other => other,
            })
        })
        .collect()
}
