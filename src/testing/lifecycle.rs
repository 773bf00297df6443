//! Server lifecycle coordination
//!
//! A [`ServerSet`] owns every mock server of one test case. It is stopped
//! exactly once through [`ServerSet::stop`], which also harvests what each
//! server observed; if the set is dropped without being stopped (a panic or
//! an early return), the servers are aborted instead.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::common::config::ServerConfig;
use crate::common::{Error, Result};
use crate::server::{self, MockServer};

use super::model::{ResourceFile, ServerKind, ServerSettings};
use super::template::TemplateContext;

/// What one server saw, captured right before it was stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHarvest {
    /// Header names declared by the server's `ExpectHeader` rules
    pub declared: BTreeSet<String>,
    /// Header names the server recorded while serving requests
    pub observed: BTreeSet<String>,
}

struct ServerHandle {
    server: Box<dyn MockServer>,
    declared: BTreeSet<String>,
}

/// The running servers of one test case, in declaration order
pub struct ServerSet {
    servers: Vec<ServerHandle>,
    stopped: bool,
}

impl ServerSet {
    /// Start one server per kind, in order
    ///
    /// If any server fails to start, the ones already running are torn down
    /// before the error is returned.
    pub async fn start(kinds: &[ServerKind], config: &ServerConfig) -> Result<Self> {
        let mut set = Self {
            servers: Vec::with_capacity(kinds.len()),
            stopped: false,
        };

        for kind in kinds {
            // On error `set` is dropped here, aborting what was started
            let server = server::start(*kind, config).await?;
            set.servers.push(ServerHandle {
                server,
                declared: BTreeSet::new(),
            });
        }

        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Scheme and `host:port/` prefix of every server
    pub fn domain_index(&self) -> DomainIndex {
        DomainIndex {
            entries: self
                .servers
                .iter()
                .map(|handle| (handle.server.kind(), domain_of(handle.server.address())))
                .collect(),
        }
    }

    /// Run-time values test cases can refer to as placeholders
    pub fn template_context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for (index, handle) in self.servers.iter().enumerate() {
            let address = handle.server.address();
            if index == 0 {
                ctx.bind("host", address.ip());
                ctx.bind("port", address.port());
            }
            ctx.bind(format!("port{}", index), address.port());
            ctx.bind(format!("domain{}", index), domain_of(address));
        }
        ctx
    }

    /// Host `files` on the server at `index`
    pub async fn configure(&mut self, index: usize, files: Vec<ResourceFile>) -> Result<()> {
        let count = self.servers.len();
        let handle = self.servers.get_mut(index).ok_or_else(|| {
            Error::Config(format!("No server at index {} ({} running)", index, count))
        })?;

        handle.declared = files
            .iter()
            .flat_map(|file| file.rules.expected_header_names().cloned())
            .collect();
        tracing::debug!(server = index, files = files.len(), "Configuring server");
        handle.server.configure(files).await;
        Ok(())
    }

    /// Apply the same settings to every server
    pub async fn apply_settings(&self, settings: &ServerSettings) {
        for handle in &self.servers {
            handle.server.apply_settings(settings).await;
        }
    }

    /// Harvest every server's observations, then stop them all
    ///
    /// A server that fails to stop cleanly is aborted; stopping never fails
    /// the test on its own.
    pub async fn stop(mut self) -> Vec<ServerHarvest> {
        let mut harvest = Vec::with_capacity(self.servers.len());

        for (index, handle) in self.servers.iter_mut().enumerate() {
            harvest.push(ServerHarvest {
                declared: handle.declared.clone(),
                observed: handle.server.observed_request_headers().await,
            });
            if let Err(e) = handle.server.stop().await {
                tracing::warn!(server = index, "Server did not stop cleanly: {}", e);
                handle.server.abort();
            }
        }

        self.stopped = true;
        harvest
    }
}

impl Drop for ServerSet {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        for handle in &self.servers {
            handle.server.abort();
        }
    }
}

/// `host:port/`, with IPv6 hosts bracketed
fn domain_of(address: SocketAddr) -> String {
    format!("{}/", address)
}

/// URL prefixes of the running servers, by index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainIndex {
    entries: Vec<(ServerKind, String)>,
}

impl DomainIndex {
    pub fn new(entries: Vec<(ServerKind, String)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full URL of `path` on the server at `index`
    pub fn url(&self, index: usize, path: &str) -> Option<String> {
        self.entries
            .get(index)
            .map(|(kind, domain)| format!("{}{}{}", kind.scheme(), domain, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RuleSpec;
    use indexmap::IndexMap;

    #[tokio::test]
    async fn test_start_publishes_ports_and_domains() {
        let set = ServerSet::start(&[ServerKind::Http, ServerKind::Http], &ServerConfig::default())
            .await
            .unwrap();
        assert_eq!(set.len(), 2);

        let ctx = set.template_context();
        let port0 = ctx.get("port0").unwrap().to_string();
        assert_eq!(ctx.get("port"), Some(port0.as_str()));
        assert_eq!(ctx.get("host"), Some("127.0.0.1"));
        assert_ne!(ctx.get("port1"), Some(port0.as_str()));
        assert_eq!(
            ctx.get("domain0").map(str::to_string),
            Some(format!("127.0.0.1:{}/", port0))
        );

        let domains = set.domain_index();
        assert_eq!(
            domains.url(0, "File1"),
            Some(format!("http://127.0.0.1:{}/File1", port0))
        );
        assert_eq!(domains.url(2, "File1"), None);

        let harvest = set.stop().await;
        assert_eq!(harvest.len(), 2);
    }

    #[tokio::test]
    async fn test_configure_records_declared_headers() {
        let mut set = ServerSet::start(&[ServerKind::Http], &ServerConfig::default())
            .await
            .unwrap();

        let mut expected = IndexMap::new();
        expected.insert("Range".to_string(), "bytes=5-".to_string());
        let file = ResourceFile::new("File1", "x").with_rule(RuleSpec::ExpectHeader(expected));
        set.configure(0, vec![file]).await.unwrap();

        assert!(matches!(
            set.configure(1, vec![]).await,
            Err(Error::Config(_))
        ));

        let harvest = set.stop().await;
        assert_eq!(harvest[0].declared, BTreeSet::from(["Range".to_string()]));
        assert!(harvest[0].observed.is_empty());
    }

    #[tokio::test]
    async fn test_ipv6_domains_are_bracketed() {
        let config = ServerConfig {
            bind: "::1".to_string(),
            ..ServerConfig::default()
        };
        // Hosts without IPv6 loopback cannot run this
        let Ok(set) = ServerSet::start(&[ServerKind::Http], &config).await else {
            return;
        };

        let ctx = set.template_context();
        let port = ctx.get("port0").unwrap().to_string();
        assert_eq!(
            ctx.get("domain0").map(str::to_string),
            Some(format!("[::1]:{}/", port))
        );
        assert_eq!(
            set.domain_index().url(0, "File1"),
            Some(format!("http://[::1]:{}/File1", port))
        );
        set.stop().await;
    }

    #[test]
    fn test_domain_of_formats_both_families() {
        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(domain_of(v4), "127.0.0.1:8080/");
        assert_eq!(domain_of(v6), "[::1]:8080/");
    }

    #[test]
    fn test_domain_index_uses_server_scheme() {
        let domains = DomainIndex::new(vec![
            (ServerKind::Http, "127.0.0.1:1/".to_string()),
            (ServerKind::Https, "127.0.0.1:2/".to_string()),
        ]);
        assert_eq!(domains.url(0, "a").unwrap(), "http://127.0.0.1:1/a");
        assert_eq!(domains.url(1, "b").unwrap(), "https://127.0.0.1:2/b");
    }
}
