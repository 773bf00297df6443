//! Mock servers the client under test talks to
//!
//! The runner only relies on the [`MockServer`] trait: start, configure with
//! files and rules, read back the headers that were observed, stop. The
//! bundled implementation serves HTTP/1.1 through hyper on the tokio
//! runtime, optionally behind TLS.

mod http;
mod request;
mod rules;
mod tls;

use std::collections::BTreeSet;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::common::config::ServerConfig;
use crate::common::Result;
use crate::testing::{ResourceFile, ServerKind, ServerSettings};

pub use http::HttpServer;
pub use request::{Request, Response};

/// A running mock server
#[async_trait]
pub trait MockServer: Send + Sync {
    /// Kind of server, which decides the URL scheme
    fn kind(&self) -> ServerKind;

    /// Address the server is listening on
    fn address(&self) -> SocketAddr;

    /// Replace the hosted files and their rules
    async fn configure(&self, files: Vec<ResourceFile>);

    /// Apply server-wide settings
    async fn apply_settings(&self, settings: &ServerSettings);

    /// Names of the rule headers observed in requests so far
    async fn observed_request_headers(&self) -> BTreeSet<String>;

    /// Stop accepting connections and wait for the server to wind down
    async fn stop(&mut self) -> Result<()>;

    /// Tear the server down without waiting
    fn abort(&self);
}

/// Start a server of the given kind on an ephemeral port
pub async fn start(kind: ServerKind, config: &ServerConfig) -> Result<Box<dyn MockServer>> {
    let server = HttpServer::start(kind, config).await?;
    tracing::debug!(%kind, address = %server.address(), "Mock server started");
    Ok(Box::new(server))
}
