//! HTTP/1.1 mock server, hyper on the tokio runtime

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::common::config::ServerConfig;
use crate::common::{Error, Result};
use crate::testing::{ResourceFile, ServerKind, ServerSettings};

use super::request::Request;
use super::rules::ServerState;
use super::tls;
use super::MockServer;

type SharedState = Arc<Mutex<ServerState>>;

/// Mock HTTP server, plaintext or TLS-terminated
pub struct HttpServer {
    kind: ServerKind,
    address: SocketAddr,
    state: SharedState,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Bind an ephemeral port and start serving in the background
    pub async fn start(kind: ServerKind, config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.bind.as_str(), 0))
            .await
            .map_err(|e| Error::Server(format!("Failed to bind {}: {}", config.bind, e)))?;
        let address = listener.local_addr()?;

        let acceptor = match kind {
            ServerKind::Https => Some(tls::self_signed_acceptor()?),
            ServerKind::Http => None,
        };

        let state = Arc::new(Mutex::new(ServerState::new(&config.realm)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, acceptor, state.clone(), shutdown_rx));

        Ok(Self {
            kind,
            address,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

#[async_trait]
impl MockServer for HttpServer {
    fn kind(&self) -> ServerKind {
        self.kind
    }

    fn address(&self) -> SocketAddr {
        self.address
    }

    async fn configure(&self, files: Vec<ResourceFile>) {
        self.state.lock().await.configure(files);
    }

    async fn apply_settings(&self, settings: &ServerSettings) {
        self.state.lock().await.apply_settings(settings);
    }

    async fn observed_request_headers(&self) -> BTreeSet<String> {
        self.state.lock().await.observed()
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Server(format!("Server task failed: {}", e)))?;
        }
        tracing::debug!(address = %self.address, "Mock server stopped");
        Ok(())
    }

    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    state: SharedState,
    mut shutdown: oneshot::Receiver<()>,
) {
    // Dropping the set at the end aborts any connection still open
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, "Accepted connection");
                    connections.spawn(handle_stream(stream, acceptor.clone(), state.clone()));
                }
                Err(e) => tracing::warn!("Accept error: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn handle_stream(stream: TcpStream, acceptor: Option<TlsAcceptor>, state: SharedState) {
    let result = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve_connection(tls, state).await,
            Err(e) => {
                tracing::debug!("TLS handshake failed: {}", e);
                return;
            }
        },
        None => serve_connection(stream, state).await,
    };

    if let Err(e) = result {
        tracing::debug!("Connection ended with error: {}", e);
    }
}

/// Serve HTTP/1.1 on one connection until the peer or the protocol closes it
async fn serve_connection<S>(stream: S, state: SharedState) -> hyper::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let state = state.clone();
        async move { respond(request, &state).await }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
}

async fn respond(
    request: hyper::Request<Incoming>,
    state: &SharedState,
) -> hyper::Result<hyper::Response<Full<Bytes>>> {
    let request = Request::from_hyper(request).await?;
    let response = state.lock().await.handle(&request);
    tracing::debug!(
        method = %request.method,
        target = %request.target,
        status = response.status,
        "Served request"
    );
    Ok(response.into_hyper())
}
