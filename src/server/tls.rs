//! TLS termination for the HTTPS mock server
//!
//! Each server gets a fresh self-signed certificate for `localhost` and
//! `127.0.0.1`; clients are expected to skip verification.

use std::sync::Arc;

use rcgen::CertifiedKey;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::common::{Error, Result};

/// Build an acceptor around a newly generated self-signed certificate
pub fn self_signed_acceptor() -> Result<TlsAcceptor> {
    let CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(|e| Error::Server(format!("Failed to generate certificate: {}", e)))?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Server(format!("Unsupported TLS configuration: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .map_err(|e| Error::Server(format!("Invalid certificate: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
