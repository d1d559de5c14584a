//! TLS configuration for terminating HTTPS directly inside the server,
//! instead of behind a separate reverse proxy.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use rustls::RootCertStore;
use std::sync::Arc;

/// Certificate chain, private key, and optional client-CA trust anchor for
/// terminating TLS on accepted connections.
///
/// Built once at daemon startup and shared (via the `rustls::ServerConfig`
/// it produces) across every connection; `rustls` handles all per-session
/// state from there.
///
/// ALPN is always pinned to `["http/1.1", "http/1.0"]` — this library does
/// not speak HTTP/2 or HTTP/3, so offering them in the handshake would only
/// let a client negotiate a protocol the server can't serve. Session
/// resumption (tickets) is disabled: MHD's own TLS backends don't resume
/// sessions either, and enabling it here would make `Transport` state
/// outlive the connection object it belongs to.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    cert_chain: Vec<CertificateDer<'static>>,
    key: Arc<PrivateKeyDer<'static>>,
    client_ca: Option<RootCertStore>,
}

impl TlsConfig {
    /// Builds a configuration from a PEM-encoded certificate chain and
    /// private key already held in memory (no filesystem access is
    /// performed here — load the files yourself and hand over the bytes).
    #[inline]
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            key: Arc::new(key),
            client_ca: None,
        }
    }

    /// Requires clients to present a certificate signed by `client_ca`.
    ///
    /// Omit this call to accept any client, authenticated or not, which is
    /// the common case for a public HTTPS endpoint.
    #[inline]
    pub fn client_ca(mut self, client_ca: RootCertStore) -> Self {
        self.client_ca = Some(client_ca);
        self
    }

    /// Builds the `rustls::ServerConfig` used to terminate each incoming
    /// connection.
    ///
    /// # Errors
    /// Returns an error if the certificate chain and private key don't
    /// match, or if the client-CA verifier can't be constructed.
    pub(crate) fn build(&self) -> Result<Arc<ServerConfig>, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let client_verifier = match &self.client_ca {
            Some(store) => WebPkiClientVerifier::builder_with_provider(
                Arc::new(store.clone()),
                provider.clone(),
            )
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))?,
            None => WebPkiClientVerifier::no_client_auth(),
        };

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| rustls::Error::General(e.to_string()))?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;

        config.alpn_protocols = vec![b"http/1.1".to_vec(), b"http/1.0".to_vec()];
        config.session_storage = Arc::new(rustls::server::NoServerSessionStorage {});
        config.send_tls13_tickets = 0;

        Ok(Arc::new(config))
    }
}
