//! TLS credential loading. The handshake itself is delegated to
//! `tokio-rustls`/`rustls`; this module only turns PEM bytes into the
//! `rustls::ClientConfig` the gateway/feedback connectors need.

use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};

use crate::error::{Error, Result};

/// How the client authenticates to APS.
#[derive(Clone)]
pub enum TlsCredentials {
    /// Certificate + key PEM bytes, parsed lazily by [`TlsCredentials::client_config`].
    CertificateAndKey {
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
    },
    /// A pre-built `rustls::ClientConfig`, for callers managing their own
    /// certificate store.
    Prebuilt(Arc<ClientConfig>),
}

impl TlsCredentials {
    /// Builds (or returns) the `rustls::ClientConfig` to use for both the
    /// gateway and feedback connections.
    ///
    /// Parse errors here are configuration-phase errors: latched on
    /// construction, surfaced only when `connect()` actually needs them.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        match self {
            Self::Prebuilt(config) => Ok(config.clone()),
            Self::CertificateAndKey { cert_pem, key_pem } => {
                let cert_chain = rustls_pemfile::certs(&mut &cert_pem[..])
                    .map_err(|_| Error::InvalidPem("could not parse certificate PEM".into()))?
                    .into_iter()
                    .map(Certificate)
                    .collect::<Vec<_>>();
                if cert_chain.is_empty() {
                    return Err(Error::InvalidPem("no certificates found in PEM".into()));
                }

                let key = parse_private_key(key_pem)?;

                let mut roots = RootCertStore::empty();
                roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
                    rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));

                let config = ClientConfig::builder()
                    .with_safe_defaults()
                    .with_root_certificates(roots)
                    .with_client_auth_cert(cert_chain, key)?;

                Ok(Arc::new(config))
            }
        }
    }
}

fn parse_private_key(key_pem: &[u8]) -> Result<PrivateKey> {
    let mut reader = &mut &key_pem[..];

    if let Ok(mut keys) = rustls_pemfile::pkcs8_private_keys(reader) {
        if let Some(key) = keys.pop() {
            return Ok(PrivateKey(key));
        }
    }

    reader = &mut &key_pem[..];
    if let Ok(mut keys) = rustls_pemfile::rsa_private_keys(reader) {
        if let Some(key) = keys.pop() {
            return Ok(PrivateKey(key));
        }
    }

    Err(Error::InvalidPem(
        "no PKCS#8 or RSA private key found in PEM".into(),
    ))
}
