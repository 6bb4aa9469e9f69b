//! Client TLS context for device connections.
//!
//! Material (client certificate, private key, CA bundle) is loaded from
//! the configured paths on every call, so each reconnect attempt gets a
//! fresh context and picks up rotated files without a restart.
//!
//! Hostname verification is configurable and off by default: fleet
//! devices present certificates issued by a private CA and are addressed
//! by IP, so only the chain is validated against that CA.

use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    client::WebPkiServerVerifier,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tokio_rustls::TlsConnector;

use platewatch_core::config::TlsConfig;

use crate::error::{Error, Result};

/// Build a TLS connector from the configured material.
///
/// All load/parse failures are configuration errors: they are fatal for
/// the affected device's connection attempt but never for the process.
pub fn build_connector(config: &TlsConfig) -> Result<TlsConnector> {
    let roots = load_ca_bundle(&config.ca_path)?;
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let builder = rustls::ClientConfig::builder();
    let client_config = if config.verify_hostname {
        builder
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
    } else {
        let verifier = ChainOnlyVerifier::new(roots)?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(certs, key)
    }
    .map_err(|e| Error::Configuration(format!("invalid TLS client material: {e}")))?;

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Parse a host string into the `ServerName` rustls expects (DNS name or
/// IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Configuration(format!("invalid device host {host}: {e}")))
}

fn load_ca_bundle(path: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let mut added = 0usize;
    for cert in read_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::Configuration(format!("invalid CA certificate in {path}: {e}")))?;
        added += 1;
    }
    if added == 0 {
        return Err(Error::Configuration(format!(
            "no CA certificates found in {path}"
        )));
    }
    Ok(roots)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = read_certs(path)?;
    if certs.is_empty() {
        return Err(Error::Configuration(format!(
            "no client certificates found in {path}"
        )));
    }
    Ok(certs)
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Configuration(format!("cannot read TLS file {path}: {e}")))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Configuration(format!("cannot parse certificates in {path}: {e}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Configuration(format!("cannot read TLS file {path}: {e}")))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Configuration(format!("cannot parse private key in {path}: {e}")))?
        .ok_or_else(|| Error::Configuration(format!("no private key found in {path}")))
}

/// Verifier that validates the peer's chain against the supplied CA but
/// accepts any subject name. Every other verification step delegates to
/// the stock webpki verifier.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyVerifier {
    fn new(roots: RootCertStore) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build TLS verifier: {e}")))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
