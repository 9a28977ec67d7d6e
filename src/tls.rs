//! TLS configuration for both legs of the JWT variant: a mandatory
//! certificate-backed server side facing the client, and a client side
//! facing the real PostgreSQL server whose certificate verification is
//! configurable. See spec.md §4.5.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};

use crate::errors::ProxyError;

/// Build the downstream-facing `ServerConfig` from a PEM certificate chain
/// and private key. The client always authenticates via the cert; there
/// is no client certificate verification in scope here.
pub fn server_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, ProxyError> {
    let cert_file = File::open(cert_path)
        .map_err(|e| ProxyError::Tls(format!("opening certificate '{cert_path}': {e}")))?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("parsing certificate '{cert_path}': {e}")))?;
    if cert_chain.is_empty() {
        return Err(ProxyError::Tls(format!("no certificates found in '{cert_path}'")));
    }

    let key_file = File::open(key_path)
        .map_err(|e| ProxyError::Tls(format!("opening private key '{key_path}': {e}")))?;
    let mut key_reader = BufReader::new(key_file);
    let private_key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ProxyError::Tls(format!("parsing private key '{key_path}': {e}")))?
        .ok_or_else(|| ProxyError::Tls(format!("no private key found in '{key_path}'")))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| ProxyError::Tls(format!("building server TLS config: {e}")))?;

    Ok(Arc::new(config))
}

/// Build the upstream-facing `ClientConfig`. When `verify` is false the
/// connection accepts any server certificate unconditionally, matching
/// the reference design's `ssl.CERT_NONE`; when true, the platform's
/// default webpki root store is used.
pub fn client_config(verify: bool) -> Result<Arc<ClientConfig>, ProxyError> {
    let config = if verify {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// A verifier that unconditionally accepts every server certificate.
/// Gated behind `verify_upstream = false` in config, and used only for the
/// upstream leg — never for the downstream, client-facing side.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA1,
            ECDSA_SHA1_Legacy,
            RSA_PKCS1_SHA256,
            ECDSA_NISTP256_SHA256,
            RSA_PKCS1_SHA384,
            ECDSA_NISTP384_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}
