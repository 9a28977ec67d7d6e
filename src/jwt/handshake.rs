//! The JWT variant's connection handling: a strictly sequential
//! downstream handshake (TLS, startup, JWT authentication), an upstream
//! handshake (TLS, fresh startup), and a relay phase that fans out into
//! two cooperative copy tasks. Grounded on
//! `original_source/jwt_postgresql_proxy.py`'s `handle_downstream` and
//! its helper functions, and on the `tokio::io::copy` +
//! `tokio::try_join!` relay pattern used elsewhere in the pack.

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::errors::{ProtocolError, ProxyError};
use crate::messages::{
    self, authentication_failed_error_response, auth_cleartext_password_request, auth_ok,
    empty_error_response, build_startup_message, SSL_REQUEST_FRAME,
};
use crate::jwt::token;

/// Everything the JWT variant's downstream handler needs for the
/// lifetime of the listener. Shared read-only across connections.
pub struct JwtAuthConfig {
    pub server_tls: Arc<ServerConfig>,
    pub upstream_tls: Arc<ClientConfig>,
    pub verifying_key: VerifyingKey,
    pub upstream_address: SocketAddr,
    pub upstream_server_name: String,
    pub max_message_bytes: usize,
}

type DownstreamTls = tokio_rustls::server::TlsStream<TcpStream>;
type UpstreamTls = tokio_rustls::client::TlsStream<TcpStream>;

/// Handle one accepted downstream connection start to finish. Never
/// returns an error to the caller; failures are logged, since by the
/// time most of them occur a client-visible response has already been
/// attempted.
pub async fn run_downstream(downstream: TcpStream, config: Arc<JwtAuthConfig>) {
    if let Err(e) = handle(downstream, &config).await {
        log::warn!("jwt connection terminated: {e}");
    }
}

async fn handle(downstream: TcpStream, config: &JwtAuthConfig) -> Result<(), ProxyError> {
    let mut downstream = convert_downstream_to_tls(downstream, config).await?;

    let outcome = run_authenticated(&mut downstream, config).await;
    if let Err(e) = &outcome {
        let reply = match e {
            ProxyError::DownstreamAuthentication(_) => authentication_failed_error_response(),
            _ => empty_error_response(),
        };
        let _ = downstream.write_all(&reply).await;
    }
    let _ = downstream.shutdown().await;
    outcome
}

async fn run_authenticated(
    downstream: &mut DownstreamTls,
    config: &JwtAuthConfig,
) -> Result<(), ProxyError> {
    let (user, database) = downstream_startup(downstream, config.max_message_bytes).await?;
    downstream_authenticate(downstream, &config.verifying_key, &user, config.max_message_bytes)
        .await?;

    let mut upstream = upstream_connect_and_handshake(config).await?;
    upstream_startup(&mut upstream, &user, &database).await?;

    relay(downstream, &mut upstream).await
}

/// Pure check for the state-1 guard in spec.md §4.4: the first 8 bytes on
/// the wire must be the exact SSLRequest frame.
fn check_ssl_request_frame(header: &[u8; 8]) -> Result<(), ProtocolError> {
    if *header != SSL_REQUEST_FRAME {
        return Err(ProtocolError::UnexpectedSslRequest);
    }
    Ok(())
}

async fn convert_downstream_to_tls(
    mut downstream: TcpStream,
    config: &JwtAuthConfig,
) -> Result<DownstreamTls, ProxyError> {
    let mut header = [0u8; 8];
    downstream.read_exact(&mut header).await?;
    if let Err(e) = check_ssl_request_frame(&header) {
        let _ = downstream.write_all(&empty_error_response()).await;
        return Err(e.into());
    }
    downstream.write_all(b"S").await?;

    let acceptor = TlsAcceptor::from(config.server_tls.clone());
    acceptor
        .accept(downstream)
        .await
        .map_err(|e| ProxyError::Tls(format!("downstream TLS handshake: {e}")))
}

/// Pure check for the state-3 guard in spec.md §4.4: the declared length
/// must be at least the 8-byte header itself and within the configured
/// cap, and the protocol version must be the one this proxy speaks.
fn check_startup_header(
    declared_len: usize,
    protocol_version: u32,
    max_message_bytes: usize,
) -> Result<(), ProtocolError> {
    if declared_len < 8 {
        return Err(ProtocolError::InvalidDeclaredLength(declared_len as u32));
    }
    if declared_len > max_message_bytes {
        return Err(ProtocolError::MessageTooLarge {
            declared: declared_len,
            max: max_message_bytes,
        });
    }
    if protocol_version != messages::PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedProtocolVersion(protocol_version));
    }
    Ok(())
}

async fn downstream_startup(
    downstream: &mut DownstreamTls,
    max_message_bytes: usize,
) -> Result<(String, String), ProxyError> {
    let mut header = [0u8; 8];
    downstream.read_exact(&mut header).await?;
    let declared_len = u32::from_be_bytes(header[0..4].try_into().unwrap()) as usize;
    let protocol_version = u32::from_be_bytes(header[4..8].try_into().unwrap());

    check_startup_header(declared_len, protocol_version, max_message_bytes)?;

    let mut pairs_buf = vec![0u8; declared_len - 8];
    downstream.read_exact(&mut pairs_buf).await?;
    let pairs = parse_simple_pairs(&pairs_buf);

    let user = pairs
        .iter()
        .find(|(k, _)| k == b"user")
        .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
        .ok_or(ProtocolError::MissingStartupField("user"))?;
    let database = pairs
        .iter()
        .find(|(k, _)| k == b"database")
        .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
        .ok_or(ProtocolError::MissingStartupField("database"))?;

    Ok((user, database))
}

/// Split a NUL-delimited `key\0value\0key2\0value2\0` buffer into pairs.
/// Unlike the MD5 variant's `scan_startup_pairs`, this operates on the
/// pairs-only region of the message (the 4-byte protocol version has
/// already been consumed by the caller) and requires no leading NUL.
fn parse_simple_pairs(buf: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut fields: Vec<&[u8]> = buf.split(|&b| b == 0).collect();
    if fields.last().map(|f| f.is_empty()).unwrap_or(false) {
        fields.pop();
    }
    fields
        .chunks_exact(2)
        .map(|pair| (pair[0].to_vec(), pair[1].to_vec()))
        .collect()
}

/// Pure check for state 6 in spec.md §4.4: the password message's tag must
/// be `'p'` and its declared length must clear the 4-byte header floor and
/// stay within the configured cap.
fn check_password_header(
    tag: u8,
    declared_len: usize,
    max_message_bytes: usize,
) -> Result<(), ProtocolError> {
    if declared_len < 4 {
        return Err(ProtocolError::InvalidDeclaredLength(declared_len as u32));
    }
    if declared_len > max_message_bytes {
        return Err(ProtocolError::MessageTooLarge {
            declared: declared_len,
            max: max_message_bytes,
        });
    }
    if tag != b'p' {
        return Err(ProtocolError::UnexpectedTag {
            expected: b'p',
            found: tag,
        });
    }
    Ok(())
}

async fn downstream_authenticate(
    downstream: &mut DownstreamTls,
    verifying_key: &VerifyingKey,
    claimed_user: &str,
    max_message_bytes: usize,
) -> Result<(), ProxyError> {
    downstream.write_all(&auth_cleartext_password_request()).await?;

    let mut header = [0u8; 5];
    downstream.read_exact(&mut header).await?;
    let tag = header[0];
    let declared_len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;

    check_password_header(tag, declared_len, max_message_bytes)?;

    let mut body = vec![0u8; declared_len - 4];
    downstream.read_exact(&mut body).await?;
    // Strip the password message's trailing NUL terminator.
    let token_bytes = body.strip_suffix(&[0u8]).unwrap_or(&body);

    token::verify(verifying_key, token_bytes, claimed_user)?;

    downstream.write_all(&auth_ok()).await?;
    Ok(())
}

async fn upstream_connect_and_handshake(config: &JwtAuthConfig) -> Result<UpstreamTls, ProxyError> {
    let mut upstream = TcpStream::connect(config.upstream_address).await?;
    upstream.set_nodelay(true)?;

    upstream.write_all(&SSL_REQUEST_FRAME).await?;
    let mut reply = [0u8; 1];
    upstream.read_exact(&mut reply).await?;
    if reply[0] != b'S' {
        return Err(ProtocolError::UnexpectedSslRequest.into());
    }

    let server_name = ServerName::try_from(config.upstream_server_name.clone())
        .map_err(|e| ProxyError::Tls(format!("invalid upstream server name: {e}")))?;
    let connector = TlsConnector::from(config.upstream_tls.clone());
    connector
        .connect(server_name, upstream)
        .await
        .map_err(|e| ProxyError::Tls(format!("upstream TLS handshake: {e}")))
}

async fn upstream_startup(
    upstream: &mut UpstreamTls,
    user: &str,
    database: &str,
) -> Result<(), ProxyError> {
    let message = build_startup_message(user, database);
    upstream.write_all(&message).await?;
    Ok(())
}

/// Relay bytes in both directions until either side hits EOF. No further
/// protocol interpretation happens in this phase, per spec.md §4.4.
async fn relay(downstream: &mut DownstreamTls, upstream: &mut UpstreamTls) -> Result<(), ProxyError> {
    let (mut down_read, mut down_write) = tokio::io::split(downstream);
    let (mut up_read, mut up_write) = tokio::io::split(upstream);

    let client_to_server = async {
        let result = tokio::io::copy(&mut down_read, &mut up_write).await;
        let _ = up_write.shutdown().await;
        result
    };
    let server_to_client = async {
        let result = tokio::io::copy(&mut up_read, &mut down_write).await;
        let _ = down_write.shutdown().await;
        result
    };

    tokio::try_join!(client_to_server, server_to_client)?;
    Ok(())
}
