//! Ed25519 JWT verification: load the fixed public key once at startup,
//! verify a compact `header.payload.signature` token, and check the
//! signed `sub` claim against the StartupMessage's claimed user.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;

use crate::errors::{DownstreamAuthenticationError, ProxyError};

#[derive(Deserialize)]
struct JwtClaims {
    sub: String,
}

/// Load an Ed25519 public key from a PEM-encoded SubjectPublicKeyInfo
/// file, as produced by `openssl genpkey -algorithm ed25519`.
pub fn load_verifying_key(path: &str) -> Result<VerifyingKey, ProxyError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| ProxyError::Config(format!("reading JWT public key '{path}': {e}")))?;
    VerifyingKey::from_public_key_pem(&pem)
        .map_err(|e| ProxyError::Config(format!("parsing JWT public key '{path}': {e}")))
}

/// Verify a compact JWT's signature and confirm its `sub` claim equals
/// `claimed_user`. Mirrors `downstream_authenticate` in the reference
/// implementation: the token is trusted only by its Ed25519 signature,
/// there is no header algorithm negotiation.
pub fn verify(
    verifying_key: &VerifyingKey,
    token: &[u8],
    claimed_user: &str,
) -> Result<(), ProxyError> {
    let parts: Vec<&[u8]> = token.split(|&b| b == b'.').collect();
    let [header_b64, payload_b64, signature_b64] = parts.as_slice() else {
        return Err(DownstreamAuthenticationError::MalformedToken.into());
    };

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| DownstreamAuthenticationError::MalformedToken)?;
    let signature_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| DownstreamAuthenticationError::MalformedToken)?;
    let signature = Signature::from_bytes(&signature_bytes);

    let mut signing_input = Vec::with_capacity(header_b64.len() + 1 + payload_b64.len());
    signing_input.extend_from_slice(header_b64);
    signing_input.push(b'.');
    signing_input.extend_from_slice(payload_b64);

    verifying_key
        .verify(&signing_input, &signature)
        .map_err(|_| DownstreamAuthenticationError::InvalidSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| DownstreamAuthenticationError::MalformedToken)?;
    let claims: JwtClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|_| DownstreamAuthenticationError::MalformedToken)?;

    if claims.sub != claimed_user {
        return Err(DownstreamAuthenticationError::SubjectMismatch.into());
    }

    Ok(())
}
