/// Helper functions to build one-off protocol messages and to work with
/// the pieces of the wire format that more than one module needs: the
/// StartupMessage key/value format and the handful of fixed messages the
/// proxy emits to the client directly (error responses, auth requests).
use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::ProxyError;

/// PostgreSQL protocol version 3.0.
pub const PROTOCOL_VERSION: u32 = 196608;

/// The fixed 4-byte SSLRequest payload (decimal 80877103).
pub const SSL_REQUEST_PAYLOAD: [u8; 4] = [0x04, 0xd2, 0x16, 0x2f];

/// The full 8-byte SSLRequest frame as sent on the wire.
pub const SSL_REQUEST_FRAME: [u8; 8] = [0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];

/// Scan a StartupMessage payload for NUL-delimited key/value pairs.
///
/// Mirrors the upstream behaviour of scanning for `\0key\0value` runs
/// across the *entire* payload, including the leading protocol-version
/// bytes: because protocol version 196608 is `0x00 0x03 0x00 0x00`, the
/// scan incidentally captures a garbage first pair from those bytes. This
/// is intentional — `rebuild_startup_payload` relies on it to reconstruct
/// a byte-exact protocol version prefix. See DESIGN.md for the full
/// explanation.
pub fn scan_startup_pairs(payload: &[u8]) -> Vec<(Bytes, Bytes)> {
    let mut pairs = Vec::new();
    let mut i = 0;
    let n = payload.len();

    while i < n {
        if payload[i] != 0 {
            i += 1;
            continue;
        }

        let key_start = i + 1;
        let mut j = key_start;
        while j < n && payload[j] != 0 {
            j += 1;
        }
        if j == key_start {
            // Empty key: this NUL can't start a match, try the next byte.
            i += 1;
            continue;
        }
        if j >= n {
            // No terminating NUL for the key: no match possible.
            break;
        }

        let value_start = j + 1;
        let mut k = value_start;
        while k < n && payload[k] != 0 {
            k += 1;
        }

        pairs.push((
            Bytes::copy_from_slice(&payload[key_start..j]),
            Bytes::copy_from_slice(&payload[value_start..k]),
        ));
        i = k;
    }

    pairs
}

/// Reassemble a StartupMessage payload from an ordered key/value list, in
/// the format spec.md §4.3 describes: leading NUL, then `key ∥ NUL ∥ value
/// ∥ NUL` per pair, then a trailing NUL.
pub fn rebuild_startup_payload(pairs: &[(Bytes, Bytes)]) -> Bytes {
    let mut out = BytesMut::with_capacity(
        2 + pairs.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>(),
    );
    out.put_u8(0);
    for (key, value) in pairs {
        out.extend_from_slice(key);
        out.put_u8(0);
        out.extend_from_slice(value);
        out.put_u8(0);
    }
    out.put_u8(0);
    out.freeze()
}

/// Build a fresh StartupMessage (length-prefixed, with the real protocol
/// version) for the case where the proxy itself initiates a brand new
/// upstream login, as in the JWT variant's upstream leg.
pub fn build_startup_message(user: &str, database: &str) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u32(PROTOCOL_VERSION);
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.put_u8(0);
    body.extend_from_slice(b"database\0");
    body.extend_from_slice(database.as_bytes());
    body.put_u8(0);
    body.put_u8(0);

    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32(body.len() as u32 + 4);
    out.extend_from_slice(&body);
    out.freeze()
}

/// `'R'` AuthenticationOk.
pub fn auth_ok() -> Bytes {
    let mut out = BytesMut::with_capacity(9);
    out.put_u8(b'R');
    out.put_u32(8);
    out.put_u32(0);
    out.freeze()
}

/// `'R'` AuthenticationCleartextPassword.
pub fn auth_cleartext_password_request() -> Bytes {
    let mut out = BytesMut::with_capacity(9);
    out.put_u8(b'R');
    out.put_u32(8);
    out.put_u32(3);
    out.freeze()
}

/// `'E'` ErrorResponse with an empty body: the minimal response for a
/// generic protocol failure before auth completes.
pub fn empty_error_response() -> Bytes {
    let mut out = BytesMut::with_capacity(5);
    out.put_u8(b'E');
    out.put_u32(5);
    out.put_u8(0);
    out.freeze()
}

/// `'E'` ErrorResponse carrying `S=FATAL`, `M=Authentication failed`,
/// `C=28P01`, the fixed client-visible authentication failure body from
/// spec.md §4.4/§7.
pub fn authentication_failed_error_response() -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(b'S');
    body.extend_from_slice(b"FATAL\0");
    body.put_u8(b'M');
    body.extend_from_slice(b"Authentication failed\0");
    body.put_u8(b'C');
    body.extend_from_slice(b"28P01\0");
    body.put_u8(0);

    let mut out = BytesMut::with_capacity(5 + body.len());
    out.put_u8(b'E');
    out.put_u32(body.len() as u32 + 4);
    out.extend_from_slice(&body);
    out.freeze()
}

/// Parse StartupMessage parameters into an ordered list, requiring at
/// least `user` to be present. Used by the JWT handshake, which also
/// needs `database`.
pub fn parse_startup_required(
    payload: &[u8],
    required: &[&'static str],
) -> Result<Vec<(Bytes, Bytes)>, ProxyError> {
    let pairs = scan_startup_pairs(payload);
    for field in required {
        let present = pairs
            .iter()
            .any(|(k, _)| k.as_ref() == field.as_bytes());
        if !present {
            return Err(crate::errors::ProtocolError::MissingStartupField(field).into());
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_and_rebuild_round_trip_for_real_protocol_version() {
        let mut payload = BytesMut::new();
        payload.put_u32(PROTOCOL_VERSION);
        payload.extend_from_slice(b"user\0postgres\0");
        payload.extend_from_slice(b"database\0mydb\0");
        payload.put_u8(0);

        let pairs = scan_startup_pairs(&payload);
        // First pair is the garbage capture from the version's tail bytes;
        // the rest are the real key/value pairs in original order.
        assert!(pairs.iter().any(|(k, v)| k.as_ref() == b"user" && v.as_ref() == b"postgres"));
        assert!(pairs.iter().any(|(k, v)| k.as_ref() == b"database" && v.as_ref() == b"mydb"));

        let rebuilt = rebuild_startup_payload(&pairs);
        assert_eq!(rebuilt.as_ref(), payload.as_ref());
    }

    #[test]
    fn rebuild_after_substituting_user_key() {
        let mut payload = BytesMut::new();
        payload.put_u32(PROTOCOL_VERSION);
        payload.extend_from_slice(b"user\0proxy_postgres\0");
        payload.put_u8(0);

        let mut pairs = scan_startup_pairs(&payload);
        for (k, v) in pairs.iter_mut() {
            if k.as_ref() == b"user" {
                *v = Bytes::from_static(b"postgres");
            }
        }
        let rebuilt = rebuild_startup_payload(&pairs);

        let rebuilt_pairs = scan_startup_pairs(&rebuilt);
        assert!(rebuilt_pairs
            .iter()
            .any(|(k, v)| k.as_ref() == b"user" && v.as_ref() == b"postgres"));
    }

    #[test]
    fn auth_ok_has_expected_bytes() {
        assert_eq!(auth_ok().as_ref(), b"R\x00\x00\x00\x08\x00\x00\x00\x00");
    }

    #[test]
    fn authentication_failed_body_matches_spec() {
        let msg = authentication_failed_error_response();
        assert_eq!(msg[0], b'E');
        assert!(msg.ends_with(b"\x00"));
        let body = &msg[5..];
        assert!(body.starts_with(b"SFATAL\0"));
        assert!(body.windows(b"MAuthentication failed\0".len()).any(|w| w == b"MAuthentication failed\0"));
        assert!(body.windows(b"C28P01\0".len()).any(|w| w == b"C28P01\0"));
    }
}
