//! MD5 authentication rewriter: the proxy presents one set of credentials
//! to the client while the server expects another, with neither the real
//! credentials nor the server's salt ever visible to the client. See
//! spec.md §4.3 for the full algorithm.

use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::RngCore;

use crate::errors::ProxyError;
use crate::messages::{rebuild_startup_payload, scan_startup_pairs, SSL_REQUEST_PAYLOAD};
use crate::framer::Message;
use crate::pipeline::{Action, Carrier, Direction, Processor};

/// Credentials the proxy presents to clients, and the real ones it uses
/// upstream.
#[derive(Debug, Clone)]
pub struct Md5AuthConfig {
    pub proxy_user: Bytes,
    pub proxy_password: Bytes,
    pub server_user: Bytes,
    pub server_password: Bytes,
}

/// Per-connection state, populated on the server's challenge and consumed
/// on the client's response. Write-once before read, per spec.md §9.
#[derive(Debug, Default)]
struct AuthState {
    server_salt: Option<[u8; 4]>,
    client_salt: Option<[u8; 4]>,
}

pub struct Md5AuthProcessor {
    config: Md5AuthConfig,
    state: AuthState,
}

impl Md5AuthProcessor {
    pub fn new(config: Md5AuthConfig) -> Self {
        Md5AuthProcessor {
            config,
            state: AuthState::default(),
        }
    }

    fn rewrite_startup(&self, message: &Message) -> Message {
        let pairs = scan_startup_pairs(&message.payload);
        let client_username = pairs
            .iter()
            .find(|(k, _)| k.as_ref() == b"user")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let server_username = if client_username.as_ref() == self.config.proxy_user.as_ref() {
            self.config.server_user.clone()
        } else {
            // Deterministically doom this login: a random username the
            // server has never heard of.
            Bytes::from(md5_hex(&random_bytes(32)).into_bytes())
        };

        let rewritten: Vec<(Bytes, Bytes)> = pairs
            .into_iter()
            .map(|(k, v)| {
                if k.as_ref() == b"user" {
                    (k, server_username.clone())
                } else {
                    (k, v)
                }
            })
            .collect();

        let new_payload = rebuild_startup_payload(&rewritten);
        Message {
            kind: message.kind.clone(),
            length_bytes: pack_length(new_payload.len()),
            payload: new_payload,
        }
    }

    fn rewrite_md5_response(&self, message: &Message) -> Message {
        let client_digest = &message.payload[3..message.payload.len() - 1];
        let correct_client_digest = md5_salted(
            &self.config.proxy_password,
            &self.config.proxy_user,
            self.state.client_salt.as_ref().unwrap_or(&[0; 4]),
        );

        let new_digest = if client_digest == correct_client_digest.as_bytes() {
            md5_salted(
                &self.config.server_password,
                &self.config.server_user,
                self.state.server_salt.as_ref().unwrap_or(&[0; 4]),
            )
        } else {
            md5_hex(&random_bytes(32))
        };

        let mut new_payload = BytesMut::with_capacity(3 + new_digest.len() + 1);
        new_payload.extend_from_slice(b"md5");
        new_payload.extend_from_slice(new_digest.as_bytes());
        new_payload.put_u8(0);
        let new_payload = new_payload.freeze();

        Message {
            kind: message.kind.clone(),
            length_bytes: pack_length(new_payload.len()),
            payload: new_payload,
        }
    }

    fn rewrite_md5_challenge(&mut self, message: &Message) -> Message {
        let mut server_salt = [0u8; 4];
        server_salt.copy_from_slice(&message.payload[4..8]);
        let mut client_salt = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut client_salt);

        self.state.server_salt = Some(server_salt);
        self.state.client_salt = Some(client_salt);

        let mut new_payload = BytesMut::with_capacity(message.payload.len());
        new_payload.extend_from_slice(&message.payload[0..4]);
        new_payload.extend_from_slice(&client_salt);

        Message {
            kind: message.kind.clone(),
            length_bytes: message.length_bytes.clone(),
            payload: new_payload.freeze(),
        }
    }
}

impl Processor for Md5AuthProcessor {
    fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let messages = data.into_messages();
        let mut rewritten = Vec::with_capacity(messages.len());

        for message in messages {
            let is_startup = message.kind.is_empty() && message.payload.as_ref() != SSL_REQUEST_PAYLOAD;
            let is_md5_response =
                message.tag() == Some(b'p') && message.payload.len() >= 4 && &message.payload[0..3] == b"md5";

            let out = if is_startup {
                self.rewrite_startup(&message)
            } else if is_md5_response {
                self.rewrite_md5_response(&message)
            } else {
                message
            };
            rewritten.push(out);
        }

        Ok(vec![Action::to_inner(
            Direction::ClientToServer,
            Carrier::Messages(rewritten),
        )])
    }

    fn c2s_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![Action::to_outer(Direction::ClientToServer, data)])
    }

    fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let messages = data.into_messages();
        let mut rewritten = Vec::with_capacity(messages.len());

        for message in messages {
            let is_md5_request = message.tag() == Some(b'R')
                && message.payload.len() >= 8
                && &message.payload[0..4] == b"\x00\x00\x00\x05";

            let out = if is_md5_request {
                self.rewrite_md5_challenge(&message)
            } else {
                message
            };
            rewritten.push(out);
        }

        Ok(vec![Action::to_inner(
            Direction::ServerToClient,
            Carrier::Messages(rewritten),
        )])
    }

    fn s2c_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![Action::to_outer(Direction::ServerToClient, data)])
    }
}

fn pack_length(payload_len: usize) -> Bytes {
    let mut out = BytesMut::with_capacity(4);
    out.put_u32(payload_len as u32 + 4);
    out.freeze()
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// `MD5_HEX(b)`: the 32-char lowercase ASCII hex digest of `b`.
fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    format!("{:x}", digest)
}

/// `MD5_HEX( MD5_HEX(password ∥ username) ∥ salt )`, PostgreSQL's salted
/// MD5 construction.
fn md5_salted(password: &[u8], username: &[u8], salt: &[u8; 4]) -> String {
    let mut first = Md5::new();
    first.update(password);
    first.update(username);
    let first_hex = format!("{:x}", first.finalize());

    let mut second = Md5::new();
    second.update(first_hex.as_bytes());
    second.update(salt);
    format!("{:x}", second.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::Framer;

    fn config() -> Md5AuthConfig {
        Md5AuthConfig {
            proxy_user: Bytes::from_static(b"proxy_postgres"),
            proxy_password: Bytes::from_static(b"proxy_mysecret"),
            server_user: Bytes::from_static(b"postgres"),
            server_password: Bytes::from_static(b"mysecret"),
        }
    }

    fn startup_message(user: &str) -> Message {
        let mut payload = BytesMut::new();
        payload.put_u32(crate::messages::PROTOCOL_VERSION);
        payload.extend_from_slice(b"user\0");
        payload.extend_from_slice(user.as_bytes());
        payload.put_u8(0);
        payload.extend_from_slice(b"database\0d\0");
        payload.put_u8(0);

        let mut framer = Framer::new(2);
        // push the SSLRequest first so the next message is the real
        // startup message (matching the two-startup-message framing).
        let mut ssl = BytesMut::new();
        ssl.put_u32(8);
        ssl.extend_from_slice(&SSL_REQUEST_PAYLOAD);
        framer.push(&ssl).unwrap();

        let mut framed = BytesMut::new();
        framed.put_u32(payload.len() as u32 + 4);
        framed.extend_from_slice(&payload);
        framer.push(&framed).unwrap().remove(0)
    }

    #[test]
    fn rewrites_known_proxy_user_to_real_server_user() {
        let processor = Md5AuthProcessor::new(config());
        let message = startup_message("proxy_postgres");
        let rewritten = processor.rewrite_startup(&message);

        let pairs = scan_startup_pairs(&rewritten.payload);
        assert!(pairs.iter().any(|(k, v)| k.as_ref() == b"user" && v.as_ref() == b"postgres"));
    }

    #[test]
    fn rewrites_unknown_user_to_something_not_matching_server_user() {
        let processor = Md5AuthProcessor::new(config());
        let message = startup_message("someone_else");
        let rewritten = processor.rewrite_startup(&message);

        let pairs = scan_startup_pairs(&rewritten.payload);
        let (_, user) = pairs.iter().find(|(k, _)| k.as_ref() == b"user").unwrap();
        assert_ne!(user.as_ref(), b"postgres");
        assert_eq!(user.len(), 32);
    }

    #[test]
    fn happy_path_digest_matches_expected_server_credential() {
        let mut processor = Md5AuthProcessor::new(config());

        let server_salt = [0xaa, 0xbb, 0xcc, 0xdd];
        let mut challenge_payload = BytesMut::new();
        challenge_payload.extend_from_slice(b"\x00\x00\x00\x05");
        challenge_payload.extend_from_slice(&server_salt);
        let challenge = Message {
            kind: Bytes::from_static(b"R"),
            length_bytes: Bytes::new(),
            payload: challenge_payload.freeze(),
        };
        let rewritten_challenge = processor.rewrite_md5_challenge(&challenge);
        let client_salt = processor.state.client_salt.unwrap();
        assert_eq!(&rewritten_challenge.payload[4..8], &client_salt[..]);

        let correct_client_digest =
            md5_salted(b"proxy_mysecret", b"proxy_postgres", &client_salt);
        let mut response_payload = BytesMut::new();
        response_payload.extend_from_slice(b"md5");
        response_payload.extend_from_slice(correct_client_digest.as_bytes());
        response_payload.put_u8(0);
        let response = Message {
            kind: Bytes::from_static(b"p"),
            length_bytes: Bytes::new(),
            payload: response_payload.freeze(),
        };

        let rewritten_response = processor.rewrite_md5_response(&response);
        let expected_server_digest = md5_salted(b"mysecret", b"postgres", &server_salt);
        let expected_payload = format!("md5{expected_server_digest}\0");
        assert_eq!(rewritten_response.payload.as_ref(), expected_payload.as_bytes());
    }

    #[test]
    fn wrong_password_produces_a_digest_that_cannot_match_the_server() {
        let mut processor = Md5AuthProcessor::new(config());

        let server_salt = [1, 2, 3, 4];
        let challenge = Message {
            kind: Bytes::from_static(b"R"),
            length_bytes: Bytes::new(),
            payload: Bytes::from(
                [b"\x00\x00\x00\x05".as_ref(), &server_salt].concat(),
            ),
        };
        processor.rewrite_md5_challenge(&challenge);

        let response = Message {
            kind: Bytes::from_static(b"p"),
            length_bytes: Bytes::new(),
            payload: Bytes::from_static(b"md5deadbeefdeadbeefdeadbeefdeadbeef\0"),
        };
        let rewritten = processor.rewrite_md5_response(&response);

        let expected_server_digest = md5_salted(b"mysecret", b"postgres", &server_salt);
        let expected_payload = format!("md5{expected_server_digest}\0");
        assert_ne!(rewritten.payload.as_ref(), expected_payload.as_bytes());
    }

    #[test]
    fn non_auth_messages_pass_through_unchanged() {
        let mut processor = Md5AuthProcessor::new(config());
        let message = Message {
            kind: Bytes::from_static(b"Q"),
            length_bytes: Bytes::from_static(b"\x00\x00\x00\x0e"),
            payload: Bytes::from_static(b"select 1;\0"),
        };

        let actions = processor
            .c2s_from_outside(Carrier::Messages(vec![message.clone()]))
            .unwrap();
        assert_eq!(actions.len(), 1);
        let out = match &actions[0].data {
            Carrier::Messages(m) => m.clone(),
            _ => panic!("expected messages"),
        };
        assert_eq!(out, vec![message]);
    }
}
