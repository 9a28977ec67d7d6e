//! Incremental PostgreSQL wire-protocol framer.
//!
//! Consumes raw bytes from one direction of a connection and emits whole
//! messages as they become available, retaining partial trailing bytes
//! across calls. See spec.md §4.1 for the exact algorithm this follows.

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::{ProtocolError, ProxyError};

/// The server's SSL-refusal byte. Deliberately not followed by a length or
/// payload; see spec.md's "Special no-length type".
pub const NO_DATA_TYPE: u8 = b'N';

/// A single framed PostgreSQL message: `type ∥ length_bytes ∥ payload` is
/// guaranteed to equal the original on-wire bytes it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: Bytes,
    pub length_bytes: Bytes,
    pub payload: Bytes,
}

impl Message {
    /// The single tag byte, if this message carries one (i.e. it isn't one
    /// of the two leading startup-shaped messages).
    pub fn tag(&self) -> Option<u8> {
        self.kind.first().copied()
    }

    /// Concatenate the three components back into their original on-wire
    /// form. This is the round-trip inverse of the framer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            self.kind.len() + self.length_bytes.len() + self.payload.len(),
        );
        out.extend_from_slice(&self.kind);
        out.extend_from_slice(&self.length_bytes);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }
}

/// Stateful, incremental parser for one direction of a connection.
///
/// `num_startup_messages` is the number of leading messages that have no
/// type byte (two for client->server: SSLRequest then StartupMessage; zero
/// for server->client).
pub struct Framer {
    buffer: BytesMut,
    messages_popped: usize,
    num_startup_messages: usize,
}

impl Framer {
    pub fn new(num_startup_messages: usize) -> Self {
        Framer {
            buffer: BytesMut::new(),
            messages_popped: 0,
            num_startup_messages,
        }
    }

    /// Append `data` to the internal buffer and pop as many whole messages
    /// as are now available. Partial trailing bytes are retained for a
    /// later call to `push`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>, ProxyError> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_pop_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn try_pop_one(&mut self) -> Result<Option<Message>, ProxyError> {
        let type_length = if self.messages_popped < self.num_startup_messages {
            0
        } else {
            1
        };

        if self.buffer.len() < type_length {
            return Ok(None);
        }
        let type_bytes = self.buffer[0..type_length].to_vec();

        let length_length = if type_length == 1 && type_bytes == [NO_DATA_TYPE] {
            0
        } else {
            4
        };

        if self.buffer.len() < type_length + length_length {
            return Ok(None);
        }
        let length_bytes = self.buffer[type_length..type_length + length_length].to_vec();

        let payload_length = if length_length == 4 {
            let declared = u32::from_be_bytes(length_bytes.clone().try_into().unwrap());
            if declared < 4 {
                return Err(ProtocolError::InvalidDeclaredLength(declared).into());
            }
            (declared - 4) as usize
        } else {
            0
        };

        let message_length = type_length + length_length + payload_length;
        if self.buffer.len() < message_length {
            return Ok(None);
        }

        let payload_start = type_length + length_length;
        let payload = Bytes::copy_from_slice(&self.buffer[payload_start..message_length]);

        self.buffer.advance(message_length);
        self.messages_popped += 1;

        Ok(Some(Message {
            kind: Bytes::copy_from_slice(&type_bytes),
            length_bytes: Bytes::copy_from_slice(&length_bytes),
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup_message(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn tagged_message(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn round_trip_whole_push() {
        let ssl_request = startup_message(&[0x04, 0xd2, 0x16, 0x2f]);
        let startup = startup_message(b"\x00\x03\x00\x00user\0postgres\0\0");
        let query = tagged_message(b'Q', b"select 1\0");

        let mut input = Vec::new();
        input.extend_from_slice(&ssl_request);
        input.extend_from_slice(&startup);
        input.extend_from_slice(&query);

        let mut framer = Framer::new(2);
        let messages = framer.push(&input).unwrap();

        assert_eq!(messages.len(), 3);
        let mut reassembled = Vec::new();
        for m in &messages {
            reassembled.extend_from_slice(&m.to_bytes());
        }
        assert_eq!(reassembled, input);
    }

    #[test]
    fn round_trip_arbitrary_chunking() {
        let ssl_request = startup_message(&[0x04, 0xd2, 0x16, 0x2f]);
        let startup = startup_message(b"\x00\x03\x00\x00user\0postgres\0\0");
        let query = tagged_message(b'Q', b"select 1\0");

        let mut input = Vec::new();
        input.extend_from_slice(&ssl_request);
        input.extend_from_slice(&startup);
        input.extend_from_slice(&query);

        // Try a handful of different split points, including splitting
        // mid-header and mid-payload.
        for split_points in [
            vec![1, 2, 3, 5, 8, 13, 21],
            vec![input.len() / 2],
            vec![],
            (0..input.len()).step_by(1).collect::<Vec<_>>(),
        ] {
            let mut framer = Framer::new(2);
            let mut chunks = Vec::new();
            let mut last = 0;
            for &p in &split_points {
                if p > last && p < input.len() {
                    chunks.push(&input[last..p]);
                    last = p;
                }
            }
            chunks.push(&input[last..]);

            let mut all_messages = Vec::new();
            for chunk in chunks {
                all_messages.extend(framer.push(chunk).unwrap());
            }

            let mut reassembled = Vec::new();
            for m in &all_messages {
                reassembled.extend_from_slice(&m.to_bytes());
            }
            assert_eq!(reassembled, input);
        }
    }

    #[test]
    fn n_type_is_single_byte_with_no_length_or_payload() {
        let mut framer = Framer::new(2);
        // Pop the two startup messages first.
        framer
            .push(&startup_message(&[0x04, 0xd2, 0x16, 0x2f]))
            .unwrap();
        framer
            .push(&startup_message(b"\x00\x03\x00\x00user\0x\0\0"))
            .unwrap();

        let messages = framer.push(b"N").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind.as_ref(), b"N");
        assert!(messages[0].length_bytes.is_empty());
        assert!(messages[0].payload.is_empty());
    }

    #[test]
    fn declared_length_matches_payload_plus_four() {
        let query = tagged_message(b'Q', b"select 1\0");
        let mut framer = Framer::new(0);
        let messages = framer.push(&query).unwrap();
        assert_eq!(messages.len(), 1);
        let declared = u32::from_be_bytes(messages[0].length_bytes.as_ref().try_into().unwrap());
        assert_eq!(declared as usize, messages[0].payload.len() + 4);
    }

    #[test]
    fn rejects_declared_length_below_four() {
        let mut framer = Framer::new(0);
        let mut bad = vec![b'Q'];
        bad.extend_from_slice(&3u32.to_be_bytes());
        let err = framer.push(&bad).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Protocol(ProtocolError::InvalidDeclaredLength(3))
        ));
    }
}
