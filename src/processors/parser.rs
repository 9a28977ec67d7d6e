//! The parser processor: the boundary where the carrier type changes from
//! raw bytes (outside) to parsed `Message`s (inside). See spec.md §4.2 and
//! the "Byte-unit vs message-unit edges" design note in §9.

use crate::errors::ProxyError;
use crate::framer::Framer;
use crate::pipeline::{Action, Carrier, Direction, Processor};

pub struct ParserProcessor {
    c2s_framer: Framer,
    s2c_framer: Framer,
}

impl ParserProcessor {
    pub fn new() -> Self {
        ParserProcessor {
            c2s_framer: Framer::new(2),
            s2c_framer: Framer::new(0),
        }
    }
}

impl Default for ParserProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ParserProcessor {
    fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let bytes = data.into_bytes();
        let messages = self.c2s_framer.push(&bytes)?;
        if messages.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Action::to_inner(
            Direction::ClientToServer,
            Carrier::Messages(messages),
        )])
    }

    fn c2s_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let messages = data.into_messages();
        let mut out = bytes::BytesMut::new();
        for m in &messages {
            out.extend_from_slice(&m.to_bytes());
        }
        Ok(vec![Action::to_outer(
            Direction::ClientToServer,
            Carrier::Bytes(out.freeze()),
        )])
    }

    fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let bytes = data.into_bytes();
        let messages = self.s2c_framer.push(&bytes)?;
        if messages.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Action::to_inner(
            Direction::ServerToClient,
            Carrier::Messages(messages),
        )])
    }

    fn s2c_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        let messages = data.into_messages();
        let mut out = bytes::BytesMut::new();
        for m in &messages {
            out.extend_from_slice(&m.to_bytes());
        }
        Ok(vec![Action::to_outer(
            Direction::ServerToClient,
            Carrier::Bytes(out.freeze()),
        )])
    }
}
