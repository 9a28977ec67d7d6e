//! Logs every message crossing the pipeline, in either direction, and
//! forwards it unchanged. Replaces the original's bare `print()` calls
//! with the `log` facade, matching the teacher's logging stack.

use log::debug;

use crate::errors::ProxyError;
use crate::pipeline::{Action, Carrier, Direction, Processor};

#[derive(Default)]
pub struct LoggerProcessor;

impl LoggerProcessor {
    pub fn new() -> Self {
        LoggerProcessor
    }

    fn log_all(title: &str, data: &Carrier) {
        if let Carrier::Messages(messages) = data {
            for message in messages {
                match message.tag() {
                    Some(tag) => debug!(
                        "[{title}] tag='{}' payload_len={}",
                        tag as char,
                        message.payload.len()
                    ),
                    None => debug!(
                        "[{title}] startup-shaped payload_len={}",
                        message.payload.len()
                    ),
                }
            }
        }
    }
}

impl Processor for LoggerProcessor {
    fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Self::log_all("client->proxy", &data);
        Ok(vec![Action::to_inner(Direction::ClientToServer, data)])
    }

    fn c2s_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Self::log_all("proxy->server", &data);
        Ok(vec![Action::to_outer(Direction::ClientToServer, data)])
    }

    fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Self::log_all("server->proxy", &data);
        Ok(vec![Action::to_inner(Direction::ServerToClient, data)])
    }

    fn s2c_from_inside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Self::log_all("proxy->client", &data);
        Ok(vec![Action::to_outer(Direction::ServerToClient, data)])
    }
}
