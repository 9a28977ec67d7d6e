//! The innermost processor. Exists so the rest of the pipeline doesn't
//! need to special-case "there's nothing further in". Bubbles whatever it
//! sees on `_from_outside` straight back out in the same direction;
//! `_from_inside` is never actually reached since nothing sits further in,
//! but is a no-op per spec.md §4.2.

use crate::errors::ProxyError;
use crate::pipeline::{Action, Carrier, Direction, Processor};

#[derive(Default)]
pub struct EchoProcessor;

impl EchoProcessor {
    pub fn new() -> Self {
        EchoProcessor
    }
}

impl Processor for EchoProcessor {
    fn c2s_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![Action::to_outer(Direction::ClientToServer, data)])
    }

    fn c2s_from_inside(&mut self, _data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![])
    }

    fn s2c_from_outside(&mut self, data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![Action::to_outer(Direction::ServerToClient, data)])
    }

    fn s2c_from_inside(&mut self, _data: Carrier) -> Result<Vec<Action>, ProxyError> {
        Ok(vec![])
    }
}
