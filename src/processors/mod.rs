//! The MD5-variant pipeline stages and the composition that wires them
//! together. See spec.md §4.2's "Default composition (MD5 variant)".

pub mod echo;
pub mod logger;
pub mod md5_auth;
pub mod parser;

pub use echo::EchoProcessor;
pub use logger::LoggerProcessor;
pub use md5_auth::{Md5AuthConfig, Md5AuthProcessor};
pub use parser::ParserProcessor;

use crate::pipeline::Pipeline;

/// Build the default MD5-variant pipeline, outside to inside: raw bytes
/// from the socket, parsed into messages, logged, rewritten for
/// credential translation, and finally echoed back out toward the
/// opposite socket.
pub fn md5_pipeline(auth: Md5AuthConfig) -> Pipeline {
    Pipeline::new(vec![
        Box::new(ParserProcessor::new()),
        Box::new(LoggerProcessor::new()),
        Box::new(Md5AuthProcessor::new(auth)),
        Box::new(EchoProcessor::new()),
    ])
}
