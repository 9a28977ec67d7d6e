//! The JWT auth-termination variant: an imperative pre-handshake phase
//! instead of a processor pipeline, per spec.md §4.4.

pub mod handshake;
pub mod token;

pub use handshake::{run_downstream, JwtAuthConfig};
