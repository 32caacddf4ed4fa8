//! Client façade over a transport.
//!
//! Keep the public surface small: one type to run operations, one builder to
//! assemble the transport stack.

pub mod builder;
pub mod core;

pub use builder::ClientBuilder;
pub use core::Client;
