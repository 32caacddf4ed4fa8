//! # gql-transport
//!
//! Streaming GraphQL client transports: plain HTTP, `graphql-ws` over
//! WebSocket with automatic reconnection and re-subscription, routing between
//! the two, and automatic persisted queries.
//!
//! ## Overview
//!
//! Every transport turns a [`types::Request`] into a [`response::ResponseRef`]:
//! a pull-based stream of envelopes (`data`, `errors`, `extensions`). Queries and
//! mutations yield one envelope; subscriptions yield many. The [`Client`] sits
//! on top, decoding `data` into caller types and tying each request's
//! cancellation token to its response.
//!
//! ## Key Features
//!
//! - **One stream contract**: `next()` / `current()` / `close()` / `err()` across every transport
//! - **Resilient subscriptions**: [`ws::WsTransport`] redials on connection loss and restarts tracked operations under their original ids
//! - **Transparent APQ**: [`extensions::ApqTransport`] sends a hash first and silently retries with the full query on a miss
//! - **Composable**: [`transport::split_subscription`] routes subscriptions to WebSocket and the rest to HTTP
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gql_transport::types::Request;
//! use gql_transport::ClientBuilder;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Data {
//!     room: Room,
//! }
//!
//! #[derive(Deserialize)]
//! struct Room {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> gql_transport::Result<()> {
//!     let client = ClientBuilder::new()
//!         .http("http://localhost:4000/query")
//!         .build()?;
//!
//!     let data: Data = client
//!         .query(
//!             Request::query("query R($n: String!) { room(name: $n) { name } }")
//!                 .variable("n", "test"),
//!         )
//!         .await?;
//!     println!("{}", data.room.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Requests, operation kinds, response envelopes, GraphQL errors |
//! | [`response`] | The stream contract and its channel, single-shot and proxy implementations |
//! | [`transport`] | `Transport` trait, HTTP transport, split routing, mocks |
//! | [`ws`] | `graphql-ws` protocol state machine and socket layer |
//! | [`extensions`] | Automatic persisted queries |
//! | [`client`] | Client façade and builder |

pub mod client;
pub mod extensions;
pub mod response;
pub mod transport;
pub mod types;
pub mod ws;

#[cfg(feature = "interceptors")]
pub mod interceptors;

// Re-export main types for convenience
pub use client::{Client, ClientBuilder};
pub use response::{Response, ResponseRef};
pub use transport::Transport;

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, TransportError};
