//! Core data types shared by every transport.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Request`] | One operation handed to a transport, with its cancellation context |
//! | [`OperationKind`] | query / mutation / subscription |
//! | [`OperationRequest`] | Wire body of an operation (`query`, `operationName`, `variables`, `extensions`) |
//! | [`OperationResponse`] | One envelope of a response stream (`data`, `errors`, `extensions`) |
//! | [`GqlError`] / [`GqlErrors`] | Application errors carried inside an envelope |
//!
//! ## Example
//!
//! ```rust
//! use gql_transport::types::{OperationKind, Request};
//!
//! let req = Request::query(r#"query Room($name: String!) { room(name: $name) { name } }"#)
//!     .with_operation_name("Room")
//!     .variable("name", "test");
//!
//! assert_eq!(req.operation, OperationKind::Query);
//! let body = serde_json::to_value(req.to_operation_request()).unwrap();
//! assert_eq!(body["variables"]["name"], "test");
//! ```

pub mod request;
pub mod response;

pub use request::{OperationKind, OperationRequest, Request};
pub use response::{GqlError, GqlErrors, Location, OperationResponse};
