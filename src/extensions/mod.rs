//! Transport wrappers that extend the wire protocol.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ApqTransport`] | Automatic persisted queries: send a hash first, the full query only on a miss |

pub mod apq;

pub use apq::{query_hash, ApqTransport, APQ_EXTENSION, PERSISTED_QUERY_NOT_FOUND};
