//! Pull-based response streams.
//!
//! Every transport hands back a [`ResponseRef`]: a shared handle to something
//! implementing [`Response`]. Consumers drive it with [`Response::next`] and read
//! each envelope with [`Response::current`]; any task may call
//! [`Response::close`] at any time.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChanResponse`] | Rendezvous channel between one producer task and the consumer |
//! | [`SingleResponse`] | One already-materialized envelope |
//! | [`ProxyResponse`] | Forwards one or more upstream responses, allowing a silent swap |
//!
//! ```rust
//! use gql_transport::response::{Response, SingleResponse};
//! use gql_transport::types::OperationResponse;
//!
//! # tokio_test::block_on(async {
//! let res = SingleResponse::new(OperationResponse::from_data(serde_json::json!({"ok": true})));
//! assert!(res.next().await);
//! assert_eq!(res.current().data.unwrap()["ok"], true);
//! assert!(!res.next().await);
//! assert!(res.err().is_none());
//! # });
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::OperationResponse;
use crate::{BoxStream, Error};

pub mod chan;
pub mod proxy;
pub mod single;

pub use chan::ChanResponse;
pub use proxy::{ForwardAll, ItemAction, ItemHook, ProxyResponse};
pub use single::SingleResponse;

/// Signal that fires once a stream will deliver no more items.
///
/// Cloning shares the same signal. Supervisors `wait()` on it instead of polling.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal {
    token: CancellationToken,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that has already fired.
    pub fn fired() -> Self {
        let signal = Self::new();
        signal.fire();
        signal
    }

    pub fn fire(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// Streaming response contract shared by every transport.
///
/// - `next()` suspends until an envelope is available, the stream closed, or
///   it failed. After it returns `false`, check `err()`. It never returns
///   `true` again afterwards.
/// - `current()` returns the envelope selected by the last successful `next()`.
/// - `close()` is idempotent and may be called from any task, concurrently
///   with `next()`.
#[async_trait]
pub trait Response: Send + Sync {
    async fn next(&self) -> bool;

    fn current(&self) -> OperationResponse;

    async fn close(&self);

    fn err(&self) -> Option<Error>;

    fn done(&self) -> DoneSignal;
}

/// Shared handle to a response.
pub type ResponseRef = Arc<dyn Response>;

/// Identity comparison of two response handles.
pub fn same_response(a: &ResponseRef, b: &ResponseRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Adapt a response into a `Stream` of envelopes. A terminal error is yielded
/// once as the last item.
pub fn into_stream(res: ResponseRef) -> BoxStream<'static, OperationResponse> {
    let stream = futures::stream::unfold(Some(res), |state| async move {
        let res = state?;
        if res.next().await {
            let item = res.current();
            Some((Ok(item), Some(res)))
        } else {
            res.err().map(|e| (Err(e), None))
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn done_signal_fires_once_for_every_clone() {
        let signal = DoneSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_done());
        signal.fire();
        signal.fire();
        clone.wait().await;
        assert!(clone.is_done());
        assert!(DoneSignal::fired().is_done());
    }

    #[tokio::test]
    async fn identity_is_by_handle() {
        let a: ResponseRef = Arc::new(SingleResponse::new(OperationResponse::default()));
        let b: ResponseRef = Arc::new(SingleResponse::new(OperationResponse::default()));
        assert!(same_response(&a, &a.clone()));
        assert!(!same_response(&a, &b));
    }

    #[tokio::test]
    async fn stream_adapter_yields_items_then_terminal_error() {
        let res = Arc::new(ChanResponse::new());
        let producer = res.clone();
        tokio::spawn(async move {
            producer.send(OperationResponse::from_data(json!(1))).await;
            producer.close_with_error(Error::NoResponse);
        });

        let items: Vec<_> = into_stream(res).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().data, Some(json!(1)));
        assert!(matches!(items[1], Err(Error::NoResponse)));
    }
}
