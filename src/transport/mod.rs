//! Transports: the seam between the client and a wire protocol.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HttpTransport`] | One POST per request, single-shot response |
//! | [`crate::ws::WsTransport`] | Persistent WebSocket multiplexing many operations |
//! | [`split`] / [`split_subscription`] | Route requests to one of several transports |
//! | [`FuncTransport`] | Adapt a closure into a transport |
//! | [`MockTransport`] | Canned responses keyed by query text |

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::response::ResponseRef;
use crate::types::Request;
use crate::Result;

pub mod http;
pub mod mock;
pub mod split;

pub use http::{HttpTransport, HttpTransportBuilder};
pub use mock::MockTransport;
pub use split::{split, split_subscription};

/// Issue one operation and hand back its response stream.
///
/// `Err` means the request could not be dispatched at all. Failures discovered
/// while streaming are reported through the response's `err()`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, req: Request) -> Result<ResponseRef>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        (**self).request(req).await
    }
}

type RequestFn = dyn Fn(Request) -> BoxFuture<'static, Result<ResponseRef>> + Send + Sync;

/// Transport backed by a closure.
pub struct FuncTransport {
    func: Box<RequestFn>,
}

impl FuncTransport {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseRef>> + Send + 'static,
    {
        Self {
            func: Box::new(move |req| Box::pin(func(req))),
        }
    }
}

#[async_trait]
impl Transport for FuncTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        (self.func)(req).await
    }
}
