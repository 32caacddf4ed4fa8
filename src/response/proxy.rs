//! Response proxy: forwards upstream responses into one caller-visible stream.
//!
//! An interceptor binds the upstream it got from the wrapped transport. When
//! it decides to retry, it binds the replacement *before* unbinding the
//! failed upstream, so the binding set never passes through empty and the
//! consumer never sees a seam.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{same_response, ChanResponse, DoneSignal, Response, ResponseRef};
use crate::types::OperationResponse;
use crate::Error;

/// What the forwarding loop does with an upstream envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    /// Deliver the envelope to the proxy's consumer (if the binding is still active).
    Forward,
    /// Drop the envelope. Typically paired with a rebind.
    Suppress,
}

/// Per-item interception hook of a binding.
///
/// Hooks may rebind through `proxy.bind(..)` / `proxy.unbind(..)`; after the
/// hook returns, the forwarding loop re-checks whether `upstream` is still
/// bound and stops if it is not.
#[async_trait]
pub trait ItemHook: Send + Sync {
    async fn on_item(
        &self,
        proxy: &Arc<ProxyResponse>,
        upstream: &ResponseRef,
        item: &OperationResponse,
    ) -> ItemAction;
}

/// Default hook: forward everything.
pub struct ForwardAll;

#[async_trait]
impl ItemHook for ForwardAll {
    async fn on_item(
        &self,
        _proxy: &Arc<ProxyResponse>,
        _upstream: &ResponseRef,
        _item: &OperationResponse,
    ) -> ItemAction {
        ItemAction::Forward
    }
}

pub struct ProxyResponse {
    target: ChanResponse,
    bindings: RwLock<Vec<ResponseRef>>,
}

impl ProxyResponse {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            target: ChanResponse::new(),
            bindings: RwLock::new(Vec::new()),
        })
    }

    /// Register `upstream` and start forwarding it. `None` forwards every item.
    pub fn bind(self: &Arc<Self>, upstream: ResponseRef, hook: Option<Arc<dyn ItemHook>>) {
        let hook = hook.unwrap_or_else(|| Arc::new(ForwardAll));
        self.bindings.write().push(upstream.clone());
        trace!(bindings = self.bindings.read().len(), "proxy bind");

        let proxy = Arc::clone(self);
        tokio::spawn(proxy.forward(upstream, hook));
    }

    /// Remove the binding for `upstream`. Closes the proxy when this empties
    /// the binding set.
    pub async fn unbind(&self, upstream: &ResponseRef) {
        let (before, after) = {
            let mut bindings = self.bindings.write();
            let before = bindings.len();
            bindings.retain(|b| !same_response(b, upstream));
            (before, bindings.len())
        };
        trace!(before, after, "proxy unbind");

        if before != after && after == 0 {
            self.close().await;
        }
    }

    pub fn bound(&self, upstream: &ResponseRef) -> bool {
        self.bindings
            .read()
            .iter()
            .any(|b| same_response(b, upstream))
    }

    /// Terminate the proxy with `err` as its terminal error.
    pub fn close_with_error(&self, err: Error) {
        self.target.close_with_error(err);
    }

    async fn forward(self: Arc<Self>, upstream: ResponseRef, hook: Arc<dyn ItemHook>) {
        // Closing the proxy closes the upstream too.
        {
            let upstream = upstream.clone();
            let upstream_done = upstream.done();
            let proxy_done = self.target.done();
            tokio::spawn(async move {
                tokio::select! {
                    _ = upstream_done.wait() => {}
                    _ = proxy_done.wait() => upstream.close().await,
                }
            });
        }

        while upstream.next().await {
            let item = upstream.current();
            let action = hook.on_item(&self, &upstream, &item).await;

            if action == ItemAction::Forward && self.bound(&upstream) {
                self.target.send(item).await;
            }

            if !self.bound(&upstream) {
                break;
            }
        }

        if self.bound(&upstream) {
            if let Some(err) = upstream.err() {
                self.target.close_with_error(err);
            }
        }

        self.unbind(&upstream).await;
    }
}

#[async_trait]
impl Response for ProxyResponse {
    async fn next(&self) -> bool {
        self.target.next().await
    }

    fn current(&self) -> OperationResponse {
        self.target.current()
    }

    async fn close(&self) {
        self.target.close().await
    }

    fn err(&self) -> Option<Error> {
        self.target.err()
    }

    fn done(&self) -> DoneSignal {
        self.target.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::SingleResponse;
    use serde_json::json;
    use std::time::Duration;

    fn upstream_of(items: Vec<OperationResponse>, then_err: Option<Error>) -> Arc<ChanResponse> {
        let res = Arc::new(ChanResponse::new());
        let producer = res.clone();
        tokio::spawn(async move {
            for item in items {
                producer.send(item).await;
            }
            match then_err {
                Some(e) => producer.close_with_error(e),
                None => producer.close_channel(),
            }
        });
        res
    }

    async fn drain(res: &dyn Response) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while res.next().await {
            out.push(res.current().data.unwrap_or_default());
        }
        out
    }

    #[tokio::test]
    async fn forwards_a_single_upstream_and_closes_after_it() {
        let proxy = ProxyResponse::new();
        let up = upstream_of(
            (0..3).map(|i| OperationResponse::from_data(json!(i))).collect(),
            None,
        );
        proxy.bind(up, None);

        assert_eq!(drain(proxy.as_ref()).await, vec![json!(0), json!(1), json!(2)]);
        assert!(proxy.err().is_none());
        assert!(!proxy.next().await);
    }

    #[tokio::test]
    async fn upstream_error_becomes_terminal() {
        let proxy = ProxyResponse::new();
        let up = upstream_of(vec![OperationResponse::from_data(json!("a"))], Some(Error::NoResponse));
        proxy.bind(up, None);

        assert_eq!(drain(proxy.as_ref()).await, vec![json!("a")]);
        assert!(matches!(proxy.err(), Some(Error::NoResponse)));
    }

    struct SwapOnFirst {
        replacement: parking_lot::Mutex<Option<ResponseRef>>,
    }

    #[async_trait]
    impl ItemHook for SwapOnFirst {
        async fn on_item(
            &self,
            proxy: &Arc<ProxyResponse>,
            upstream: &ResponseRef,
            _item: &OperationResponse,
        ) -> ItemAction {
            let replacement = self.replacement.lock().take();
            match replacement {
                Some(next) => {
                    proxy.bind(next, None);
                    proxy.unbind(upstream).await;
                    upstream.close().await;
                    ItemAction::Suppress
                }
                None => ItemAction::Forward,
            }
        }
    }

    #[tokio::test]
    async fn rebind_suppresses_the_superseded_upstream() {
        let proxy = ProxyResponse::new();
        let failing = upstream_of(
            vec![
                OperationResponse::from_data(json!("stale-1")),
                OperationResponse::from_data(json!("stale-2")),
            ],
            None,
        );
        let replacement: ResponseRef =
            Arc::new(SingleResponse::new(OperationResponse::from_data(json!("fresh"))));
        let hook = Arc::new(SwapOnFirst {
            replacement: parking_lot::Mutex::new(Some(replacement)),
        });
        let failing: ResponseRef = failing;
        proxy.bind(failing.clone(), Some(hook));

        let seen = tokio::time::timeout(Duration::from_secs(2), drain(proxy.as_ref()))
            .await
            .unwrap();
        assert_eq!(seen, vec![json!("fresh")]);
        assert!(!proxy.bound(&failing));
        assert!(failing.done().is_done());
    }

    #[tokio::test]
    async fn closing_the_proxy_closes_upstreams() {
        let proxy = ProxyResponse::new();
        let up = Arc::new(ChanResponse::new());
        let up_ref: ResponseRef = up.clone();
        proxy.bind(up_ref.clone(), None);
        assert!(proxy.bound(&up_ref));

        proxy.close().await;
        tokio::time::timeout(Duration::from_secs(1), up.done().wait())
            .await
            .unwrap();
        assert!(!proxy.next().await);
    }

    #[tokio::test]
    async fn unbinding_an_unknown_upstream_is_a_no_op() {
        let proxy = ProxyResponse::new();
        let stranger: ResponseRef = Arc::new(SingleResponse::new(OperationResponse::default()));
        proxy.unbind(&stranger).await;
        assert!(!proxy.done().is_done());
        proxy.close().await;
    }
}
