use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::Transport;
use crate::response::ResponseRef;
use crate::types::{OperationKind, Request};
use crate::Result;

type Router = dyn Fn(&Request) -> Result<Arc<dyn Transport>> + Send + Sync;

struct SplitTransport {
    router: Box<Router>,
}

#[async_trait]
impl Transport for SplitTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        let transport = (self.router)(&req)?;
        transport.request(req).await
    }
}

/// Route every request through whatever transport `router` picks for it.
///
/// A router error is returned as the dispatch error of the request.
pub fn split<F>(router: F) -> Arc<dyn Transport>
where
    F: Fn(&Request) -> Result<Arc<dyn Transport>> + Send + Sync + 'static,
{
    Arc::new(SplitTransport {
        router: Box::new(router),
    })
}

/// Subscriptions go to `subscription`, queries and mutations to `other`.
///
/// The usual pairing is a [`WsTransport`](crate::ws::WsTransport) for
/// subscriptions and an [`HttpTransport`](super::HttpTransport) for the rest.
pub fn split_subscription(
    subscription: Arc<dyn Transport>,
    other: Arc<dyn Transport>,
) -> Arc<dyn Transport> {
    split(move |req| {
        trace!(operation = %req.operation, "split route");
        Ok(match req.operation {
            OperationKind::Subscription => subscription.clone(),
            OperationKind::Query | OperationKind::Mutation => other.clone(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::SingleResponse;
    use crate::transport::FuncTransport;
    use crate::types::OperationResponse;
    use crate::Error;
    use serde_json::json;

    fn labelled(label: &'static str) -> Arc<dyn Transport> {
        Arc::new(FuncTransport::new(move |_req| async move {
            let res: ResponseRef =
                Arc::new(SingleResponse::new(OperationResponse::from_data(json!(label))));
            Ok(res)
        }))
    }

    async fn route(t: &Arc<dyn Transport>, req: Request) -> serde_json::Value {
        let res = t.request(req).await.unwrap();
        assert!(res.next().await);
        res.current().data.unwrap()
    }

    #[tokio::test]
    async fn routes_by_operation_kind() {
        let t = split_subscription(labelled("ws"), labelled("http"));
        assert_eq!(route(&t, Request::subscription("subscription { a }")).await, json!("ws"));
        assert_eq!(route(&t, Request::query("{ a }")).await, json!("http"));
        assert_eq!(route(&t, Request::mutation("mutation { a }")).await, json!("http"));
    }

    #[tokio::test]
    async fn router_errors_are_dispatch_errors() {
        let t = split(|_req| Err(Error::NoResponse));
        let err = t.request(Request::query("{ a }")).await.err().unwrap();
        assert!(matches!(err, Error::NoResponse));
    }
}
