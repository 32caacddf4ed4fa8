use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::Transport;
use crate::response::ResponseRef;
use crate::types::Request;
use crate::{Error, ErrorContext, Result};

type Handler = dyn Fn(&Request) -> Result<ResponseRef> + Send + Sync;

/// In-memory transport answering by exact query text.
///
/// Useful for exercising code built on [`Client`](crate::Client) without a server.
///
/// ```rust
/// use std::sync::Arc;
/// use gql_transport::response::{ResponseRef, SingleResponse};
/// use gql_transport::transport::MockTransport;
/// use gql_transport::types::OperationResponse;
///
/// let mock = MockTransport::new().on("query { ping }", |_req| {
///     let res: ResponseRef = Arc::new(SingleResponse::new(OperationResponse::from_data(
///         serde_json::json!({"ping": "pong"}),
///     )));
///     Ok(res)
/// });
/// # let _ = mock;
/// ```
#[derive(Default, Clone)]
pub struct MockTransport {
    handlers: HashMap<String, Arc<Handler>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, query: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<ResponseRef> + Send + Sync + 'static,
    {
        self.handlers.insert(query.into(), Arc::new(handler));
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        match self.handlers.get(&req.query) {
            Some(handler) => handler(&req),
            None => Err(Error::runtime_with_context(
                "no mock handler for query",
                ErrorContext::new()
                    .with_field_path("request.query")
                    .with_details(req.query.clone())
                    .with_source("mock_transport"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::SingleResponse;
    use crate::types::OperationResponse;

    #[tokio::test]
    async fn unknown_query_is_a_dispatch_error() {
        let mock = MockTransport::new().on("{ a }", |_| {
            let res: ResponseRef = Arc::new(SingleResponse::new(OperationResponse::default()));
            Ok(res)
        });

        assert!(mock.request(Request::query("{ a }")).await.is_ok());
        let err = mock.request(Request::query("{ b }")).await.err().unwrap();
        assert_eq!(
            err.context().and_then(|c| c.details.as_deref()),
            Some("{ b }")
        );
    }
}
