//! Optional interceptor hooks around client calls.
//!
//! Transports already handle retry and reconnection. Interceptors are for the
//! application side: logging, metrics, auditing, custom business hooks. They
//! observe calls and never alter them.

use async_trait::async_trait;

use crate::types::{OperationKind, OperationResponse, Request};
use crate::Error;

/// Request summary passed to interceptors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: OperationKind,
    pub operation_name: Option<String>,
}

impl From<&Request> for RequestContext {
    fn from(req: &Request) -> Self {
        Self {
            operation: req.operation,
            operation_name: req.operation_name.clone(),
        }
    }
}

/// Hooks run around every client call, in registration order.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, _ctx: &RequestContext, _req: &Request) {}

    /// The envelope the call resolved to, application errors included.
    async fn on_response(&self, _ctx: &RequestContext, _req: &Request, _resp: &OperationResponse) {}

    async fn on_error(&self, _ctx: &RequestContext, _req: &Request, _err: &Error) {}
}

/// Ordered set of interceptors.
pub struct InterceptorPipeline {
    pub(crate) interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run hooks around `f`, which performs the call and resolves to one envelope.
    pub async fn execute<F, Fut>(&self, req: &Request, f: F) -> Result<OperationResponse, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<OperationResponse, Error>>,
    {
        let ctx = RequestContext::from(req);
        self.request(&ctx, req).await;

        match f().await {
            Ok(resp) => {
                for ic in &self.interceptors {
                    ic.on_response(&ctx, req, &resp).await;
                }
                Ok(resp)
            }
            Err(err) => {
                self.error(&ctx, req, &err).await;
                Err(err)
            }
        }
    }

    pub(crate) async fn request(&self, ctx: &RequestContext, req: &Request) {
        for ic in &self.interceptors {
            ic.on_request(ctx, req).await;
        }
    }

    pub(crate) async fn error(&self, ctx: &RequestContext, req: &Request, err: &Error) {
        for ic in &self.interceptors {
            ic.on_error(ctx, req, err).await;
        }
    }
}

impl Default for InterceptorPipeline {
    fn default() -> Self {
        Self::new()
    }
}
