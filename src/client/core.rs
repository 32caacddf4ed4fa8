use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::builder::ClientBuilder;
use crate::response::ResponseRef;
use crate::transport::Transport;
use crate::types::{OperationKind, OperationResponse, Request};
use crate::{Error, Result};

#[cfg(feature = "interceptors")]
use crate::interceptors::{InterceptorPipeline, RequestContext};

/// GraphQL client over any [`Transport`].
///
/// `query` and `mutate` resolve to exactly one envelope; `subscribe` hands back
/// the live stream. Every call ties the request's cancellation context to the
/// response: cancelling it closes the response even when nobody is pulling.
#[derive(Clone)]
pub struct Client {
    pub(crate) transport: Arc<dyn Transport>,
    #[cfg(feature = "interceptors")]
    pub(crate) interceptors: Option<Arc<InterceptorPipeline>>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            #[cfg(feature = "interceptors")]
            interceptors: None,
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run a query and decode its `data` into `T`.
    ///
    /// Errors in the envelope are returned as [`Error::Graphql`] even when
    /// `data` decoded fine.
    pub async fn query<T: DeserializeOwned>(&self, req: Request) -> Result<T> {
        let (data, _) = self.execute(as_kind(req, OperationKind::Query)).await?;
        Ok(data)
    }

    /// Like [`Client::query`], also returning the envelope's top-level `extensions`.
    pub async fn query_with_extensions<T: DeserializeOwned>(
        &self,
        req: Request,
    ) -> Result<(T, Option<Map<String, Value>>)> {
        self.execute(as_kind(req, OperationKind::Query)).await
    }

    pub async fn mutate<T: DeserializeOwned>(&self, req: Request) -> Result<T> {
        let (data, _) = self.execute(as_kind(req, OperationKind::Mutation)).await?;
        Ok(data)
    }

    /// Start a subscription. The caller pulls envelopes until `next()` is false.
    pub async fn subscribe(&self, req: Request) -> Result<ResponseRef> {
        let req = as_kind(req, OperationKind::Subscription);
        debug!(
            operation = %req.operation,
            operation_name = req.operation_name.as_deref().unwrap_or(""),
            "graphql subscribe"
        );

        #[cfg(feature = "interceptors")]
        if let Some(pipeline) = &self.interceptors {
            let ctx = RequestContext::from(&req);
            pipeline.request(&ctx, &req).await;
            return match self.dispatch(req.clone()).await {
                Ok(res) => Ok(res),
                Err(e) => {
                    pipeline.error(&ctx, &req, &e).await;
                    Err(e)
                }
            };
        }

        self.dispatch(req).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        req: Request,
    ) -> Result<(T, Option<Map<String, Value>>)> {
        debug!(
            operation = %req.operation,
            operation_name = req.operation_name.as_deref().unwrap_or(""),
            "graphql request"
        );

        #[cfg(feature = "interceptors")]
        let envelope = match &self.interceptors {
            Some(pipeline) => {
                pipeline
                    .execute(&req, || self.fetch_one(req.clone()))
                    .await?
            }
            None => self.fetch_one(req).await?,
        };
        #[cfg(not(feature = "interceptors"))]
        let envelope = self.fetch_one(req).await?;

        decode(envelope)
    }

    async fn dispatch(&self, req: Request) -> Result<ResponseRef> {
        let ctx = req.context.clone();
        let res = self.transport.request(req).await?;
        watch(ctx, res.clone());
        Ok(res)
    }

    /// Pull exactly one envelope and close the response.
    async fn fetch_one(&self, req: Request) -> Result<OperationResponse> {
        let ctx = req.context.clone();
        let res = self.dispatch(req).await?;

        let got = res.next().await;
        let envelope = got.then(|| res.current());
        res.close().await;

        match envelope {
            Some(envelope) => Ok(envelope),
            None if ctx.is_cancelled() => Err(Error::Cancelled),
            None => Err(res.err().unwrap_or(Error::NoResponse)),
        }
    }
}

fn as_kind(mut req: Request, kind: OperationKind) -> Request {
    req.operation = kind;
    req
}

/// Close `res` when `ctx` is cancelled. Ends on its own once `res` is done.
fn watch(ctx: CancellationToken, res: ResponseRef) {
    let done = res.done();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctx.cancelled() => res.close().await,
            _ = done.wait() => {}
        }
    });
}

fn decode<T: DeserializeOwned>(envelope: OperationResponse) -> Result<(T, Option<Map<String, Value>>)> {
    let data = envelope.data.unwrap_or(Value::Null);
    let decoded = serde_json::from_value::<T>(data);

    if !envelope.errors.is_empty() {
        return Err(Error::Graphql(envelope.errors));
    }
    Ok((decoded?, envelope.extensions))
}
