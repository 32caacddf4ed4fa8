use std::sync::Arc;

use crate::client::core::Client;
use crate::extensions::ApqTransport;
use crate::transport::{split_subscription, HttpTransport, Transport};
use crate::ws::WsTransport;
use crate::{Error, ErrorContext, Result};

#[cfg(feature = "interceptors")]
use crate::interceptors::{Interceptor, InterceptorPipeline};

/// Builder for [`Client`].
///
/// Either hand it a ready transport, or an HTTP endpoint (plus optionally a
/// WebSocket transport for subscriptions) and let it assemble the stack.
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    http_url: Option<String>,
    subscriptions: Option<WsTransport>,
    apq: bool,
    #[cfg(feature = "interceptors")]
    interceptors: InterceptorPipeline,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            http_url: None,
            subscriptions: None,
            apq: false,
            #[cfg(feature = "interceptors")]
            interceptors: InterceptorPipeline::new(),
        }
    }

    /// Use `transport` for every operation. Takes precedence over [`ClientBuilder::http`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Send queries and mutations to this HTTP endpoint.
    pub fn http(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Route subscriptions to `ws`. The caller still drives `ws.run()` / `ws.start()`.
    pub fn subscriptions(mut self, ws: WsTransport) -> Self {
        self.subscriptions = Some(ws);
        self
    }

    /// Wrap the transport with automatic persisted queries.
    pub fn apq(mut self, enable: bool) -> Self {
        self.apq = enable;
        self
    }

    #[cfg(feature = "interceptors")]
    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.with(interceptor);
        self
    }

    pub fn build(self) -> Result<Client> {
        let base: Arc<dyn Transport> = match (self.transport, self.http_url) {
            (Some(t), _) => t,
            (None, Some(url)) => Arc::new(HttpTransport::new(&url)?),
            (None, None) => {
                return Err(Error::configuration_with_context(
                    "client needs a transport or an HTTP endpoint",
                    ErrorContext::new().with_field_path("transport"),
                ))
            }
        };

        let mut transport = match self.subscriptions {
            Some(ws) => split_subscription(Arc::new(ws), base),
            None => base,
        };
        if self.apq {
            transport = Arc::new(ApqTransport::new(transport));
        }

        let client = Client::new(transport);
        #[cfg(feature = "interceptors")]
        let client = {
            let mut client = client;
            if !self.interceptors.is_empty() {
                client.interceptors = Some(Arc::new(self.interceptors));
            }
            client
        };
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
