use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};
use url::Url;

use super::Transport;
use crate::response::{ResponseRef, SingleResponse};
use crate::types::{OperationResponse, Request};
use crate::{Error, ErrorContext, Result, TransportError};

/// Decoration hook applied to every outgoing request (auth headers, tracing ids, ...).
pub type RequestOption = Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

/// GraphQL over HTTP: one POST per operation, one envelope back.
///
/// Every failure (I/O, cancellation, undecodable body) is returned from
/// [`Transport::request`]; the resulting response never carries an error.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    headers: HeaderMap,
    request_options: Vec<RequestOption>,
}

impl HttpTransport {
    /// Transport with default settings (env-overridable timeout).
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn builder(url: impl AsRef<str>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(url.as_ref())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn prepare(&self, payload: Vec<u8>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload);

        for option in &self.request_options {
            builder = option(builder);
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        let payload = serde_json::to_vec(&req.to_operation_request())?;
        debug!(
            url = %self.url,
            operation = %req.operation,
            operation_name = req.operation_name.as_deref().unwrap_or(""),
            "http request"
        );

        let response = tokio::select! {
            res = self.prepare(payload).send() => res.map_err(TransportError::from)?,
            _ = req.context.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status();
        let body = tokio::select! {
            res = response.bytes() => res.map_err(TransportError::from)?,
            _ = req.context.cancelled() => return Err(Error::Cancelled),
        };

        // Error statuses still count when the server sent a GraphQL envelope.
        let envelope = match serde_json::from_slice::<OperationResponse>(&body) {
            Ok(envelope)
                if status.is_success() || envelope.data.is_some() || envelope.has_errors() =>
            {
                envelope
            }
            Err(e) if status.is_success() => {
                return Err(Error::Serialization(format!("decode response body: {}", e)));
            }
            _ => {
                warn!(url = %self.url, status = status.as_u16(), "http request failed");
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                }
                .into());
            }
        };

        Ok(Arc::new(SingleResponse::new(envelope)))
    }
}

/// Builder for [`HttpTransport`].
pub struct HttpTransportBuilder {
    url: String,
    client: Option<reqwest::Client>,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
    request_options: Vec<RequestOption>,
}

impl HttpTransportBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: None,
            timeout: None,
            headers: Vec::new(),
            request_options: Vec::new(),
        }
    }

    /// Reuse an existing client (connection pool, proxy settings, TLS roots).
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Per-request timeout. Defaults to `GQL_HTTP_TIMEOUT_SECS` or 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn request_option<F>(mut self, option: F) -> Self
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync + 'static,
    {
        self.request_options.push(Arc::new(option));
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let url = Url::parse(&self.url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid endpoint url: {}", e),
                ErrorContext::new().with_field_path("url").with_source(self.url.clone()),
            )
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid header name: {}", e),
                    ErrorContext::new().with_field_path(format!("headers.{}", name)),
                )
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid header value: {}", e),
                    ErrorContext::new().with_field_path(format!("headers.{}", name)),
                )
            })?;
            headers.append(header_name, header_value);
        }

        let timeout = self.timeout.unwrap_or_else(|| {
            Duration::from_secs(
                env::var("GQL_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(30),
            )
        });

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .pool_idle_timeout(Some(Duration::from_secs(90)))
                .build()
                .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?,
        };

        Ok(HttpTransport {
            client,
            url,
            timeout,
            headers,
            request_options: self.request_options,
        })
    }
}
