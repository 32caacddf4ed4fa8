use std::env;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::{Error, ErrorContext, Result};

/// Subprotocol token of the Apollo `subscriptions-transport-ws` protocol.
pub const GRAPHQL_WS: &str = "graphql-ws";

/// Settings of a [`WsTransport`](super::WsTransport).
///
/// Defaults come from the environment where a knob exists:
///
/// | Variable | Field | Default |
/// |----------|-------|---------|
/// | `GQL_WS_RETRY_TIMEOUT_SECS` | `retry_timeout` | 300 |
/// | `GQL_WS_TIMEOUT_SECS` | `read_timeout`, `write_timeout` | 60 |
/// | `GQL_WS_LOG` | `protocol_log` | off |
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Payload of the `connection_init` message (auth tokens and the like).
    pub connection_params: Option<Value>,
    /// How long to keep redialing before the run gives up.
    pub retry_timeout: Duration,
    /// Fixed delay between two dial attempts.
    pub retry_delay: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Emit every frame and state transition at `debug` instead of `trace`.
    pub protocol_log: bool,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
    pub subprotocol: String,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let io_timeout = Duration::from_secs(env_secs("GQL_WS_TIMEOUT_SECS").unwrap_or(60));
        Self {
            url: url.into(),
            connection_params: None,
            retry_timeout: Duration::from_secs(env_secs("GQL_WS_RETRY_TIMEOUT_SECS").unwrap_or(300)),
            retry_delay: Duration::from_secs(1),
            read_timeout: io_timeout,
            write_timeout: io_timeout,
            protocol_log: env_flag("GQL_WS_LOG"),
            headers: Vec::new(),
            subprotocol: GRAPHQL_WS.to_string(),
        }
    }

    pub fn with_connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        self
    }

    pub fn with_protocol_log(mut self, enabled: bool) -> Self {
        self.protocol_log = enabled;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Parse the endpoint, accepting only `ws` and `wss` schemes.
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid websocket url: {}", e),
                ErrorContext::new()
                    .with_field_path("ws.url")
                    .with_source(self.url.clone()),
            )
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::configuration_with_context(
                format!("unsupported websocket scheme '{}'", other),
                ErrorContext::new()
                    .with_field_path("ws.url")
                    .with_details("expected ws:// or wss://"),
            )),
        }
    }
}

fn env_secs(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = WsConfig::new("ws://localhost:8080/query");
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.subprotocol, "graphql-ws");
        assert!(cfg.connection_params.is_none());
        assert_eq!(cfg.endpoint().unwrap().port(), Some(8080));
    }

    #[test]
    fn rejects_http_scheme() {
        let err = WsConfig::new("http://localhost/query").endpoint().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("ws.url")
        );
    }
}
