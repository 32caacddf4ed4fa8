//! Automatic persisted queries.
//!
//! The first attempt carries only `extensions.persistedQuery = {version: 1,
//! sha256Hash}` with an empty `query`. When the server answers with the
//! `PERSISTED_QUERY_NOT_FOUND` error code, the request is sent once more as the
//! caller built it, and the miss is never shown to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::response::{ItemAction, ItemHook, ProxyResponse, Response, ResponseRef};
use crate::transport::Transport;
use crate::types::{OperationResponse, Request};
use crate::Result;

/// Extension key of the persisted query hash.
pub const APQ_EXTENSION: &str = "persistedQuery";

/// Error code a server answers with when it does not know the hash.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PERSISTED_QUERY_NOT_FOUND";

/// Lowercase hex SHA-256 of the query text.
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Wraps a transport with automatic persisted queries.
pub struct ApqTransport {
    inner: Arc<dyn Transport>,
}

impl ApqTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }

    fn hashed(req: &Request) -> Request {
        if req.has_extension(APQ_EXTENSION) {
            return req.clone();
        }

        let mut hashed = req.clone().with_extension(
            APQ_EXTENSION,
            json!({"version": 1, "sha256Hash": query_hash(&req.query)}),
        );
        hashed.query = String::new();
        hashed
    }
}

#[async_trait]
impl Transport for ApqTransport {
    async fn request(&self, req: Request) -> Result<ResponseRef> {
        let upstream = self.inner.request(Self::hashed(&req)).await?;

        let proxy = ProxyResponse::new();
        let hook = Arc::new(RetryOnMiss {
            original: req,
            inner: self.inner.clone(),
        });
        proxy.bind(upstream, Some(hook));
        Ok(proxy)
    }
}

/// Rebinds the proxy to a full-query attempt on a persisted query miss.
struct RetryOnMiss {
    original: Request,
    inner: Arc<dyn Transport>,
}

#[async_trait]
impl ItemHook for RetryOnMiss {
    async fn on_item(
        &self,
        proxy: &Arc<ProxyResponse>,
        upstream: &ResponseRef,
        item: &OperationResponse,
    ) -> ItemAction {
        if !item.errors.has_code(PERSISTED_QUERY_NOT_FOUND) {
            return ItemAction::Forward;
        }
        debug!(
            operation_name = self.original.operation_name.as_deref().unwrap_or(""),
            "persisted query not found, resending full query"
        );

        match self.inner.request(self.original.clone()).await {
            // The replacement is bound before the miss is unbound so the proxy
            // never sees an empty binding set.
            Ok(retry) => proxy.bind(retry, None),
            Err(e) => proxy.close_with_error(e),
        }
        proxy.unbind(upstream).await;
        upstream.close().await;

        ItemAction::Suppress
    }
}
