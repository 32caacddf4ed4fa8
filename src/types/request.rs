//! Outgoing operation types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Kind of GraphQL operation. Drives routing and whether several results are expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operation handed to a [`Transport`](crate::transport::Transport).
///
/// Transports receive requests by value. A transport that needs a variant
/// (APQ strips the query text, for instance) builds a modified clone and never
/// touches the caller's copy.
#[derive(Debug, Clone)]
pub struct Request {
    /// Cancelling this token abandons the request and tears down its response.
    pub context: CancellationToken,
    pub operation: OperationKind,
    pub operation_name: Option<String>,
    pub query: String,
    pub variables: Option<Map<String, Value>>,
    pub extensions: Option<Map<String, Value>>,
}

impl Request {
    pub fn new(operation: OperationKind, query: impl Into<String>) -> Self {
        Self {
            context: CancellationToken::new(),
            operation,
            operation_name: None,
            query: query.into(),
            variables: None,
            extensions: None,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, query)
    }

    pub fn mutation(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, query)
    }

    pub fn subscription(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Subscription, query)
    }

    /// Bind the request to a caller-owned cancellation token.
    pub fn with_context(mut self, context: CancellationToken) -> Self {
        self.context = context;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Set a single variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn has_extension(&self, key: &str) -> bool {
        self.extensions
            .as_ref()
            .map(|ext| ext.contains_key(key))
            .unwrap_or(false)
    }

    /// Wire body for this request.
    pub fn to_operation_request(&self) -> OperationRequest {
        OperationRequest {
            query: self.query.clone(),
            operation_name: self.operation_name.clone(),
            variables: self.variables.clone(),
            extensions: self.extensions.clone(),
        }
    }
}

/// Operation body as sent over HTTP and inside a WS `start` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub query: String,
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}
