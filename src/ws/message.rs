//! Wire frames of the `graphql-ws` protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{GqlError, GqlErrors, OperationResponse, Request};
use crate::Result;

/// Frame type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ConnectionInit,
    ConnectionAck,
    #[serde(alias = "conn_err")]
    ConnectionError,
    Start,
    Stop,
    Data,
    Error,
    Complete,
    #[serde(rename = "ka")]
    KeepAlive,
    ConnectionTerminate,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ConnectionInit => "connection_init",
            MessageType::ConnectionAck => "connection_ack",
            MessageType::ConnectionError => "connection_error",
            MessageType::Start => "start",
            MessageType::Stop => "stop",
            MessageType::Data => "data",
            MessageType::Error => "error",
            MessageType::Complete => "complete",
            MessageType::KeepAlive => "ka",
            MessageType::ConnectionTerminate => "connection_terminate",
            MessageType::Unknown => "unknown",
        }
    }
}

/// `{id?, type, payload?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            id: None,
            kind,
            payload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn connection_init(params: Option<Value>) -> Self {
        Self {
            payload: params,
            ..Self::new(MessageType::ConnectionInit)
        }
    }

    pub fn start(id: &str, req: &Request) -> Result<Self> {
        let payload = serde_json::to_value(req.to_operation_request())?;
        Ok(Self::new(MessageType::Start).with_id(id).with_payload(payload))
    }

    pub fn stop(id: &str) -> Self {
        Self::new(MessageType::Stop).with_id(id)
    }

    pub fn terminate() -> Self {
        Self::new(MessageType::ConnectionTerminate)
    }

    /// Envelope carried by a `data` or `error` frame.
    ///
    /// Never fails: a payload that cannot be read as an envelope becomes a
    /// single error entry. `error` frames may also carry a bare error object
    /// or a list of them.
    pub fn envelope(&self) -> OperationResponse {
        let Some(payload) = &self.payload else {
            return match self.kind {
                MessageType::Error => OperationResponse::from_errors(vec![GqlError::new(
                    "operation failed without an error payload",
                )]),
                _ => OperationResponse::default(),
            };
        };

        if self.kind == MessageType::Error && (payload.is_array() || payload.get("message").is_some()) {
            return error_payload(payload);
        }
        if !payload.is_object() {
            return OperationResponse::from_errors(vec![GqlError::new(format!(
                "unexpected payload: {}",
                payload
            ))]);
        }

        OperationResponse::from_value_lossy(payload.clone())
    }
}

fn error_payload(payload: &Value) -> OperationResponse {
    if let Ok(list) = serde_json::from_value::<Vec<GqlError>>(payload.clone()) {
        return OperationResponse::from_errors(GqlErrors(list));
    }
    if let Ok(single) = serde_json::from_value::<GqlError>(payload.clone()) {
        return OperationResponse::from_errors(vec![single]);
    }
    OperationResponse::from_errors(vec![GqlError::new(payload.to_string())])
}

impl fmt::Display for OperationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id.as_deref().unwrap_or("-"), self.kind.as_str())?;
        if let Some(payload) = &self.payload {
            write!(f, " {}", payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> OperationMessage {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn known_and_unknown_types() {
        assert_eq!(parse(json!({"type": "ka"})).kind, MessageType::KeepAlive);
        assert_eq!(parse(json!({"type": "conn_err"})).kind, MessageType::ConnectionError);
        assert_eq!(
            parse(json!({"type": "connection_error"})).kind,
            MessageType::ConnectionError
        );
        assert_eq!(parse(json!({"type": "next"})).kind, MessageType::Unknown);
    }

    #[test]
    fn start_frame_shape() {
        let req = Request::subscription("subscription { tick }").with_operation_name("Tick");
        let msg = OperationMessage::start("7", &req).unwrap();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "id": "7",
                "type": "start",
                "payload": {"query": "subscription { tick }", "operationName": "Tick"}
            })
        );
        assert_eq!(
            serde_json::to_value(OperationMessage::terminate()).unwrap(),
            json!({"type": "connection_terminate"})
        );
    }

    #[test]
    fn data_payload_becomes_envelope() {
        let msg = parse(json!({"id": "1", "type": "data", "payload": {"data": {"n": 0}}}));
        assert_eq!(msg.envelope().data, Some(json!({"n": 0})));
    }

    #[test]
    fn undecodable_data_payload_becomes_an_error_entry() {
        let msg = parse(json!({"id": "1", "type": "data", "payload": {"errors": "nope"}}));
        let env = msg.envelope();
        assert!(env.data.is_none());
        assert_eq!(env.errors.len(), 1);
    }

    #[test]
    fn error_frame_with_bare_error_object() {
        let msg = parse(json!({"id": "1", "type": "error", "payload": {"message": "invalid room"}}));
        assert_eq!(msg.envelope().errors.to_string(), "invalid room");

        let msg = parse(json!({"id": "1", "type": "error", "payload": [{"message": "a"}, {"message": "b"}]}));
        assert_eq!(msg.envelope().errors.len(), 2);
    }
}
