//! Wire format types shared by both transports.
//!
//! - [`RawOperation`] / [`Operation`]: the request document as posted or as
//!   carried in a `start` payload
//! - [`ExecutionResult`]: what the query engine produces, passed through untouched
//! - [`ClientMessage`] / [`ServerMessage`]: the WebSocket sub-protocol frames

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::GatewayError;

/// WebSocket sub-protocols the gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubProtocol {
    /// `graphql-transport-ws`: `next` frames, `ping`/`pong`
    GraphqlTransportWs,
    /// Legacy `graphql-ws` (subscriptions-transport-ws): `data` frames, `ka` keepalive
    GraphqlWs,
}

impl SubProtocol {
    pub const ALL: [SubProtocol; 2] = [SubProtocol::GraphqlTransportWs, SubProtocol::GraphqlWs];

    pub fn as_str(self) -> &'static str {
        match self {
            SubProtocol::GraphqlTransportWs => "graphql-transport-ws",
            SubProtocol::GraphqlWs => "graphql-ws",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(token))
    }

    /// Pick the first supported token, in client order, from one or more
    /// comma-separated `Sec-WebSocket-Protocol` header values.
    pub fn negotiate<'a>(offered: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        offered
            .into_iter()
            .flat_map(|value| value.split(','))
            .find_map(Self::from_token)
    }

    /// Frame carrying one subscription result.
    pub fn result_frame(self, id: String, payload: ExecutionResult) -> ServerMessage {
        match self {
            SubProtocol::GraphqlTransportWs => ServerMessage::Next { id, payload },
            SubProtocol::GraphqlWs => ServerMessage::Data { id, payload },
        }
    }
}

impl std::fmt::Display for SubProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request document before validation. Every field is optional so that a
/// well-formed body with no operation can be told apart from a malformed one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl RawOperation {
    /// Require a non-empty `query` document.
    pub fn into_operation(self) -> Result<Operation, GatewayError> {
        match self.query {
            Some(query) if !query.trim().is_empty() => Ok(Operation {
                query,
                operation_name: self.operation_name,
                variables: self.variables.unwrap_or_default(),
                extensions: self.extensions,
            }),
            _ => Err(GatewayError::OperationMissing),
        }
    }
}

/// A single unit of work for the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl Operation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Map::new(),
            extensions: None,
        }
    }
}

/// A located error inside an [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: &str) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: Some(serde_json::json!({ "code": code })),
        }
    }
}

/// One result from the query engine. The gateway never inspects `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![GraphQlError::new(message)],
            ..Self::default()
        }
    }
}

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        #[serde(default)]
        payload: Option<Value>,
    },
    #[serde(alias = "subscribe")]
    Start { id: String, payload: RawOperation },
    #[serde(alias = "complete")]
    Stop { id: String },
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default)]
        payload: Option<Value>,
    },
    ConnectionTerminate,
}

/// Outcome of decoding one text frame.
#[derive(Debug)]
pub enum Decoded {
    Message(ClientMessage),
    /// Not a recognisable frame. `id` is set when the frame named a subscription,
    /// so the error can be reported against it.
    Malformed { id: Option<String>, reason: String },
}

impl ClientMessage {
    pub fn decode(text: &str) -> Decoded {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                return Decoded::Malformed {
                    id: None,
                    reason: format!("Invalid JSON: {e}"),
                }
            }
        };
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<ClientMessage>(value) {
            Ok(msg) => Decoded::Message(msg),
            Err(e) => Decoded::Malformed {
                id,
                reason: format!("Invalid message: {e}"),
            },
        }
    }
}

/// Payload of `connection_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionError {
        payload: ErrorPayload,
    },
    Next {
        id: String,
        payload: ExecutionResult,
    },
    Data {
        id: String,
        payload: ExecutionResult,
    },
    Error {
        id: String,
        payload: Vec<GraphQlError>,
    },
    Complete {
        id: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    #[serde(rename = "ka")]
    KeepAlive,
}
