//! JSON-RPC 2.0 message model.
//!
//! `params` and `result` payloads stay as [`serde_json::Value`] trees until a
//! caller converts them into one of the typed shapes in
//! [`crate::models::protocol`] with [`serde_json::from_value`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC "invalid params".
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "internal error".
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier: either a number or a string, echoed verbatim by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id; the engine allocates these for outbound requests.
    Number(i64),
    /// String id, as some agents use for their own requests.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload; agents often nest a provider error here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error without `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` for an inbound method the host does not handle.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    /// `-32602` for inbound params that do not match the expected shape.
    #[must_use]
    pub fn invalid_params(detail: impl Display) -> Self {
        Self::new(INVALID_PARAMS, format!("invalid params: {detail}"))
    }

    /// `-32603` wrapping a handler failure.
    #[must_use]
    pub fn internal(detail: impl Display) -> Self {
        Self::new(INTERNAL_ERROR, detail.to_string())
    }

    /// Best human-readable message, unwrapping a nested provider error in `data`.
    ///
    /// Recognized shapes of `data`: `{"message": …}`, `{"error": {"message": …}}`,
    /// and a string holding JSON of either shape. Anything else falls back to
    /// the top-level `message`.
    #[must_use]
    pub fn provider_message(&self) -> String {
        self.data
            .as_ref()
            .and_then(nested_message)
            .unwrap_or_else(|| self.message.clone())
    }
}

fn nested_message(data: &Value) -> Option<String> {
    match data {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .and_then(|parsed| nested_message(&parsed)),
        Value::Object(map) => {
            if let Some(inner) = map.get("error") {
                if let Some(msg) = nested_message(inner) {
                    return Some(msg);
                }
            }
            map.get("message")
                .and_then(Value::as_str)
                .filter(|msg| !msg.is_empty())
                .map(str::to_owned)
        }
        _ => None,
    }
}

/// An outbound or inbound request that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// Method name, e.g. `session/prompt`.
    pub method: String,
    /// Arbitrary parameters.
    pub params: Option<Value>,
}

/// A response to a request.
///
/// `result` distinguishes an explicit `"result": null` (`Some(Value::Null)`)
/// from a missing member (`None`).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered; `None` for `"id": null`.
    pub id: Option<RequestId>,
    /// Success payload.
    pub result: Option<Value>,
    /// Failure payload.
    pub error: Option<RpcError>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }
}

/// A one-way message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name, e.g. `session/update`.
    pub method: String,
    /// Arbitrary parameters.
    pub params: Option<Value>,
}

/// Any JSON-RPC message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Has both `method` and `id`.
    Request(Request),
    /// Anything without a `method`.
    Response(Response),
    /// Has `method` but no `id`.
    Notification(Notification),
}
