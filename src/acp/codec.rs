//! Wire format of an agent stream: one JSON-RPC message per `\n`-terminated line.
//!
//! - [`Framer`] turns raw stdout bytes into decoded [`Message`]s. It keeps
//!   partial lines across reads and reports bad lines in place instead of
//!   stopping, so one garbled message never ends the session.
//! - [`decode_message`] classifies a line as request, notification, or
//!   response.
//! - [`encode_message`] produces the outbound line (without the newline).
//!
//! Line length is capped at [`MAX_LINE_BYTES`]; the remainder of an
//! oversize line is skipped up to its newline.
//!
//! A bad line surfaces as a [`DecodeError`]. When the line was recognisably
//! a response (no `method`, readable `id`) the error keeps that id so the
//! waiting caller can be failed instead of left hanging.

use std::fmt::{Display, Formatter};

use bytes::BytesMut;
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::models::message::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::{AppError, Result};

/// Longest accepted inbound line (1 MiB).
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// A line that could not be turned into a [`Message`].
#[derive(Debug)]
pub struct DecodeError {
    /// Id of the response this line was answering, when it could be read.
    pub response_id: Option<RequestId>,
    /// What was wrong with the line.
    pub error: AppError,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.response_id {
            Some(id) => write!(f, "{} (response {id})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<AppError> for DecodeError {
    fn from(error: AppError) -> Self {
        Self {
            response_id: None,
            error,
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        err.error
    }
}

/// Outcome of decoding one line.
pub type Decoded = std::result::Result<Message, DecodeError>;

/// Line splitter with the [`MAX_LINE_BYTES`] cap, errors mapped to [`AppError`].
#[derive(Debug)]
pub struct AcpCodec(LinesCodec);

impl AcpCodec {
    /// Splitter with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

/// Incremental framer: feed raw bytes, get one decoded message per complete line.
///
/// Partial lines stay buffered until their newline arrives. A line that is
/// not valid JSON yields an `Err` in its slot and the framer keeps going.
#[derive(Debug, Default)]
pub struct Framer {
    codec: AcpCodec,
    buffer: BytesMut,
}

impl Framer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and decode every line completed by them.
    ///
    /// Blank lines are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        out.push(decode_message(&line));
                    }
                }
                Ok(None) => break,
                Err(err) => out.push(Err(err.into())),
            }
        }
        out
    }

    /// Decode whatever is left once the stream has ended.
    ///
    /// A trailing line without a newline is still delivered.
    pub fn finish(&mut self) -> Vec<Decoded> {
        let mut out = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        out.push(decode_message(&line));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    out.push(Err(err.into()));
                    self.buffer.clear();
                    break;
                }
            }
        }
        out
    }

    /// Number of bytes waiting for a newline.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Parse one line into a [`Message`].
///
/// Classification: `method` + non-null `id` is a request, `method` alone is
/// a notification, anything else is a response.
///
/// # Errors
///
/// Returns a [`DecodeError`] holding [`AppError::Protocol`] when the line is
/// not a JSON object or a member has the wrong type. A response with a
/// malformed `error` member keeps its id in [`DecodeError::response_id`].
pub fn decode_message(line: &str) -> Decoded {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(AppError::Protocol("expected a json object per line".into()).into());
    };

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|e| AppError::Protocol(format!("invalid id: {e}")))?,
        ),
    };
    let params = obj.remove("params");

    match obj.remove("method") {
        Some(Value::String(method)) => Ok(match id {
            Some(id) => Message::Request(Request { id, method, params }),
            None => Message::Notification(Notification { method, params }),
        }),
        Some(other) => {
            Err(AppError::Protocol(format!("method must be a string, got {other}")).into())
        }
        None => {
            let error = match obj.remove("error") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(serde_json::from_value::<RpcError>(raw).map_err(|e| {
                    DecodeError {
                        response_id: id.clone(),
                        error: AppError::Protocol(format!("invalid error object: {e}")),
                    }
                })?),
            };
            Ok(Message::Response(Response {
                id,
                result: obj.remove("result"),
                error,
            }))
        }
    }
}

/// Serialize a [`Message`] to a single JSON line without the trailing newline.
///
/// `serde_json` escapes control characters inside strings, so the output
/// never contains a raw `\n`.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails.
pub fn encode_message(message: &Message) -> Result<String> {
    let mut obj = Map::new();
    obj.insert("jsonrpc".into(), Value::String("2.0".into()));

    match message {
        Message::Request(req) => {
            obj.insert("id".into(), serde_json::to_value(&req.id)?);
            obj.insert("method".into(), Value::String(req.method.clone()));
            if let Some(params) = &req.params {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Notification(note) => {
            obj.insert("method".into(), Value::String(note.method.clone()));
            if let Some(params) = &note.params {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Response(resp) => {
            let id = match &resp.id {
                Some(id) => serde_json::to_value(id)?,
                None => Value::Null,
            };
            obj.insert("id".into(), id);
            if let Some(result) = &resp.result {
                obj.insert("result".into(), result.clone());
            }
            if let Some(error) = &resp.error {
                obj.insert("error".into(), serde_json::to_value(error)?);
            }
        }
    }

    serde_json::to_string(&Value::Object(obj))
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
