//! Unit tests for NDJSON framing and JSON-RPC classification.
//!
//! Covers:
//! - partial delivery is buffered until the newline arrives
//! - several messages in one chunk are each decoded
//! - malformed and oversize lines are reported without ending the stream
//! - request / notification / response classification, including `id: null`
//! - a response with a garbled error object keeps its id
//! - encoding always yields a single `jsonrpc: "2.0"` line
//! - every message kind survives encode then decode unchanged

use serde_json::json;

use acp_engine::acp::codec::{decode_message, encode_message, DecodeError, Framer, MAX_LINE_BYTES};
use acp_engine::models::message::{Message, Notification, Request, RequestId, Response, RpcError};
use acp_engine::AppError;

// ── Framing ──────────────────────────────────────────────────────────────────

/// A message split across two reads is delivered once, after the newline.
#[test]
fn partial_line_is_buffered_until_newline() {
    let mut framer = Framer::new();

    let first = framer.feed(br#"{"jsonrpc":"2.0","method":"session/up"#);
    assert!(first.is_empty(), "no complete line yet");
    assert!(framer.pending_bytes() > 0);

    let second = framer.feed(b"date\",\"params\":{}}\n");
    assert_eq!(second.len(), 1);
    match second.into_iter().next().unwrap().unwrap() {
        Message::Notification(n) => assert_eq!(n.method, "session/update"),
        other => panic!("expected notification, got {other:?}"),
    }
    assert_eq!(framer.pending_bytes(), 0);
}

/// Three lines in one chunk decode in order; blank lines are skipped.
#[test]
fn batched_lines_decode_in_order() {
    let mut framer = Framer::new();
    let raw = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
        "\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n",
    );

    let decoded: Vec<Message> = framer
        .feed(raw.as_bytes())
        .into_iter()
        .map(|m| m.expect("valid line"))
        .collect();

    assert_eq!(decoded.len(), 3);
    assert!(matches!(decoded[0], Message::Response(_)));
    assert!(matches!(&decoded[1], Message::Notification(n) if n.method == "a"));
    assert!(matches!(&decoded[2], Message::Notification(n) if n.method == "b"));
}

/// A malformed line yields one error and the following line still decodes.
#[test]
fn malformed_line_does_not_poison_the_stream() {
    let mut framer = Framer::new();
    let decoded = framer.feed(b"{not json}\n{\"jsonrpc\":\"2.0\",\"method\":\"ok\"}\n");

    assert_eq!(decoded.len(), 2);
    assert!(matches!(
        &decoded[0],
        Err(DecodeError {
            response_id: None,
            error: AppError::Protocol(_)
        })
    ));
    assert!(matches!(&decoded[1], Ok(Message::Notification(n)) if n.method == "ok"));
}

/// An oversize line is rejected and framing resumes after its newline.
#[test]
fn oversize_line_is_skipped_and_framing_resumes() {
    let mut framer = Framer::new();
    let mut huge = vec![b'x'; MAX_LINE_BYTES + 16];
    huge.push(b'\n');

    let mut decoded = framer.feed(&huge);
    decoded.extend(framer.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"after\"}\n"));

    let errors = decoded.iter().filter(|m| m.is_err()).count();
    assert_eq!(errors, 1, "exactly one error for the oversize line");
    let last = decoded.pop().unwrap().expect("line after the oversize one decodes");
    assert!(matches!(last, Message::Notification(n) if n.method == "after"));
}

/// A final line without newline is delivered at end of stream.
#[test]
fn finish_delivers_unterminated_tail() {
    let mut framer = Framer::new();
    assert!(framer.feed(br#"{"jsonrpc":"2.0","method":"tail"}"#).is_empty());

    let tail = framer.finish();
    assert_eq!(tail.len(), 1);
    assert!(matches!(&tail[0], Ok(Message::Notification(n)) if n.method == "tail"));
}

// ── Classification ───────────────────────────────────────────────────────────

/// `method` + `id` is a request; string ids are preserved.
#[test]
fn method_with_id_is_a_request() {
    let message =
        decode_message(r#"{"jsonrpc":"2.0","id":"x-1","method":"fs/read_text_file","params":{"path":"/a"}}"#)
            .unwrap();
    match message {
        Message::Request(req) => {
            assert_eq!(req.id, RequestId::String("x-1".into()));
            assert_eq!(req.method, "fs/read_text_file");
            assert_eq!(req.params, Some(json!({"path": "/a"})));
        }
        other => panic!("expected request, got {other:?}"),
    }
}

/// `method` with `id: null` is treated as a notification.
#[test]
fn method_with_null_id_is_a_notification() {
    let message = decode_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
    assert!(matches!(message, Message::Notification(n) if n.method == "ping"));
}

/// An explicit `result: null` is kept distinct from a missing result.
#[test]
fn null_result_is_preserved() {
    let with_null = decode_message(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
    let Message::Response(resp) = with_null else {
        panic!("expected response");
    };
    assert_eq!(resp.id, Some(RequestId::Number(3)));
    assert_eq!(resp.result, Some(serde_json::Value::Null));

    let without = decode_message(r#"{"jsonrpc":"2.0","id":3}"#).unwrap();
    let Message::Response(resp) = without else {
        panic!("expected response");
    };
    assert_eq!(resp.result, None);
}

/// Error responses carry the structured error object.
#[test]
fn error_response_decodes_rpc_error() {
    let message = decode_message(
        r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32000,"message":"boom","data":{"message":"inner"}}}"#,
    )
    .unwrap();
    let Message::Response(resp) = message else {
        panic!("expected response");
    };
    let error = resp.error.expect("error member");
    assert_eq!(error.code, -32000);
    assert_eq!(error.provider_message(), "inner");
}

/// A JSON array is not a message.
#[test]
fn non_object_line_is_a_protocol_error() {
    for line in ["[1,2]", r#"{"method":5}"#, r#"{"id":{"x":1},"result":{}}"#] {
        let err = decode_message(line).expect_err(line);
        assert!(matches!(err.error, AppError::Protocol(_)), "{line}: {err}");
        assert_eq!(err.response_id, None, "{line}");
    }
}

/// A response whose `error` member is malformed still reports which request it answered.
#[test]
fn garbled_error_object_keeps_response_id() {
    let err = decode_message(r#"{"jsonrpc":"2.0","id":7,"error":{"code":"oops","message":5}}"#)
        .expect_err("error object has the wrong types");
    assert_eq!(err.response_id, Some(RequestId::Number(7)));
    assert!(matches!(err.error, AppError::Protocol(_)));
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encoded messages are one line and carry `jsonrpc: "2.0"`.
#[test]
fn encoded_message_is_single_line() {
    let message = Message::Request(Request {
        id: RequestId::Number(1),
        method: "session/prompt".into(),
        params: Some(json!({"prompt": [{"type": "text", "text": "line one\nline two"}]})),
    });

    let line = encode_message(&message).unwrap();
    assert!(!line.contains('\n'), "embedded newlines must be escaped");

    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["id"], 1);
    assert_eq!(value["method"], "session/prompt");
}

/// Error responses serialize `error` and omit `result`; notifications omit `id`.
#[test]
fn encoded_shapes_match_message_kind() {
    let failure = Message::Response(Response::failure(
        RequestId::from("a"),
        RpcError::method_not_found("x/y"),
    ));
    let value: serde_json::Value = serde_json::from_str(&encode_message(&failure).unwrap()).unwrap();
    assert_eq!(value["id"], "a");
    assert_eq!(value["error"]["code"], -32601);
    assert!(value.get("result").is_none());

    let note = Message::Notification(Notification {
        method: "session/cancel".into(),
        params: None,
    });
    let value: serde_json::Value = serde_json::from_str(&encode_message(&note).unwrap()).unwrap();
    assert!(value.get("id").is_none());
    assert!(value.get("params").is_none());
}

/// Every message kind decodes back to the value it was encoded from.
#[test]
fn encode_then_decode_is_identity() {
    let messages = vec![
        Message::Request(Request {
            id: RequestId::Number(0),
            method: "session/prompt".into(),
            params: Some(json!({
                "sessionId": "s-1",
                "prompt": [{"type": "text", "text": "two\nlines"}],
                "meta": {"nested": {"list": [1, 2.5, null, true]}}
            })),
        }),
        Message::Request(Request {
            id: RequestId::from("agent-7"),
            method: "fs/read_text_file".into(),
            params: Some(json!({"path": "/tmp/a.txt", "line": 3})),
        }),
        Message::Request(Request {
            id: RequestId::Number(42),
            method: "session/new".into(),
            params: None,
        }),
        Message::Notification(Notification {
            method: "session/update".into(),
            params: Some(json!({"sessionId": "s-1", "update": {"sessionUpdate": "plan", "entries": []}})),
        }),
        Message::Notification(Notification {
            method: "session/cancel".into(),
            params: None,
        }),
        Message::Response(Response::success(RequestId::Number(3), json!({"stopReason": "end_turn"}))),
        Message::Response(Response::success(RequestId::from("r-1"), serde_json::Value::Null)),
        Message::Response(Response::failure(
            RequestId::Number(4),
            RpcError::method_not_found("editor/open"),
        )),
        Message::Response(Response::failure(
            RequestId::from("r-2"),
            RpcError {
                code: -32000,
                message: "upstream".into(),
                data: Some(json!({"error": {"message": "rate limited"}})),
            },
        )),
    ];

    for message in messages {
        let line = encode_message(&message).expect("encodes");
        let decoded = decode_message(&line).unwrap_or_else(|err| panic!("{line}: {err}"));
        assert_eq!(decoded, message, "line was {line}");
    }
}
