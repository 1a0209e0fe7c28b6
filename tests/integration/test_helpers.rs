//! Shared helpers: an in-memory scripted agent on the far end of a duplex pipe.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

use acp_engine::acp::{AgentClient, ClientOptions};

/// How long a scripted step may wait before the test fails.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// The agent side of a connected client.
pub struct ScriptedAgent {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

/// Connect an [`AgentClient`] to a fresh scripted agent.
pub fn connect(options: ClientOptions) -> (AgentClient, ScriptedAgent) {
    let (host_end, agent_end) = tokio::io::duplex(1 << 16);
    let (host_read, host_write) = tokio::io::split(host_end);
    let (agent_read, agent_write) = tokio::io::split(agent_end);

    let client = AgentClient::connect(host_read, host_write, options);
    let agent = ScriptedAgent {
        lines: BufReader::new(agent_read).lines(),
        writer: agent_write,
    };
    (client, agent)
}

impl ScriptedAgent {
    /// Next message written by the host.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(STEP_TIMEOUT, self.lines.next_line())
            .await
            .expect("host wrote nothing in time")
            .expect("read from host")
            .expect("host closed the stream");
        serde_json::from_str(&line).expect("host wrote valid json")
    }

    /// Next message, asserting it is a request for `method`; returns it.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(message["jsonrpc"], "2.0");
        assert_eq!(message["method"], method, "unexpected message: {message}");
        assert!(message.get("id").is_some(), "{method} must carry an id");
        message
    }

    /// Whether the host closed its end.
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(STEP_TIMEOUT, self.lines.next_line()).await,
            Ok(Ok(None) | Err(_))
        )
    }

    /// Write one message to the host.
    pub async fn send(&mut self, message: Value) {
        let mut line = serde_json::to_string(&message).expect("serializable");
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write to host");
        self.writer.flush().await.expect("flush to host");
    }

    /// Answer `request` with `result`.
    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await;
    }

    /// Answer `request` with a JSON-RPC error.
    pub async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    /// Emit a `session/update` notification.
    pub async fn update(&mut self, session_id: &str, update: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": {"sessionId": session_id, "update": update}
        }))
        .await;
    }

    /// Emit an agent text chunk.
    pub async fn say(&mut self, session_id: &str, text: &str) {
        self.update(
            session_id,
            json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": text}}),
        )
        .await;
    }

    /// Answer `initialize` (no auth methods) and `session/new`.
    pub async fn handshake(&mut self, session_id: &str) {
        let init = self.expect_request("initialize").await;
        self.reply(&init, json!({"protocolVersion": 1, "authMethods": []}))
            .await;
        let new = self.expect_request("session/new").await;
        self.reply(&new, json!({"sessionId": session_id})).await;
    }

    /// Drop the agent end entirely.
    pub fn hang_up(self) {
        drop(self);
    }
}
