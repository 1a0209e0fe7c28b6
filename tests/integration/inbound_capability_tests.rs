//! Integration tests for agent → host requests over a live connection.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::json;

use acp_engine::acp::ClientOptions;
use acp_engine::host::fs::FileAccess;
use acp_engine::host::permission::{AutoApprover, AutoPolicy, ChannelApprover, PermissionApprover};
use acp_engine::host::HostDelegate;
use acp_engine::terminal::{TerminalManager, TerminalSettings};

use super::test_helpers::connect;

fn host_options(approver: Arc<dyn PermissionApprover>) -> ClientOptions {
    let terminals = TerminalManager::spawn(TerminalSettings::default());
    let delegate = HostDelegate::new(FileAccess::unrestricted(), terminals.clone(), approver);
    ClientOptions {
        delegate: Some(Arc::new(delegate)),
        request_timeout: None,
        terminals: Some(terminals),
    }
}

fn auto_allow() -> Arc<dyn PermissionApprover> {
    Arc::new(AutoApprover::new(AutoPolicy::Allow))
}

fn permission_params() -> serde_json::Value {
    json!({
        "sessionId": "s-1",
        "toolCall": {"toolCallId": "c-1", "title": "Write config"},
        "options": [
            {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
            {"optionId": "deny", "name": "Deny", "kind": "reject_once"}
        ]
    })
}

/// Reading lines 5..=8 of a 20-line file returns those lines and the full count.
#[tokio::test]
async fn agent_reads_a_line_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("twenty.txt");
    let text = (1..=20).fold(String::new(), |mut acc, n| {
        let _ = writeln!(acc, "line{n}");
        acc
    });
    std::fs::write(&path, text).unwrap();

    let (_client, mut agent) = connect(host_options(auto_allow()));
    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": "r-1",
            "method": "fs/read_text_file",
            "params": {"sessionId": "s-1", "path": path, "line": 5, "limit": 4}
        }))
        .await;

    let reply = agent.recv().await;
    assert_eq!(reply["id"], "r-1");
    assert_eq!(reply["result"]["content"], "line5\nline6\nline7\nline8");
    assert_eq!(reply["result"]["totalLines"], 20);
}

/// An unknown method is answered with -32601 and the connection stays up.
#[tokio::test]
async fn unknown_inbound_method_is_rejected() {
    let (client, mut agent) = connect(host_options(auto_allow()));
    agent
        .send(json!({"jsonrpc": "2.0", "id": 41, "method": "editor/open", "params": {}}))
        .await;

    let reply = agent.recv().await;
    assert_eq!(reply["id"], 41);
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply.get("result").is_none());
    assert!(client.is_running());
}

/// Without a delegate known methods fail with -32603 until one is set.
#[tokio::test]
async fn delegate_can_be_set_after_connecting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.txt");
    std::fs::write(&path, "hello").unwrap();

    let (client, mut agent) = connect(ClientOptions::default());
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "fs/read_text_file",
        "params": {"path": path}
    });

    agent.send(request.clone()).await;
    let reply = agent.recv().await;
    assert_eq!(reply["error"]["code"], -32603);

    let delegate = HostDelegate::new(
        FileAccess::unrestricted(),
        TerminalManager::spawn(TerminalSettings::default()),
        auto_allow(),
    );
    client
        .set_delegate(Arc::new(delegate))
        .await
        .expect("delegate set");

    agent.send(request).await;
    let reply = agent.recv().await;
    assert_eq!(reply["result"]["content"], "hello");
}

/// A pending permission prompt does not block other inbound requests.
#[tokio::test]
async fn slow_permission_prompt_does_not_block_file_reads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("b.txt");
    std::fs::write(&path, "data").unwrap();

    let (approver, mut prompts) = ChannelApprover::new();
    let (_client, mut agent) = connect(host_options(Arc::new(approver)));

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": "perm",
            "method": "session/request_permission",
            "params": permission_params()
        }))
        .await;
    let prompt = prompts.recv().await.expect("prompt reaches the UI");
    assert_eq!(
        prompt.request.tool_call.as_ref().and_then(|c| c.title.as_deref()),
        Some("Write config")
    );

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": "read",
            "method": "fs/read_text_file",
            "params": {"path": path}
        }))
        .await;
    let first = agent.recv().await;
    assert_eq!(first["id"], "read", "the read is answered while the prompt waits");

    prompt.select("deny").expect("offered option");
    let second = agent.recv().await;
    assert_eq!(second["id"], "perm");
    assert_eq!(
        second["result"],
        json!({"outcome": {"outcome": "selected", "optionId": "deny"}})
    );
}

/// Terminal requests drive the host's terminal manager end to end.
#[cfg(unix)]
#[tokio::test]
async fn agent_runs_a_terminal() {
    let (client, mut agent) = connect(host_options(auto_allow()));

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "terminal/create",
            "params": {"sessionId": "s-1", "command": "echo \"hello terminal\""}
        }))
        .await;
    let created = agent.recv().await;
    let terminal_id = created["result"]["terminalId"].clone();
    assert!(terminal_id.as_str().unwrap().starts_with("term-"));

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "terminal/wait_for_exit",
            "params": {"sessionId": "s-1", "terminalId": terminal_id}
        }))
        .await;
    let exited = agent.recv().await;
    assert_eq!(exited["result"]["exitCode"], 0);

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "terminal/output",
            "params": {"sessionId": "s-1", "terminalId": terminal_id}
        }))
        .await;
    let output = agent.recv().await;
    assert_eq!(output["result"]["output"], "hello terminal\n");
    assert_eq!(output["result"]["truncated"], false);
    assert_eq!(output["result"]["exitStatus"]["exitCode"], 0);

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "terminal/release",
            "params": {"sessionId": "s-1", "terminalId": terminal_id}
        }))
        .await;
    assert_eq!(agent.recv().await["result"], json!({}));

    client.terminate().await;
}
