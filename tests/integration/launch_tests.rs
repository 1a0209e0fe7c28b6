//! Integration tests for launching a real agent process.
#![cfg(unix)]

use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;

use acp_engine::acp::connection::ConnectionState;
use acp_engine::acp::spawner::SpawnConfig;
use acp_engine::acp::{AgentClient, ClientOptions};
use acp_engine::errors::TransportError;
use acp_engine::models::protocol::ClientCapabilities;
use acp_engine::AppError;

fn shell_agent(script: &str) -> SpawnConfig {
    let mut config = SpawnConfig::new("sh", std::env::temp_dir());
    config.args = vec!["-c".into(), script.into()];
    config
}

/// Answers the first request (id 0) and then idles.
const ONE_SHOT_AGENT: &str = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"protocolVersion":1,"authMethods":[]}}'; exec sleep 30"#;

#[tokio::test]
async fn agent_exit_is_reported_with_its_code() {
    let client = AgentClient::launch(&shell_agent("exit 3"), ClientOptions::default())
        .await
        .expect("launched");

    tokio::time::timeout(Duration::from_secs(10), async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection closes after the agent exits");

    assert_eq!(
        client.state(),
        ConnectionState::Closed(TransportError::Exited { code: Some(3) })
    );
    assert!(matches!(
        client.request_raw("anything", None).await,
        Err(AppError::Transport(TransportError::Exited { code: Some(3) }))
    ));
}

#[tokio::test]
async fn terminate_kills_a_live_agent() {
    let client = AgentClient::launch(&shell_agent(ONE_SHOT_AGENT), ClientOptions::default())
        .await
        .expect("launched");
    let pid = i32::try_from(client.pid().expect("pid known")).unwrap();

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        client.initialize(1, ClientCapabilities::full()),
    )
    .await
    .expect("reply in time")
    .expect("initialize succeeds");
    assert_eq!(response.protocol_version, 1);
    assert!(response.auth_methods.is_empty());

    tokio::time::timeout(Duration::from_secs(10), client.terminate())
        .await
        .expect("terminate finishes");

    assert!(!client.is_running());
    assert!(
        kill(Pid::from_raw(pid), None).is_err(),
        "agent process {pid} is reaped"
    );
}

#[tokio::test]
async fn missing_agent_executable_is_not_found() {
    let err = AgentClient::launch(
        &SpawnConfig::new("definitely-not-a-real-agent-acp", std::env::temp_dir()),
        ClientOptions::default(),
    )
    .await
    .expect_err("cannot launch");
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}
