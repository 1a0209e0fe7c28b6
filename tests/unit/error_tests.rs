use serde_json::json;

use acp_engine::errors::{TerminalError, TransportError};
use acp_engine::models::message::RpcError;
use acp_engine::AppError;

#[test]
fn transport_errors_render_exit_details() {
    assert_eq!(
        AppError::from(TransportError::Exited { code: Some(2) }).to_string(),
        "transport: process failed with code 2"
    );
    assert_eq!(
        AppError::from(TransportError::Exited { code: None }).to_string(),
        "transport: process terminated by signal"
    );
    assert_eq!(
        AppError::from(TransportError::NotRunning).to_string(),
        "transport: process not running"
    );
}

#[test]
fn terminal_errors_convert() {
    let err: AppError = TerminalError::Released("term-1".into()).into();
    assert!(matches!(err, AppError::Terminal(TerminalError::Released(ref id)) if id == "term-1"));
    assert_eq!(err.to_string(), "terminal: terminal released: term-1");
}

#[test]
fn command_failure_trims_stderr() {
    let err = AppError::CommandFailed {
        code: Some(1),
        stderr: "boom\n".into(),
    };
    assert_eq!(err.to_string(), "command failed with code 1: boom");
}

#[test]
fn io_and_json_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    assert!(matches!(AppError::from(io), AppError::Io(msg) if msg.contains("gone")));

    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(AppError::from(json_err), AppError::Protocol(_)));
}

#[test]
fn agent_error_prefers_nested_provider_message() {
    let nested = RpcError {
        code: -32603,
        message: "Internal error".into(),
        data: Some(json!({"error": {"message": "rate limited"}})),
    };
    assert_eq!(nested.provider_message(), "rate limited");
    assert_eq!(
        AppError::Agent(nested).to_string(),
        "agent: rate limited (-32603)"
    );

    let stringly = RpcError {
        code: -32000,
        message: "failed".into(),
        data: Some(json!("{\"message\":\"quota exceeded\"}")),
    };
    assert_eq!(stringly.provider_message(), "quota exceeded");

    let plain = RpcError {
        code: -32000,
        message: "failed".into(),
        data: Some(json!("not json")),
    };
    assert_eq!(plain.provider_message(), "failed");
}

#[test]
fn standard_codes() {
    assert_eq!(RpcError::method_not_found("x").code, -32601);
    assert_eq!(RpcError::invalid_params("y").code, -32602);
    assert_eq!(RpcError::internal("z").code, -32603);
}
