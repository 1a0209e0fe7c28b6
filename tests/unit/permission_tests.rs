//! Unit tests for permission approvers.

use acp_engine::host::permission::{
    AutoApprover, AutoPolicy, ChannelApprover, PermissionApprover,
};
use acp_engine::models::permission::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionRequest,
};
use acp_engine::models::protocol::SessionId;
use acp_engine::AppError;

fn option(id: &str, kind: PermissionOptionKind) -> PermissionOption {
    PermissionOption {
        option_id: id.into(),
        name: id.into(),
        kind,
    }
}

fn request(options: Vec<PermissionOption>) -> PermissionRequest {
    PermissionRequest {
        session_id: SessionId::from("s-1"),
        tool_call: None,
        options,
    }
}

fn standard_request() -> PermissionRequest {
    request(vec![
        option("reject", PermissionOptionKind::RejectOnce),
        option("allow", PermissionOptionKind::AllowOnce),
        option("always", PermissionOptionKind::AllowAlways),
    ])
}

fn selected(id: &str) -> PermissionOutcome {
    PermissionOutcome::Selected {
        option_id: id.into(),
    }
}

// ── AutoApprover ─────────────────────────────────────────────────────────────

#[test]
fn auto_allow_picks_first_allow_option() {
    let approver = AutoApprover::new(AutoPolicy::Allow);
    assert_eq!(approver.outcome_for(&standard_request()), selected("allow"));
}

#[test]
fn auto_reject_picks_a_reject_option() {
    let approver = AutoApprover::new(AutoPolicy::Reject);
    assert_eq!(approver.outcome_for(&standard_request()), selected("reject"));
}

#[test]
fn auto_allow_without_allow_options_rejects() {
    let approver = AutoApprover::new(AutoPolicy::Allow);
    let only_reject = request(vec![option("no", PermissionOptionKind::RejectAlways)]);
    assert_eq!(approver.outcome_for(&only_reject), selected("no"));
}

#[test]
fn no_options_means_cancelled() {
    let approver = AutoApprover::default();
    assert_eq!(approver.outcome_for(&request(Vec::new())), PermissionOutcome::Cancelled);
}

// ── ChannelApprover ──────────────────────────────────────────────────────────

#[tokio::test]
async fn channel_prompt_resolves_with_selection() {
    let (approver, mut prompts) = ChannelApprover::new();
    let ui = tokio::spawn(async move {
        let prompt = prompts.recv().await.expect("prompt delivered");
        assert_eq!(prompt.request.options.len(), 3);
        prompt.select("always").expect("offered option");
    });

    let outcome = approver.decide(standard_request()).await.expect("decided");
    assert_eq!(outcome, selected("always"));
    ui.await.unwrap();
}

#[tokio::test]
async fn unknown_option_hands_the_prompt_back() {
    let (approver, mut prompts) = ChannelApprover::new();
    let ui = tokio::spawn(async move {
        let prompt = prompts.recv().await.expect("prompt delivered");
        let (prompt, err) = prompt.select("bogus").expect_err("not offered");
        assert!(matches!(err, AppError::NotFound(_)));
        prompt.select("reject").expect("offered option");
    });

    let outcome = approver.decide(standard_request()).await.expect("decided");
    assert_eq!(outcome, selected("reject"));
    ui.await.unwrap();
}

#[tokio::test]
async fn dropped_prompt_counts_as_cancelled() {
    let (approver, mut prompts) = ChannelApprover::new();
    let ui = tokio::spawn(async move {
        drop(prompts.recv().await.expect("prompt delivered"));
    });

    let outcome = approver.decide(standard_request()).await.expect("decided");
    assert_eq!(outcome, PermissionOutcome::Cancelled);
    ui.await.unwrap();
}

#[tokio::test]
async fn missing_consumer_counts_as_cancelled() {
    let (approver, prompts) = ChannelApprover::new();
    drop(prompts);

    let outcome = approver.decide(standard_request()).await.expect("decided");
    assert_eq!(outcome, PermissionOutcome::Cancelled);
}

#[test]
fn outcome_wire_shape() {
    let value = serde_json::to_value(selected("allow")).unwrap();
    assert_eq!(value, serde_json::json!({"outcome": "selected", "optionId": "allow"}));

    let value = serde_json::to_value(PermissionOutcome::Cancelled).unwrap();
    assert_eq!(value, serde_json::json!({"outcome": "cancelled"}));
}
