//! Unit tests for folding `session/update` payloads into `SessionState`.

use serde_json::json;

use acp_engine::models::protocol::{PlanEntryStatus, SessionNotification, SessionUpdate};
use acp_engine::models::tool_call::{ToolCallStatus, ToolKind};
use acp_engine::session::{Role, SessionState};

fn update(value: serde_json::Value) -> SessionUpdate {
    serde_json::from_value(value).expect("valid session update")
}

fn agent_chunk(text: &str) -> SessionUpdate {
    update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": {"type": "text", "text": text}
    }))
}

fn user_chunk(text: &str) -> SessionUpdate {
    update(json!({
        "sessionUpdate": "user_message_chunk",
        "content": {"type": "text", "text": text}
    }))
}

#[test]
fn consecutive_chunks_coalesce_per_author() {
    let mut state = SessionState::default();
    state.apply(user_chunk("hi "));
    state.apply(user_chunk("there"));
    state.apply(agent_chunk("Hello"));
    state.apply(agent_chunk(", world"));
    state.apply(user_chunk("again"));

    let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Agent, Role::User]);
    assert_eq!(state.messages[0].text, "hi there");
    assert_eq!(state.last_agent_text(), Some("Hello, world"));
    assert!(state.updated_at.is_some());
}

#[test]
fn non_text_content_becomes_an_attachment() {
    let mut state = SessionState::default();
    state.apply(agent_chunk("see "));
    state.apply(update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": {"type": "image", "data": "AAAA", "mimeType": "image/png"}
    })));

    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].text, "see ");
    assert_eq!(state.messages[0].attachments.len(), 1);
}

#[test]
fn thoughts_accumulate_separately() {
    let mut state = SessionState::default();
    state.apply(update(json!({
        "sessionUpdate": "agent_thought_chunk",
        "content": {"type": "text", "text": "thinking"}
    })));
    state.apply(agent_chunk("answer"));

    assert_eq!(state.thoughts, "thinking");
    assert_eq!(state.last_agent_text(), Some("answer"));
}

#[test]
fn tool_call_updates_patch_the_existing_call() {
    let mut state = SessionState::default();
    state.apply(update(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "call-1",
        "title": "Read file",
        "kind": "read",
        "status": "pending"
    })));
    state.apply(update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "call-1",
        "status": "completed",
        "content": [{"type": "content", "content": {"type": "text", "text": "done"}}]
    })));

    assert_eq!(state.tool_calls.len(), 1);
    let call = &state.tool_calls[0];
    assert_eq!(call.title, "Read file");
    assert_eq!(call.kind, ToolKind::Read);
    assert_eq!(call.status, ToolCallStatus::Completed);
    assert_eq!(call.content.len(), 1);
}

#[test]
fn update_for_unknown_call_is_adopted_only_with_a_title() {
    let mut state = SessionState::default();
    state.apply(update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "ghost",
        "status": "in_progress"
    })));
    assert!(state.tool_calls.is_empty());

    state.apply(update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "late",
        "title": "Run tests",
        "status": "in_progress"
    })));
    assert_eq!(state.tool_calls.len(), 1);
    assert_eq!(state.tool_calls[0].status, ToolCallStatus::InProgress);
}

#[test]
fn plan_and_commands_are_replaced_wholesale() {
    let mut state = SessionState::default();
    state.apply(update(json!({
        "sessionUpdate": "plan",
        "entries": [
            {"content": "a", "priority": "high", "status": "pending"},
            {"content": "b", "priority": "low", "status": "pending"}
        ]
    })));
    state.apply(update(json!({
        "sessionUpdate": "plan",
        "entries": [{"content": "a", "priority": "high", "status": "completed"}]
    })));
    state.apply(update(json!({
        "sessionUpdate": "available_commands_update",
        "availableCommands": [{"name": "test", "description": "run tests"}]
    })));

    assert_eq!(state.plan.len(), 1);
    assert_eq!(state.plan[0].status, PlanEntryStatus::Completed);
    assert_eq!(state.available_commands[0].name, "test");
}

#[test]
fn mode_update_sets_current_mode() {
    let mut state = SessionState::default();
    state.apply(update(json!({
        "sessionUpdate": "current_mode_update",
        "currentModeId": "architect"
    })));

    let modes = state.modes.expect("mode state created");
    assert_eq!(modes.current_mode_id, "architect");
}

#[test]
fn session_notification_wire_shape() {
    let note: SessionNotification = serde_json::from_value(json!({
        "sessionId": "s-1",
        "update": {
            "sessionUpdate": "agent_message_chunk",
            "content": {"type": "text", "text": "x"}
        }
    }))
    .expect("decodes");

    assert_eq!(note.session_id.as_str(), "s-1");
    assert!(matches!(note.update, SessionUpdate::AgentMessageChunk { .. }));
}
