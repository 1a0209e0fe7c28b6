//! Permission prompts raised by the agent before sensitive tool calls.

use serde::{Deserialize, Serialize};

use crate::models::protocol::SessionId;
use crate::models::tool_call::ToolCallUpdate;

/// Inbound method name for permission prompts.
pub const REQUEST_PERMISSION: &str = "session/request_permission";
/// Legacy alias some agents still send.
pub const REQUEST_PERMISSION_ALIAS: &str = "request_permission";

/// What choosing an option means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this once.
    AllowOnce,
    /// Allow from now on.
    AllowAlways,
    /// Reject this once.
    RejectOnce,
    /// Reject from now on.
    RejectAlways,
}

impl PermissionOptionKind {
    /// `true` for the allow kinds.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }
}

/// One choice offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Id echoed back in the outcome.
    pub option_id: String,
    /// Display label.
    pub name: String,
    /// Meaning.
    pub kind: PermissionOptionKind,
}

/// Params of `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Requesting session.
    pub session_id: SessionId,
    /// Tool call the prompt is about, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallUpdate>,
    /// Choices.
    pub options: Vec<PermissionOption>,
}

impl PermissionRequest {
    /// First option whose kind allows the action.
    #[must_use]
    pub fn first_allow(&self) -> Option<&PermissionOption> {
        self.options.iter().find(|opt| opt.kind.is_allow())
    }

    /// `true` when `option_id` names one of the offered options.
    #[must_use]
    pub fn offers(&self, option_id: &str) -> bool {
        self.options.iter().any(|opt| opt.option_id == option_id)
    }
}

/// The single resolution of a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The prompt was dismissed or the turn was cancelled.
    Cancelled,
    /// The user picked an option.
    Selected {
        /// The chosen [`PermissionOption::option_id`].
        #[serde(rename = "optionId")]
        option_id: String,
    },
}

/// Result of `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    /// The outcome.
    pub outcome: PermissionOutcome,
}
