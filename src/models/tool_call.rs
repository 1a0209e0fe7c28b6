//! Tool call state carried by `tool_call` / `tool_call_update` notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a tool call, used for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reads files or data.
    Read,
    /// Modifies files.
    Edit,
    /// Deletes files.
    Delete,
    /// Moves or renames files.
    Move,
    /// Searches.
    Search,
    /// Runs a command.
    Execute,
    /// Internal reasoning.
    Think,
    /// Fetches remote data.
    Fetch,
    /// Switches session mode.
    SwitchMode,
    /// Anything else.
    #[default]
    #[serde(other)]
    Other,
}

/// Lifecycle status of a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Not started yet (e.g. awaiting permission).
    #[default]
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ToolCallStatus {
    /// `true` for `completed` and `failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A tool call as first reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Identity of the call within its session.
    pub tool_call_id: String,
    /// Display title.
    pub title: String,
    /// Category.
    #[serde(default)]
    pub kind: ToolKind,
    /// Status.
    #[serde(default)]
    pub status: ToolCallStatus,
    /// Content items (text, diffs, embedded terminals), untyped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Value>,
    /// File locations touched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Value>,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw tool output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
}

/// Partial update of a tool call; absent members leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Which call to update.
    pub tool_call_id: String,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Value>>,
    /// Replacement locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Value>>,
    /// New raw input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// New raw output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
}

impl ToolCall {
    /// Build a call from an update for an id not seen before.
    ///
    /// Returns `None` when the update lacks a title, since a call cannot be
    /// displayed without one.
    #[must_use]
    pub fn from_update(update: &ToolCallUpdate) -> Option<Self> {
        let title = update.title.clone()?;
        Some(Self {
            tool_call_id: update.tool_call_id.clone(),
            title,
            kind: update.kind.unwrap_or_default(),
            status: update.status.unwrap_or_default(),
            content: update.content.clone().unwrap_or_default(),
            locations: update.locations.clone().unwrap_or_default(),
            raw_input: update.raw_input.clone(),
            raw_output: update.raw_output.clone(),
        })
    }

    /// Overwrite every member the update carries.
    pub fn apply(&mut self, update: &ToolCallUpdate) {
        if let Some(title) = &update.title {
            self.title.clone_from(title);
        }
        if let Some(kind) = update.kind {
            self.kind = kind;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(content) = &update.content {
            self.content.clone_from(content);
        }
        if let Some(locations) = &update.locations {
            self.locations.clone_from(locations);
        }
        if update.raw_input.is_some() {
            self.raw_input.clone_from(&update.raw_input);
        }
        if update.raw_output.is_some() {
            self.raw_output.clone_from(&update.raw_output);
        }
    }

    /// Merge a full `tool_call` report for an id that already exists.
    pub fn merge(&mut self, other: ToolCall) {
        self.title = other.title;
        self.kind = other.kind;
        self.status = other.status;
        if !other.content.is_empty() {
            self.content = other.content;
        }
        if !other.locations.is_empty() {
            self.locations = other.locations;
        }
        if other.raw_input.is_some() {
            self.raw_input = other.raw_input;
        }
        if other.raw_output.is_some() {
            self.raw_output = other.raw_output;
        }
    }
}
