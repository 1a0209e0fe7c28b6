//! Typed ACP request, response, and notification payloads.
//!
//! Wire field names are camelCase; `session/update` variants are tagged by
//! `sessionUpdate` with snake_case tags.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::tool_call::{ToolCall, ToolCallUpdate};

/// ACP protocol version spoken by this engine.
pub const PROTOCOL_VERSION: u16 = 1;

// ── Method names ─────────────────────────────────────────────────────────────

/// Outbound `initialize`.
pub const INITIALIZE: &str = "initialize";
/// Outbound `authenticate`.
pub const AUTHENTICATE: &str = "authenticate";
/// Outbound `session/new`.
pub const SESSION_NEW: &str = "session/new";
/// Outbound `session/load`.
pub const SESSION_LOAD: &str = "session/load";
/// Outbound `session/prompt`.
pub const SESSION_PROMPT: &str = "session/prompt";
/// Outbound `session/cancel` (notification).
pub const SESSION_CANCEL: &str = "session/cancel";
/// Outbound `session/set_mode`.
pub const SESSION_SET_MODE: &str = "session/set_mode";
/// Outbound `session/set_model`.
pub const SESSION_SET_MODEL: &str = "session/set_model";
/// Inbound `session/update` notification.
pub const SESSION_UPDATE: &str = "session/update";

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Opaque session identifier, scoped to one agent process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ── initialize / authenticate ────────────────────────────────────────────────

/// File-system capabilities advertised by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemCapability {
    /// Host serves `fs/read_text_file`.
    #[serde(default)]
    pub read_text_file: bool,
    /// Host serves `fs/write_text_file`.
    #[serde(default)]
    pub write_text_file: bool,
}

/// Capabilities the host offers to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// File-system access.
    #[serde(default)]
    pub fs: FileSystemCapability,
    /// Host serves `terminal/*`.
    #[serde(default)]
    pub terminal: bool,
}

impl ClientCapabilities {
    /// Everything this engine can serve.
    #[must_use]
    pub fn full() -> Self {
        Self {
            fs: FileSystemCapability {
                read_text_file: true,
                write_text_file: true,
            },
            terminal: true,
        }
    }
}

/// Name and version of an ACP implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Program name.
    pub name: String,
    /// Program version.
    pub version: String,
}

/// Params of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Highest protocol version the host supports.
    pub protocol_version: u16,
    /// Host capabilities.
    pub client_capabilities: ClientCapabilities,
    /// Host identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// An authentication method advertised by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    /// Method id passed back in `authenticate`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Protocol version the agent agreed to.
    pub protocol_version: u16,
    /// Agent capabilities, kept untyped.
    #[serde(default)]
    pub agent_capabilities: Value,
    /// Authentication methods; empty means no authentication is needed.
    #[serde(default)]
    pub auth_methods: Vec<AuthMethod>,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Implementation>,
}

/// Params of `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// One of the advertised [`AuthMethod::id`]s.
    pub method_id: String,
    /// Method-specific credentials (e.g. an API key).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

// ── sessions ─────────────────────────────────────────────────────────────────

/// Params of `session/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    /// Working directory for the session.
    pub cwd: PathBuf,
    /// MCP server descriptors, passed through untouched.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// One selectable session mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMode {
    /// Mode id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Current and available modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Active mode id.
    pub current_mode_id: String,
    /// All modes the agent offers.
    #[serde(default)]
    pub available_modes: Vec<SessionMode>,
}

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id.
    pub model_id: String,
    /// Display name.
    pub name: String,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Current and available models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    /// Active model id.
    pub current_model_id: String,
    /// All models the agent offers.
    #[serde(default)]
    pub available_models: Vec<ModelInfo>,
}

/// Result of `session/new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Id for all further session calls.
    pub session_id: SessionId,
    /// Mode state, when the agent supports modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
    /// Model state, when the agent supports model selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<SessionModelState>,
}

/// Params of `session/load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionRequest {
    /// Session to resume.
    pub session_id: SessionId,
    /// Working directory for the session.
    pub cwd: PathBuf,
    /// MCP server descriptors.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Result of `session/load`; the history itself arrives as `session/update`s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionResponse {
    /// Mode state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
    /// Model state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<SessionModelState>,
}

/// Params of `session/set_mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionModeRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Mode to activate.
    pub mode_id: String,
}

/// Params of `session/set_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionModelRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Model to activate.
    pub model_id: String,
}

/// Params of the `session/cancel` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotification {
    /// Session whose turn is cancelled.
    pub session_id: SessionId,
}

// ── prompts ──────────────────────────────────────────────────────────────────

/// A piece of prompt or message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Base64 audio.
    Audio {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Reference to a resource the agent can fetch.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        name: String,
    },
    /// Embedded resource contents.
    Resource {
        /// Untyped resource payload.
        resource: Value,
    },
}

impl ContentBlock {
    /// Text block helper.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Params of `session/prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Target session.
    pub session_id: SessionId,
    /// Prompt content.
    pub prompt: Vec<ContentBlock>,
}

/// Why the agent ended its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Turn finished normally.
    EndTurn,
    /// Token limit reached.
    MaxTokens,
    /// Model request limit reached.
    MaxTurnRequests,
    /// The agent refused to continue.
    Refusal,
    /// The host cancelled the turn.
    Cancelled,
    /// A reason this engine does not know.
    #[serde(other)]
    Unknown,
}

/// Result of `session/prompt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

// ── session/update ───────────────────────────────────────────────────────────

/// Priority of a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryPriority {
    /// High.
    High,
    /// Medium.
    Medium,
    /// Low.
    Low,
}

/// Status of a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// One step of the agent's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Step description.
    pub content: String,
    /// Relative importance.
    pub priority: PlanEntryPriority,
    /// Progress.
    pub status: PlanEntryStatus,
}

/// A slash command the agent accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableCommand {
    /// Command name without the slash.
    pub name: String,
    /// What it does.
    #[serde(default)]
    pub description: String,
    /// Input hint, untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// The `update` member of a `session/update` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "sessionUpdate",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionUpdate {
    /// Replayed user message content.
    UserMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Streamed agent reply content.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Streamed agent reasoning content.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A new tool call.
    ToolCall(ToolCall),
    /// Changes to an existing tool call.
    ToolCallUpdate(ToolCallUpdate),
    /// Full replacement of the plan.
    Plan {
        /// Plan entries in order.
        entries: Vec<PlanEntry>,
    },
    /// Full replacement of the command list.
    AvailableCommandsUpdate {
        /// Commands in order.
        available_commands: Vec<AvailableCommand>,
    },
    /// The agent switched modes.
    CurrentModeUpdate {
        /// New mode id.
        current_mode_id: String,
    },
}

/// Params of a `session/update` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: SessionId,
    /// The update.
    pub update: SessionUpdate,
}

// ── inbound fs ───────────────────────────────────────────────────────────────

/// Params of inbound `fs/read_text_file`.
///
/// The line window is 1-indexed and inclusive. Both the `startLine`/`endLine`
/// form and the `line`/`limit` form are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileRequest {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Absolute file path.
    pub path: PathBuf,
    /// First line to return.
    #[serde(default, alias = "start_line", alias = "line", skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    /// Last line to return.
    #[serde(default, alias = "end_line", skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    /// Maximum number of lines, used when `end_line` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Result of inbound `fs/read_text_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileResponse {
    /// Selected lines joined with `\n`.
    pub content: String,
    /// Line count of the whole file.
    pub total_lines: usize,
}

/// Params of inbound `fs/write_text_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileRequest {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Absolute file path.
    pub path: PathBuf,
    /// Full new contents.
    pub content: String,
}
