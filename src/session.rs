//! Session façade for UI consumers.
//!
//! A [`Session`] owns one [`AgentClient`], performs the startup handshake,
//! and folds `session/update` notifications into a [`SessionState`] that is
//! published through a [`watch`] channel. Consumers render snapshots; they
//! never touch the protocol directly.
//!
//! Startup: `initialize`, then `authenticate` when the agent advertises
//! methods and credentials are configured, then `session/new` (or
//! `session/load`). An empty `authMethods` list goes straight to the session.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::acp::client::{AgentClient, NotificationStream};
use crate::models::protocol::{
    AuthMethod, AvailableCommand, ClientCapabilities, ContentBlock, PlanEntry, SessionId,
    SessionModeState, SessionModelState, SessionUpdate, StopReason, PROTOCOL_VERSION,
};
use crate::models::tool_call::ToolCall;
use crate::Result;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human (sent prompts and replayed user chunks).
    User,
    /// The agent.
    Agent,
}

/// One chat message assembled from streamed chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Concatenated text chunks.
    pub text: String,
    /// Non-text content (images, resources) in arrival order.
    pub attachments: Vec<ContentBlock>,
    /// When the first chunk arrived.
    pub started_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role) -> Self {
        Self {
            role,
            text: String::new(),
            attachments: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn push(&mut self, block: ContentBlock) {
        match block.as_text() {
            Some(text) => self.text.push_str(text),
            None => self.attachments.push(block),
        }
    }
}

/// Authentication progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    /// Handshake not done yet.
    #[default]
    Unknown,
    /// The agent advertised no methods.
    NotRequired,
    /// Methods are advertised but no credentials were configured.
    Required {
        /// Advertised method ids.
        methods: Vec<String>,
    },
    /// `authenticate` succeeded.
    Authenticated {
        /// Method used.
        method_id: String,
    },
}

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    /// Agent-assigned id once the session exists.
    pub session_id: Option<SessionId>,
    /// Chat transcript; consecutive chunks of one author are coalesced.
    pub messages: Vec<ChatMessage>,
    /// Agent reasoning for the current turn.
    pub thoughts: String,
    /// Tool calls in first-seen order.
    pub tool_calls: Vec<ToolCall>,
    /// Latest plan.
    pub plan: Vec<PlanEntry>,
    /// Slash commands the agent accepts.
    pub available_commands: Vec<AvailableCommand>,
    /// Mode state from session creation, kept current by mode updates.
    pub modes: Option<SessionModeState>,
    /// Model state from session creation.
    pub models: Option<SessionModelState>,
    /// Authentication progress.
    pub auth: AuthState,
    /// Whether a prompt turn is running.
    pub prompting: bool,
    /// Why the last turn ended.
    pub last_stop_reason: Option<StopReason>,
    /// Set once the notification stream has ended.
    pub closed: bool,
    /// Last change.
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Fold one update into the state.
    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::UserMessageChunk { content } => self.push_chunk(Role::User, content),
            SessionUpdate::AgentMessageChunk { content } => self.push_chunk(Role::Agent, content),
            SessionUpdate::AgentThoughtChunk { content } => {
                if let Some(text) = content.as_text() {
                    self.thoughts.push_str(text);
                }
            }
            SessionUpdate::ToolCall(call) => {
                match self
                    .tool_calls
                    .iter_mut()
                    .find(|c| c.tool_call_id == call.tool_call_id)
                {
                    Some(existing) => existing.merge(call),
                    None => self.tool_calls.push(call),
                }
            }
            SessionUpdate::ToolCallUpdate(update) => {
                match self
                    .tool_calls
                    .iter_mut()
                    .find(|c| c.tool_call_id == update.tool_call_id)
                {
                    Some(existing) => existing.apply(&update),
                    None => match ToolCall::from_update(&update) {
                        Some(call) => self.tool_calls.push(call),
                        None => {
                            debug!(tool_call_id = %update.tool_call_id, "update for unknown tool call skipped");
                        }
                    },
                }
            }
            SessionUpdate::Plan { entries } => self.plan = entries,
            SessionUpdate::AvailableCommandsUpdate { available_commands } => {
                self.available_commands = available_commands;
            }
            SessionUpdate::CurrentModeUpdate { current_mode_id } => {
                self.set_current_mode(current_mode_id);
            }
        }
        self.touch();
    }

    /// Text of the most recent agent message.
    #[must_use]
    pub fn last_agent_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Agent)
            .map(|m| m.text.as_str())
    }

    fn push_chunk(&mut self, role: Role, content: ContentBlock) {
        match self.messages.last_mut() {
            Some(last) if last.role == role => last.push(content),
            _ => {
                let mut message = ChatMessage::new(role);
                message.push(content);
                self.messages.push(message);
            }
        }
    }

    fn set_current_mode(&mut self, mode_id: String) {
        match &mut self.modes {
            Some(modes) => modes.current_mode_id = mode_id,
            None => {
                self.modes = Some(SessionModeState {
                    current_mode_id: mode_id,
                    available_modes: Vec::new(),
                });
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Credentials for the `authenticate` step.
#[derive(Debug, Clone, Default)]
pub struct AuthCredentials {
    /// Preferred method; the first advertised method is used otherwise.
    pub method_id: Option<String>,
    /// Method-specific values.
    pub credentials: BTreeMap<String, String>,
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Session working directory.
    pub cwd: PathBuf,
    /// MCP server descriptors passed through to the agent.
    pub mcp_servers: Vec<Value>,
    /// Protocol version offered in `initialize`.
    pub protocol_version: u16,
    /// Capabilities offered in `initialize`.
    pub capabilities: ClientCapabilities,
    /// Credentials, when authentication is possible.
    pub auth: Option<AuthCredentials>,
}

impl SessionSetup {
    /// Defaults for `cwd`: current protocol version, full capabilities, no MCP servers.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            mcp_servers: Vec::new(),
            protocol_version: PROTOCOL_VERSION,
            capabilities: ClientCapabilities::full(),
            auth: None,
        }
    }
}

/// One open agent session.
#[derive(Debug)]
pub struct Session {
    client: AgentClient,
    session_id: SessionId,
    state: Arc<watch::Sender<SessionState>>,
    pump: JoinHandle<()>,
}

impl Session {
    /// Handshake and create a new session.
    ///
    /// # Errors
    ///
    /// Any error of the underlying calls; `authenticate` rejections are
    /// returned as [`crate::AppError::Agent`].
    pub async fn start(client: AgentClient, setup: SessionSetup) -> Result<Self> {
        Self::open(client, setup, None).await
    }

    /// Handshake and resume `session_id`. The replayed history lands in the state.
    ///
    /// # Errors
    ///
    /// See [`Session::start`].
    pub async fn resume(
        client: AgentClient,
        setup: SessionSetup,
        session_id: SessionId,
    ) -> Result<Self> {
        Self::open(client, setup, Some(session_id)).await
    }

    async fn open(
        mut client: AgentClient,
        setup: SessionSetup,
        resume: Option<SessionId>,
    ) -> Result<Self> {
        let (tx, _rx) = watch::channel(SessionState::default());
        let state = Arc::new(tx);
        let pump = match client.take_notifications() {
            Some(stream) => tokio::spawn(pump_updates(stream, Arc::clone(&state))),
            None => tokio::spawn(async {}),
        };

        let init = client
            .initialize(setup.protocol_version, setup.capabilities.clone())
            .await?;
        let auth = authenticate(&client, &init.auth_methods, setup.auth.as_ref()).await?;
        state.send_modify(|s| s.auth = auth);

        let (session_id, modes, models) = match resume {
            Some(session_id) => {
                let loaded = client
                    .load_session(&session_id, &setup.cwd, setup.mcp_servers.clone())
                    .await?;
                (session_id, loaded.modes, loaded.models)
            }
            None => {
                let created = client
                    .new_session(&setup.cwd, setup.mcp_servers.clone())
                    .await?;
                (created.session_id, created.modes, created.models)
            }
        };

        state.send_modify(|s| {
            s.session_id = Some(session_id.clone());
            if modes.is_some() {
                s.modes = modes;
            }
            s.models = models;
            s.touch();
        });
        Ok(Self {
            client,
            session_id,
            state,
            pump,
        })
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    /// Subscribe to state snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Run one turn.
    ///
    /// # Errors
    ///
    /// Any error of [`AgentClient::send_prompt`].
    pub async fn prompt(&self, prompt: Vec<ContentBlock>) -> Result<StopReason> {
        self.state.send_modify(|s| {
            let mut message = ChatMessage::new(Role::User);
            for block in &prompt {
                message.push(block.clone());
            }
            s.messages.push(message);
            s.thoughts.clear();
            s.prompting = true;
            s.touch();
        });

        let outcome = self.client.send_prompt(&self.session_id, prompt).await;
        self.state.send_modify(|s| {
            s.prompting = false;
            if let Ok(reason) = &outcome {
                s.last_stop_reason = Some(*reason);
            }
            s.touch();
        });
        outcome
    }

    /// Cancel the running turn.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Transport`] once the agent is gone.
    pub async fn cancel(&self) -> Result<()> {
        self.client.cancel_session(&self.session_id).await
    }

    /// Switch mode.
    ///
    /// # Errors
    ///
    /// Any error of [`AgentClient::set_mode`].
    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        self.client.set_mode(&self.session_id, mode_id).await?;
        self.state.send_modify(|s| {
            s.set_current_mode(mode_id.to_owned());
            s.touch();
        });
        Ok(())
    }

    /// Switch model.
    ///
    /// # Errors
    ///
    /// Any error of [`AgentClient::set_model`].
    pub async fn set_model(&self, model_id: &str) -> Result<()> {
        self.client.set_model(&self.session_id, model_id).await?;
        self.state.send_modify(|s| {
            if let Some(models) = &mut s.models {
                model_id.clone_into(&mut models.current_model_id);
            }
            s.touch();
        });
        Ok(())
    }

    /// Terminate the agent and wait for the update pump to drain.
    pub async fn terminate(self) {
        self.client.terminate().await;
        if let Err(err) = self.pump.await {
            warn!(%err, "update pump ended abnormally");
        }
    }
}

async fn authenticate(
    client: &AgentClient,
    methods: &[AuthMethod],
    auth: Option<&AuthCredentials>,
) -> Result<AuthState> {
    if methods.is_empty() {
        return Ok(AuthState::NotRequired);
    }
    let Some(auth) = auth else {
        info!(methods = methods.len(), "agent offers authentication but no credentials are configured");
        return Ok(AuthState::Required {
            methods: methods.iter().map(|m| m.id.clone()).collect(),
        });
    };

    let method_id = auth
        .method_id
        .as_deref()
        .filter(|wanted| methods.iter().any(|m| m.id == *wanted))
        .unwrap_or(methods[0].id.as_str())
        .to_owned();
    match client.authenticate(&method_id, auth.credentials.clone()).await {
        Ok(()) => Ok(AuthState::Authenticated { method_id }),
        Err(err) => {
            warn!(method_id, %err, "authentication rejected");
            Err(err)
        }
    }
}

async fn pump_updates(mut stream: NotificationStream, state: Arc<watch::Sender<SessionState>>) {
    while let Some(notification) = stream.next_update().await {
        let expected = state.borrow().session_id.clone();
        if let Some(expected) = expected {
            if expected != notification.session_id {
                debug!(session_id = %notification.session_id, "update for another session ignored");
                continue;
            }
        }
        state.send_modify(|s| s.apply(notification.update));
    }
    state.send_modify(|s| {
        s.closed = true;
        s.prompting = false;
    });
    debug!("session update stream ended");
}
