//! Agent client: the typed ACP surface over one agent connection.
//!
//! [`AgentClient`] owns a connection loop (see [`crate::acp::connection`])
//! and exposes the outbound ACP methods as typed async calls. Session
//! updates arrive on a [`NotificationStream`] that can be taken exactly once.
//!
//! [`AgentClient::terminate`] is the one path that releases everything: it
//! stops the loop, kills the agent, fails pending calls, closes the
//! notification stream, and releases managed terminals. It is idempotent.

use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::connection::{
    spawn_connection, ConnectionHandle, ConnectionOptions, ConnectionState,
};
use crate::acp::router::ClientDelegate;
use crate::acp::spawner::{spawn_agent, SpawnConfig};
use crate::models::message::Notification;
use crate::models::protocol::{
    AuthenticateRequest, CancelNotification, ClientCapabilities, ContentBlock, Implementation,
    InitializeRequest, InitializeResponse, LoadSessionRequest, LoadSessionResponse,
    NewSessionRequest, NewSessionResponse, PromptRequest, PromptResponse, SessionId,
    SessionNotification, SetSessionModeRequest, SetSessionModelRequest, StopReason, AUTHENTICATE,
    INITIALIZE, SESSION_CANCEL, SESSION_LOAD, SESSION_NEW, SESSION_PROMPT, SESSION_SET_MODE,
    SESSION_SET_MODEL, SESSION_UPDATE,
};
use crate::terminal::TerminalManager;
use crate::{AppError, Result};

/// Options shared by [`AgentClient::launch`] and [`AgentClient::connect`].
#[derive(Default, Clone)]
pub struct ClientOptions {
    /// Handler for inbound capability requests; can also be set later.
    pub delegate: Option<Arc<dyn ClientDelegate>>,
    /// Deadline for every outbound request; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Terminals to release on [`AgentClient::terminate`].
    pub terminals: Option<TerminalManager>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("delegate", &self.delegate.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("terminals", &self.terminals.is_some())
            .finish()
    }
}

/// Connection to one agent process.
#[derive(Debug)]
pub struct AgentClient {
    handle: ConnectionHandle,
    cancel: CancellationToken,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    terminals: Option<TerminalManager>,
    pid: Option<u32>,
}

impl AgentClient {
    /// Spawn the agent process and start the connection loop.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] or [`AppError::NotFound`] if the agent
    /// cannot be started.
    pub async fn launch(config: &SpawnConfig, options: ClientOptions) -> Result<Self> {
        let process = spawn_agent(config).await?;
        let label = format!("{}[{}]", config.command, process.pid.unwrap_or_default());
        let connection = spawn_connection(
            process.stdout,
            process.stdin,
            ConnectionOptions {
                label,
                delegate: options.delegate,
                child: Some(process.child),
                request_timeout: options.request_timeout,
            },
        );
        Ok(Self {
            handle: connection.handle,
            cancel: connection.cancel,
            notifications: Some(connection.notifications),
            loop_task: Mutex::new(Some(connection.task)),
            stderr_task: Mutex::new(Some(process.stderr_task)),
            terminals: options.terminals,
            pid: process.pid,
        })
    }

    /// Run the protocol over an already connected byte stream pair, e.g.
    /// an in-memory duplex or a socket. `reader` carries agent → host
    /// messages.
    #[must_use]
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection = spawn_connection(
            reader,
            writer,
            ConnectionOptions {
                label: "stream".into(),
                delegate: options.delegate,
                child: None,
                request_timeout: options.request_timeout,
            },
        );
        Self {
            handle: connection.handle,
            cancel: connection.cancel,
            notifications: Some(connection.notifications),
            loop_task: Mutex::new(Some(connection.task)),
            stderr_task: Mutex::new(None),
            terminals: options.terminals,
            pid: None,
        }
    }

    /// Take the notification stream. Returns `None` on every later call.
    pub fn take_notifications(&mut self) -> Option<NotificationStream> {
        self.notifications.take().map(|rx| NotificationStream { rx })
    }

    /// Register or replace the inbound capability delegate.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] once the connection is closed.
    pub async fn set_delegate(&self, delegate: Arc<dyn ClientDelegate>) -> Result<()> {
        self.handle.set_delegate(Some(delegate)).await
    }

    /// `initialize`: negotiate the protocol version and exchange capabilities.
    ///
    /// # Errors
    ///
    /// Any error of [`ConnectionHandle::request`], or [`AppError::Protocol`]
    /// for an unexpected response shape.
    pub async fn initialize(
        &self,
        protocol_version: u16,
        client_capabilities: ClientCapabilities,
    ) -> Result<InitializeResponse> {
        let request = InitializeRequest {
            protocol_version,
            client_capabilities,
            client_info: Some(Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
            }),
        };
        let response: InitializeResponse = self.call(INITIALIZE, &request).await?;
        info!(
            protocol_version = response.protocol_version,
            auth_methods = response.auth_methods.len(),
            agent = response.agent_info.as_ref().map(|i| i.name.as_str()),
            "agent initialized"
        );
        Ok(response)
    }

    /// `authenticate` with one of the advertised methods.
    ///
    /// # Errors
    ///
    /// [`AppError::Agent`] when the agent rejects the credentials.
    pub async fn authenticate(
        &self,
        method_id: &str,
        credentials: BTreeMap<String, String>,
    ) -> Result<()> {
        let request = AuthenticateRequest {
            method_id: method_id.to_owned(),
            credentials,
        };
        let _: Value = self.call(AUTHENTICATE, &request).await?;
        info!(method_id, "agent authenticated");
        Ok(())
    }

    /// `session/new`.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::initialize`].
    pub async fn new_session(
        &self,
        cwd: &Path,
        mcp_servers: Vec<Value>,
    ) -> Result<NewSessionResponse> {
        let request = NewSessionRequest {
            cwd: cwd.to_path_buf(),
            mcp_servers,
        };
        let response: NewSessionResponse = self.call(SESSION_NEW, &request).await?;
        info!(session_id = %response.session_id, cwd = %cwd.display(), "session created");
        Ok(response)
    }

    /// `session/load`. The history is replayed as `session/update`
    /// notifications before the response arrives.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::initialize`].
    pub async fn load_session(
        &self,
        session_id: &SessionId,
        cwd: &Path,
        mcp_servers: Vec<Value>,
    ) -> Result<LoadSessionResponse> {
        let request = LoadSessionRequest {
            session_id: session_id.clone(),
            cwd: cwd.to_path_buf(),
            mcp_servers,
        };
        let response = self.call(SESSION_LOAD, &request).await?;
        info!(%session_id, "session loaded");
        Ok(response)
    }

    /// `session/prompt`: run one turn and return why it ended.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::initialize`].
    pub async fn send_prompt(
        &self,
        session_id: &SessionId,
        prompt: Vec<ContentBlock>,
    ) -> Result<StopReason> {
        let request = PromptRequest {
            session_id: session_id.clone(),
            prompt,
        };
        debug!(%session_id, blocks = request.prompt.len(), "sending prompt");
        let response: PromptResponse = self.call(SESSION_PROMPT, &request).await?;
        info!(%session_id, stop_reason = ?response.stop_reason, "turn finished");
        Ok(response.stop_reason)
    }

    /// `session/set_mode`.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::initialize`].
    pub async fn set_mode(&self, session_id: &SessionId, mode_id: &str) -> Result<()> {
        let request = SetSessionModeRequest {
            session_id: session_id.clone(),
            mode_id: mode_id.to_owned(),
        };
        let _: Value = self.call(SESSION_SET_MODE, &request).await?;
        debug!(%session_id, mode_id, "mode set");
        Ok(())
    }

    /// `session/set_model`.
    ///
    /// # Errors
    ///
    /// See [`AgentClient::initialize`].
    pub async fn set_model(&self, session_id: &SessionId, model_id: &str) -> Result<()> {
        let request = SetSessionModelRequest {
            session_id: session_id.clone(),
            model_id: model_id.to_owned(),
        };
        let _: Value = self.call(SESSION_SET_MODEL, &request).await?;
        debug!(%session_id, model_id, "model set");
        Ok(())
    }

    /// `session/cancel`, sent as a notification. The pending
    /// `session/prompt` resolves with [`StopReason::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] once the connection is closed.
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<()> {
        let params = serde_json::to_value(CancelNotification {
            session_id: session_id.clone(),
        })?;
        info!(%session_id, "cancelling turn");
        self.handle.notify(SESSION_CANCEL, Some(params)).await
    }

    /// Send any request and return the raw result.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandle::request`].
    pub async fn request_raw(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.handle.request(method, params).await
    }

    /// Stop everything. Safe to call more than once.
    pub async fn terminate(&self) {
        self.cancel.cancel();
        let task = take(&self.loop_task);
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(%err, "connection loop ended abnormally");
            }
            info!(pid = ?self.pid, "agent client terminated");
        }
        if let Some(stderr) = take(&self.stderr_task) {
            stderr.abort();
        }
        if let Some(terminals) = &self.terminals {
            if let Err(err) = terminals.release_all().await {
                debug!(%err, "terminal cleanup skipped");
            }
        }
    }

    /// Whether the connection is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// OS process id of a launched agent.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.handle.request(method, Some(params)).await?;
        decode_result(method, result)
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Decode a result; `null` is read as an empty object so optional-only
/// responses accept both forms.
fn decode_result<R: DeserializeOwned>(method: &str, result: Value) -> Result<R> {
    let result = if result.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        result
    };
    serde_json::from_value(result)
        .map_err(|err| AppError::Protocol(format!("unexpected {method} response: {err}")))
}

/// Ordered, single-consumer stream of inbound notifications.
///
/// Ends when the connection closes; it cannot be restarted.
#[derive(Debug)]
pub struct NotificationStream {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationStream {
    /// Next raw notification.
    pub async fn next_raw(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Next `session/update`, skipping (and logging) anything else or
    /// anything that does not decode.
    pub async fn next_update(&mut self) -> Option<SessionNotification> {
        loop {
            let notification = self.rx.recv().await?;
            if let Some(update) = decode_update(notification) {
                return Some(update);
            }
        }
    }
}

impl Stream for NotificationStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Decode a `session/update` notification, logging anything unusable.
#[must_use]
pub fn decode_update(notification: Notification) -> Option<SessionNotification> {
    if notification.method != SESSION_UPDATE {
        debug!(method = notification.method, "ignoring notification");
        return None;
    }
    match serde_json::from_value(notification.params.unwrap_or(Value::Null)) {
        Ok(update) => Some(update),
        Err(err) => {
            warn!(%err, "dropping undecodable session/update");
            None
        }
    }
}
