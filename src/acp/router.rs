//! Inbound (agent → host) request routing.
//!
//! The agent calls back into the host for file access, terminals, and
//! permission prompts. [`CapabilityRouter`] maps each method name onto one
//! operation of the injected [`ClientDelegate`] and turns the outcome into a
//! JSON-RPC response. Handler failures become error replies; they never
//! escape into the connection loop.
//!
//! # Inbound methods
//!
//! | Method                        | Delegate operation                 |
//! |-------------------------------|------------------------------------|
//! | `fs/read_text_file`           | [`ClientDelegate::read_text_file`] |
//! | `fs/write_text_file`          | [`ClientDelegate::write_text_file`]|
//! | `terminal/create`             | [`ClientDelegate::create_terminal`]|
//! | `terminal/output`             | [`ClientDelegate::terminal_output`]|
//! | `terminal/wait_for_exit`      | [`ClientDelegate::wait_for_terminal_exit`] |
//! | `terminal/kill`               | [`ClientDelegate::kill_terminal`]  |
//! | `terminal/release`            | [`ClientDelegate::release_terminal`] |
//! | `session/request_permission`  | [`ClientDelegate::request_permission`] |
//! | *(any other)*                 | `-32601` method not found          |

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::models::message::{Request, Response, RpcError};
use crate::models::permission::{
    PermissionOutcome, PermissionRequest, PermissionResponse, REQUEST_PERMISSION,
    REQUEST_PERMISSION_ALIAS,
};
use crate::models::protocol::{ReadTextFileRequest, ReadTextFileResponse, WriteTextFileRequest};
use crate::models::terminal::{
    CreateTerminalRequest, CreateTerminalResponse, TerminalExitStatus, TerminalOutputResponse,
    TerminalRequest, TERMINAL_CREATE, TERMINAL_KILL, TERMINAL_OUTPUT, TERMINAL_RELEASE,
    TERMINAL_WAIT_FOR_EXIT,
};
use crate::{AppError, Result};

/// Inbound `fs/read_text_file`.
pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
/// Inbound `fs/write_text_file`.
pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";

/// Every inbound method the router knows.
pub const INBOUND_METHODS: &[&str] = &[
    FS_READ_TEXT_FILE,
    FS_WRITE_TEXT_FILE,
    TERMINAL_CREATE,
    TERMINAL_OUTPUT,
    TERMINAL_WAIT_FOR_EXIT,
    TERMINAL_KILL,
    TERMINAL_RELEASE,
    REQUEST_PERMISSION,
    REQUEST_PERMISSION_ALIAS,
];

/// Boxed future returned by [`ClientDelegate`] operations.
pub type DelegateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Host-side implementation of the capabilities offered to the agent.
pub trait ClientDelegate: Send + Sync {
    /// Read a text file, optionally limited to a 1-indexed line window.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the file cannot be read.
    fn read_text_file(&self, request: ReadTextFileRequest)
        -> DelegateFuture<'_, ReadTextFileResponse>;

    /// Replace a text file's contents atomically.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the file cannot be written.
    fn write_text_file(&self, request: WriteTextFileRequest) -> DelegateFuture<'_, ()>;

    /// Spawn a terminal process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] when the command cannot be resolved or spawned.
    fn create_terminal(
        &self,
        request: CreateTerminalRequest,
    ) -> DelegateFuture<'_, CreateTerminalResponse>;

    /// Snapshot a terminal's output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] for unknown or released terminals.
    fn terminal_output(&self, request: TerminalRequest)
        -> DelegateFuture<'_, TerminalOutputResponse>;

    /// Suspend until the terminal's process exits.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] for unknown or released terminals.
    fn wait_for_terminal_exit(
        &self,
        request: TerminalRequest,
    ) -> DelegateFuture<'_, TerminalExitStatus>;

    /// Kill the terminal's process without releasing it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] for unknown or released terminals.
    fn kill_terminal(&self, request: TerminalRequest) -> DelegateFuture<'_, ()>;

    /// Kill if needed and release all terminal resources.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Terminal`] for unknown or released terminals.
    fn release_terminal(&self, request: TerminalRequest) -> DelegateFuture<'_, ()>;

    /// Ask the user to pick one of the offered options.
    ///
    /// # Errors
    ///
    /// Implementations may fail if no approver is reachable.
    fn request_permission(
        &self,
        request: PermissionRequest,
    ) -> DelegateFuture<'_, PermissionOutcome>;
}

/// Routes inbound requests to the registered [`ClientDelegate`].
#[derive(Clone, Default)]
pub struct CapabilityRouter {
    delegate: Option<Arc<dyn ClientDelegate>>,
}

impl std::fmt::Debug for CapabilityRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRouter")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl CapabilityRouter {
    /// Create a router, optionally with a delegate already registered.
    #[must_use]
    pub fn new(delegate: Option<Arc<dyn ClientDelegate>>) -> Self {
        Self { delegate }
    }

    /// Register or clear the delegate.
    pub fn set_delegate(&mut self, delegate: Option<Arc<dyn ClientDelegate>>) {
        self.delegate = delegate;
    }

    /// Whether a delegate is registered.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.delegate.is_some()
    }

    /// Build the future that services `request`.
    ///
    /// The future owns everything it needs, so the caller can spawn it and
    /// keep reading while a slow handler (e.g. a permission prompt) waits.
    pub fn route(&self, request: Request) -> impl Future<Output = Response> + Send + 'static {
        let delegate = self.delegate.clone();
        let span = info_span!("inbound", request_id = %request.id, method = %request.method);
        async move {
            let Request { id, method, params } = request;
            let outcome = dispatch(delegate.as_deref(), &method, params).await;
            match outcome {
                Ok(result) => {
                    debug!("inbound request served");
                    Response::success(id, result)
                }
                Err(error) => {
                    warn!(code = error.code, error = %error.message, "inbound request failed");
                    Response::failure(id, error)
                }
            }
        }
        .instrument(span)
    }
}

async fn dispatch(
    delegate: Option<&dyn ClientDelegate>,
    method: &str,
    params: Option<Value>,
) -> std::result::Result<Value, RpcError> {
    if !INBOUND_METHODS.contains(&method) {
        return Err(RpcError::method_not_found(method));
    }
    let Some(delegate) = delegate else {
        return Err(RpcError::internal(AppError::DelegateNotConfigured(
            method.to_owned(),
        )));
    };

    match method {
        FS_READ_TEXT_FILE => reply(delegate.read_text_file(parse_params(params)?).await),
        FS_WRITE_TEXT_FILE => {
            delegate
                .write_text_file(parse_params(params)?)
                .await
                .map_err(RpcError::internal)?;
            Ok(json!({}))
        }
        TERMINAL_CREATE => reply(delegate.create_terminal(parse_params(params)?).await),
        TERMINAL_OUTPUT => reply(delegate.terminal_output(parse_params(params)?).await),
        TERMINAL_WAIT_FOR_EXIT => {
            reply(delegate.wait_for_terminal_exit(parse_params(params)?).await)
        }
        TERMINAL_KILL => {
            delegate
                .kill_terminal(parse_params(params)?)
                .await
                .map_err(RpcError::internal)?;
            Ok(json!({}))
        }
        TERMINAL_RELEASE => {
            delegate
                .release_terminal(parse_params(params)?)
                .await
                .map_err(RpcError::internal)?;
            Ok(json!({}))
        }
        _ => {
            let outcome = delegate
                .request_permission(parse_params(params)?)
                .await
                .map_err(RpcError::internal)?;
            reply(Ok(PermissionResponse { outcome }))
        }
    }
}

fn parse_params<P: DeserializeOwned>(params: Option<Value>) -> std::result::Result<P, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(RpcError::invalid_params)
}

fn reply<T: Serialize>(outcome: Result<T>) -> std::result::Result<Value, RpcError> {
    let value = outcome.map_err(RpcError::internal)?;
    serde_json::to_value(value).map_err(RpcError::internal)
}
