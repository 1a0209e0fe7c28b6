//! Connection loop: the single owner of all per-agent protocol state.
//!
//! One task per agent process reads NDJSON from the agent's stdout and owns
//! the [`Correlator`], the [`CapabilityRouter`], and (when launched by us)
//! the child process. Outbound lines go to a companion writer task
//! ([`crate::acp::writer`]) so a blocked stdin never stalls reading. Public
//! handles talk to it only through a command queue, so operations on one
//! agent never interleave their effects.
//!
//! Inbound messages are routed as follows:
//!
//! | Kind          | Destination                                   |
//! |---------------|-----------------------------------------------|
//! | Response      | [`Correlator::resolve`]                       |
//! | Notification  | notification channel, in wire order           |
//! | Request       | [`CapabilityRouter::route`] on a spawned task; the reply is written back by this loop |
//!
//! When the transport ends (EOF, I/O error, child exit, or cancellation)
//! every pending request is failed with a [`TransportError`], handler
//! tasks are aborted, and the notification channel closes.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::{encode_message, Decoded, Framer};
use crate::acp::correlator::{Correlator, ResponseWaiter};
use crate::acp::router::{CapabilityRouter, ClientDelegate};
use crate::acp::writer::{run_writer, Ack, Outbound, WriteFailure};
use crate::errors::TransportError;
use crate::models::message::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::{AppError, Result};

/// Capacity of the command queue.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Read buffer size for agent stdout.
const READ_CHUNK: usize = 8 * 1024;

/// How long to keep draining stdout after the child exits.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for the child after stdout closes before killing it.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// How long the writer may keep flushing queued lines at shutdown.
const WRITER_GRACE: Duration = Duration::from_millis(500);

/// Liveness of a connection as seen by its handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The loop is running.
    Running,
    /// The loop ended with this error; every later call fails with it.
    Closed(TransportError),
}

/// Commands accepted by the connection loop.
enum Command {
    Request {
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<(RequestId, ResponseWaiter)>,
    },
    Notify {
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<()>>,
    },
    Abandon {
        id: RequestId,
        error: AppError,
    },
    SetDelegate(Option<Arc<dyn ClientDelegate>>),
}

/// Cheap, cloneable handle to a running connection loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request { method, .. } => write!(f, "Request({method})"),
            Self::Notify { method, .. } => write!(f, "Notify({method})"),
            Self::Abandon { id, .. } => write!(f, "Abandon({id})"),
            Self::SetDelegate(d) => write!(f, "SetDelegate({})", d.is_some()),
        }
    }
}

/// Everything produced by [`spawn_connection`].
#[derive(Debug)]
pub struct Connection {
    /// Handle for outbound calls.
    pub handle: ConnectionHandle,
    /// Inbound notifications in wire order; closes when the loop ends.
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    /// Fires the loop's shutdown.
    pub cancel: CancellationToken,
    /// The loop task.
    pub task: JoinHandle<()>,
}

/// Options for [`spawn_connection`].
#[derive(Default)]
pub struct ConnectionOptions {
    /// Label used in log fields.
    pub label: String,
    /// Delegate for inbound capability requests.
    pub delegate: Option<Arc<dyn ClientDelegate>>,
    /// Agent process, owned by the loop so its exit ends the connection.
    pub child: Option<Child>,
    /// Deadline for outbound requests; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

/// Start the connection loop over an agent's stdout (`reader`) and stdin (`writer`).
#[must_use]
pub fn spawn_connection<R, W>(reader: R, writer: W, options: ConnectionOptions) -> Connection
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (notif_tx, notif_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Running);
    let cancel = CancellationToken::new();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();
    let writer_stop = cancel.child_token();
    let writer_task = tokio::spawn(run_writer(
        options.label.clone(),
        writer,
        out_rx,
        fail_tx,
        writer_stop.clone(),
    ));

    let event_loop = EventLoop {
        label: options.label,
        outbound: Some(out_tx),
        writer_task: Some(writer_task),
        writer_stop,
        correlator: Correlator::new(),
        router: CapabilityRouter::new(options.delegate),
        child: options.child,
        exit_status: None,
        inbound: JoinSet::new(),
        inbound_ids: HashMap::new(),
        notifications: notif_tx,
    };
    let task = tokio::spawn(event_loop.run(reader, cmd_rx, fail_rx, state_tx, cancel.clone()));

    Connection {
        handle: ConnectionHandle {
            commands: cmd_tx,
            state: state_rx,
            request_timeout: options.request_timeout,
        },
        notifications: notif_rx,
        cancel,
        task,
    }
}

impl ConnectionHandle {
    /// Send a request and suspend until its response, transport death, or
    /// the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`AppError::Agent`] for a JSON-RPC error reply.
    /// - [`AppError::Transport`] when the agent is gone.
    /// - [`AppError::Protocol`] for a response without result or error.
    /// - [`AppError::Timeout`] when the request timeout elapses.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Command::Request {
            method: method.to_owned(),
            params,
            reply: reply_tx,
        })
        .await?;
        let (id, waiter) = reply_rx.await.map_err(|_| self.closed_error())?;

        let outcome = match self.request_timeout {
            None => waiter.await,
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    warn!(method, request_id = %id, ?limit, "request timed out");
                    let error = AppError::Timeout(format!("{method} exceeded {limit:?}"));
                    // The loop may already be gone; the timeout is reported either way.
                    let _ = self
                        .commands
                        .send(Command::Abandon {
                            id,
                            error: AppError::Timeout(format!("{method} abandoned")),
                        })
                        .await;
                    return Err(error);
                }
            },
        };
        outcome.map_err(|_| self.closed_error())?
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when the agent is gone, or
    /// [`AppError::Io`] if the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Command::Notify {
            method: method.to_owned(),
            params,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| self.closed_error())?
    }

    /// Register or replace the capability delegate.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when the loop has ended.
    pub async fn set_delegate(&self, delegate: Option<Arc<dyn ClientDelegate>>) -> Result<()> {
        self.submit(Command::SetDelegate(delegate)).await
    }

    /// Current liveness.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Whether the loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Running)
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> AppError {
        match &*self.state.borrow() {
            ConnectionState::Closed(err) => AppError::Transport(err.clone()),
            ConnectionState::Running => AppError::Transport(TransportError::NotRunning),
        }
    }
}

// ── Event loop ────────────────────────────────────────────────────────────────

struct EventLoop {
    label: String,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    writer_task: Option<JoinHandle<()>>,
    writer_stop: CancellationToken,
    correlator: Correlator,
    router: CapabilityRouter,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
    inbound: JoinSet<Response>,
    inbound_ids: HashMap<tokio::task::Id, RequestId>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl EventLoop {
    async fn run<R>(
        mut self,
        mut reader: R,
        mut commands: mpsc::Receiver<Command>,
        mut write_failures: mpsc::UnboundedReceiver<WriteFailure>,
        state: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) where
        R: AsyncRead + Unpin + Send,
    {
        let label = self.label.clone();
        let mut framer = Framer::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut drain_deadline: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;
        let mut writer_alive = true;

        let end = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(label, "connection: cancellation received, stopping");
                    break TransportError::NotRunning;
                }

                () = async { if let Some(d) = drain_deadline.as_mut() { d.await } }, if drain_deadline.is_some() => {
                    debug!(label, "connection: stdout still open after exit, stopping");
                    break self.exit_error();
                }

                status = wait_child(self.child.as_mut()), if self.child.is_some() && self.exit_status.is_none() => {
                    match status {
                        Ok(status) => {
                            info!(label, %status, "agent process exited");
                            self.exit_status = Some(status);
                        }
                        Err(err) => {
                            warn!(label, %err, "failed to wait for agent process");
                            self.child = None;
                        }
                    }
                    drain_deadline = Some(Box::pin(tokio::time::sleep(EXIT_DRAIN_GRACE)));
                }

                failure = write_failures.recv(), if writer_alive => {
                    match failure {
                        Some(WriteFailure { id, error }) => {
                            self.correlator.abandon(&id, error);
                        }
                        None => writer_alive = false,
                    }
                }

                joined = self.inbound.join_next_with_id(), if !self.inbound.is_empty() => {
                    if let Some(joined) = joined {
                        self.finish_inbound(joined);
                    }
                }

                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!(label, "connection: all handles dropped, stopping");
                            break TransportError::NotRunning;
                        }
                    }
                }

                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            for decoded in framer.finish() {
                                self.handle_decoded(decoded);
                            }
                            debug!(label, "connection: EOF on agent stdout");
                            break self.reap_after_eof().await;
                        }
                        Ok(n) => {
                            for decoded in framer.feed(&buf[..n]) {
                                self.handle_decoded(decoded);
                            }
                        }
                        Err(err) => {
                            warn!(label, %err, "connection: read error, stopping");
                            break self.reap_after_eof().await;
                        }
                    }
                }
            }
        };

        self.shutdown(&end).await;
        // Handles observe the closed state before their waiters resolve.
        let _ = state.send(ConnectionState::Closed(end.clone()));
        self.correlator.fail_all(&end);
        info!(label, reason = %end, "connection closed");
    }

    fn handle_decoded(&mut self, decoded: Decoded) {
        match decoded {
            Ok(Message::Response(response)) => {
                self.correlator.resolve(response);
            }
            Ok(Message::Notification(notification)) => {
                if self.notifications.send(notification).is_err() {
                    debug!(label = self.label, "connection: notification receiver dropped");
                }
            }
            Ok(Message::Request(request)) => self.spawn_inbound(request),
            Err(err) => match err.response_id {
                Some(id) => {
                    warn!(label = self.label, request_id = %id, error = %err.error, "connection: undecodable response, failing its request");
                    self.correlator.abandon(&id, err.error);
                }
                None => {
                    warn!(label = self.label, error = %err.error, "connection: undecodable line, skipping");
                }
            },
        }
    }

    fn spawn_inbound(&mut self, request: Request) {
        let id = request.id.clone();
        debug!(label = self.label, request_id = %id, method = request.method, "connection: inbound request");
        let handle = self.inbound.spawn(self.router.route(request));
        self.inbound_ids.insert(handle.id(), id);
    }

    fn finish_inbound(
        &mut self,
        joined: std::result::Result<(tokio::task::Id, Response), tokio::task::JoinError>,
    ) {
        let response = match joined {
            Ok((task_id, response)) => {
                self.inbound_ids.remove(&task_id);
                response
            }
            Err(err) => {
                let Some(id) = self.inbound_ids.remove(&err.id()) else {
                    return;
                };
                warn!(label = self.label, request_id = %id, %err, "inbound handler panicked");
                Response::failure(id, RpcError::internal(format!("handler failed: {err}")))
            }
        };
        self.enqueue(&Message::Response(response), Ack::Silent);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Request {
                method,
                params,
                reply,
            } => {
                let (id, waiter) = self.correlator.register(&method);
                debug!(label = self.label, request_id = %id, method, "connection: outbound request");
                let message = Message::Request(Request {
                    id: id.clone(),
                    method,
                    params,
                });
                self.enqueue(&message, Ack::Request(id.clone()));
                // A dropped caller simply never reads its waiter.
                let _ = reply.send((id, waiter));
            }
            Command::Notify {
                method,
                params,
                reply,
            } => {
                let message = Message::Notification(Notification { method, params });
                self.enqueue(&message, Ack::Notify(reply));
            }
            Command::Abandon { id, error } => {
                self.correlator.abandon(&id, error);
            }
            Command::SetDelegate(delegate) => {
                self.router.set_delegate(delegate);
                debug!(label = self.label, configured = self.router.is_configured(), "connection: delegate updated");
            }
        }
    }

    /// Encode one line and queue it for the writer. Only this loop queues,
    /// so lines never interleave.
    fn enqueue(&mut self, message: &Message, ack: Ack) {
        let line = match encode_message(message) {
            Ok(line) => line,
            Err(err) => {
                self.write_failed(ack, err);
                return;
            }
        };
        let mut line = line.into_bytes();
        line.push(b'\n');

        let queued = match &self.outbound {
            Some(tx) => tx.send(Outbound { line, ack }).map_err(|rejected| rejected.0.ack),
            None => Err(ack),
        };
        if let Err(ack) = queued {
            self.write_failed(ack, AppError::Io("agent stdin writer has stopped".into()));
        }
    }

    fn write_failed(&mut self, ack: Ack, error: AppError) {
        match ack {
            Ack::Silent => {
                warn!(label = self.label, %error, "connection: failed to write inbound reply");
            }
            Ack::Request(id) => {
                self.correlator.abandon(&id, error);
            }
            Ack::Notify(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Let the writer flush what is queued, then stop it.
    async fn close_writer(&mut self) {
        self.outbound = None;
        let Some(mut task) = self.writer_task.take() else {
            return;
        };
        if tokio::time::timeout(WRITER_GRACE, &mut task).await.is_ok() {
            return;
        }
        debug!(label = self.label, "writer still busy at shutdown, stopping it");
        self.writer_stop.cancel();
        if tokio::time::timeout(WRITER_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }

    /// After stdout closed: give the child a moment to exit and report how it ended.
    async fn reap_after_eof(&mut self) -> TransportError {
        if self.exit_status.is_none() {
            if let Some(child) = self.child.as_mut() {
                match tokio::time::timeout(EXIT_WAIT, child.wait()).await {
                    Ok(Ok(status)) => self.exit_status = Some(status),
                    Ok(Err(err)) => warn!(label = self.label, %err, "failed to wait for agent process"),
                    Err(_elapsed) => {
                        debug!(label = self.label, "agent closed stdout but is still running");
                    }
                }
            }
        }
        self.exit_error()
    }

    fn exit_error(&self) -> TransportError {
        match self.exit_status {
            Some(status) => TransportError::Exited {
                code: status.code(),
            },
            None => TransportError::NotRunning,
        }
    }

    async fn shutdown(&mut self, end: &TransportError) {
        self.inbound.abort_all();
        self.inbound_ids.clear();
        self.close_writer().await;

        if self.exit_status.is_none() {
            if let Some(child) = self.child.as_mut() {
                debug!(label = self.label, reason = %end, "killing agent process");
                if let Err(err) = child.start_kill() {
                    debug!(label = self.label, %err, "agent process already gone");
                }
                match tokio::time::timeout(EXIT_WAIT, child.wait()).await {
                    Ok(Ok(status)) => self.exit_status = Some(status),
                    Ok(Err(err)) => warn!(label = self.label, %err, "failed to reap agent process"),
                    Err(_elapsed) => warn!(label = self.label, "agent process did not exit after kill"),
                }
            }
        }
    }
}

async fn wait_child(child: Option<&mut Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}
