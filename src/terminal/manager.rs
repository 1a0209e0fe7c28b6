//! Terminal process manager.
//!
//! Terminals are long-running processes the agent starts through
//! `terminal/create`. A single actor task owns the terminal map; callers
//! talk to it through a cloneable [`TerminalManager`] handle.
//!
//! Per terminal, two pipe readers stream stdout/stderr chunks into the
//! actor's queue and a supervisor task owns the [`Child`]. The supervisor
//! waits for the process (event driven, no polling), lets the readers drain
//! for a short grace period, and only then reports the exit. Output is
//! therefore always appended before the exit status becomes visible.
//!
//! ```text
//! created ──► running ──► exited ──► released
//!                  └──(kill)──┘
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::TerminalError;
use crate::models::terminal::{
    CreateTerminalRequest, TerminalExitStatus, TerminalId, TerminalOutputResponse,
};
use crate::terminal::buffer::OutputBuffer;
use crate::terminal::command_line::parse_invocation;
use crate::terminal::resolve::{resolve_executable, DEFAULT_SEARCH_DIRS};
use crate::{AppError, Result};

/// Capacity of the actor queue; pipe readers wait when it is full.
const QUEUE_DEPTH: usize = 1024;

/// Pipe read size.
const READ_CHUNK: usize = 4096;

/// How long readers may keep draining after the process exits.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Released terminals whose final output is kept for late reads.
pub const DEFAULT_RELEASED_CACHE: usize = 32;

/// Settings shared by all terminals of one manager.
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Limit applied when a request carries no `outputByteLimit`.
    pub default_output_limit: Option<usize>,
    /// Directories searched for bare executable names.
    pub search_dirs: Vec<PathBuf>,
    /// How many released snapshots to keep; the oldest is evicted first.
    pub released_cache: usize,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            default_output_limit: None,
            search_dirs: DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect(),
            released_cache: DEFAULT_RELEASED_CACHE,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Create {
        request: CreateTerminalRequest,
        reply: Reply<TerminalId>,
    },
    Output {
        id: TerminalId,
        reply: Reply<TerminalOutputResponse>,
    },
    WaitForExit {
        id: TerminalId,
        reply: Reply<TerminalExitStatus>,
    },
    Kill {
        id: TerminalId,
        reply: Reply<()>,
    },
    Release {
        id: TerminalId,
        reply: Reply<()>,
    },
    ReleasedOutput {
        id: TerminalId,
        reply: Reply<TerminalOutputResponse>,
    },
    Live {
        reply: Reply<Vec<TerminalId>>,
    },
    Chunk {
        id: TerminalId,
        bytes: Vec<u8>,
    },
    Exited {
        id: TerminalId,
        status: TerminalExitStatus,
    },
}

/// Cloneable handle to the terminal actor.
#[derive(Debug, Clone)]
pub struct TerminalManager {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { request, .. } => write!(f, "Create({})", request.command),
            Self::Output { id, .. } => write!(f, "Output({id})"),
            Self::WaitForExit { id, .. } => write!(f, "WaitForExit({id})"),
            Self::Kill { id, .. } => write!(f, "Kill({id})"),
            Self::Release { id, .. } => write!(f, "Release({id})"),
            Self::ReleasedOutput { id, .. } => write!(f, "ReleasedOutput({id})"),
            Self::Live { .. } => write!(f, "Live"),
            Self::Chunk { id, bytes } => write!(f, "Chunk({id}, {} bytes)", bytes.len()),
            Self::Exited { id, status } => write!(f, "Exited({id}, {status:?})"),
        }
    }
}

impl TerminalManager {
    /// Start the actor. Must be called inside a Tokio runtime.
    ///
    /// The actor stops once every handle is dropped and the remaining
    /// processes have exited. Call [`TerminalManager::release_all`] first
    /// for a prompt shutdown.
    #[must_use]
    pub fn spawn(settings: TerminalSettings) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let actor = Actor {
            settings,
            events: tx.downgrade(),
            terminals: HashMap::new(),
            released: HashMap::new(),
            released_order: VecDeque::new(),
            retired: HashSet::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { commands: tx }
    }

    /// Spawn a terminal process and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::Unparsable`], [`TerminalError::ExecutableNotFound`],
    /// or [`TerminalError::Spawn`].
    pub async fn create(&self, request: CreateTerminalRequest) -> Result<TerminalId> {
        self.call(|reply| Command::Create { request, reply }).await
    }

    /// Output so far, plus the exit status once the process has exited.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::NotFound`] or [`TerminalError::Released`].
    pub async fn output(&self, id: &TerminalId) -> Result<TerminalOutputResponse> {
        let id = id.clone();
        self.call(|reply| Command::Output { id, reply }).await
    }

    /// Suspend until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::NotFound`] or [`TerminalError::Released`].
    pub async fn wait_for_exit(&self, id: &TerminalId) -> Result<TerminalExitStatus> {
        let id = id.clone();
        self.call(|reply| Command::WaitForExit { id, reply }).await
    }

    /// Kill the process and wait until it is gone. The terminal stays readable.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::NotFound`] or [`TerminalError::Released`].
    pub async fn kill(&self, id: &TerminalId) -> Result<()> {
        let id = id.clone();
        self.call(|reply| Command::Kill { id, reply }).await
    }

    /// Kill if running, wait for termination, cache the final output, and
    /// drop the terminal. Later operations fail with `Released`.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::NotFound`] or [`TerminalError::Released`].
    pub async fn release(&self, id: &TerminalId) -> Result<()> {
        let id = id.clone();
        self.call(|reply| Command::Release { id, reply }).await
    }

    /// Final output and exit status of a released terminal.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalError::NotFound`] if `id` was never released, never
    /// existed, or its snapshot has been evicted.
    pub async fn released_output(&self, id: &TerminalId) -> Result<TerminalOutputResponse> {
        let id = id.clone();
        self.call(|reply| Command::ReleasedOutput { id, reply }).await
    }

    /// Ids of terminals that have not been released.
    ///
    /// # Errors
    ///
    /// Fails only if the actor has stopped.
    pub async fn live_terminals(&self) -> Result<Vec<TerminalId>> {
        self.call(|reply| Command::Live { reply }).await
    }

    /// Release every live terminal.
    ///
    /// # Errors
    ///
    /// Fails only if the actor has stopped.
    pub async fn release_all(&self) -> Result<()> {
        let ids = self.live_terminals().await?;
        for (id, outcome) in ids
            .iter()
            .zip(join_all(ids.iter().map(|id| self.release(id))).await)
        {
            if let Err(err) = outcome {
                debug!(terminal_id = %id, %err, "release during shutdown failed");
            }
        }
        Ok(())
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> AppError {
    AppError::Io("terminal manager is not running".into())
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct Terminal {
    buffer: OutputBuffer,
    exit: Option<TerminalExitStatus>,
    kill: Option<oneshot::Sender<()>>,
    exit_waiters: Vec<Reply<TerminalExitStatus>>,
    kill_waiters: Vec<Reply<()>>,
    release_waiters: Vec<Reply<()>>,
}

impl Terminal {
    fn snapshot(&self) -> TerminalOutputResponse {
        TerminalOutputResponse {
            output: self.buffer.as_str().to_owned(),
            truncated: self.buffer.is_truncated(),
            exit_status: self.exit.clone(),
        }
    }

    fn request_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            // The supervisor may have just seen the exit itself.
            let _ = kill.send(());
        }
    }
}

struct Actor {
    settings: TerminalSettings,
    events: mpsc::WeakSender<Command>,
    terminals: HashMap<TerminalId, Terminal>,
    released: HashMap<TerminalId, TerminalOutputResponse>,
    /// Snapshot insertion order, for eviction.
    released_order: VecDeque<TerminalId>,
    /// Every id ever released, so evicted ones still report `Released`.
    retired: HashSet<TerminalId>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
        }
        debug!(live = self.terminals.len(), "terminal manager stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Create { request, reply } => {
                let _ = reply.send(self.create(request));
            }
            Command::Output { id, reply } => {
                let _ = reply.send(self.live(&id).map(Terminal::snapshot));
            }
            Command::WaitForExit { id, reply } => match self.live_mut(&id) {
                Ok(terminal) => match &terminal.exit {
                    Some(status) => {
                        let _ = reply.send(Ok(status.clone()));
                    }
                    None => terminal.exit_waiters.push(reply),
                },
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::Kill { id, reply } => match self.live_mut(&id) {
                Ok(terminal) if terminal.exit.is_some() => {
                    let _ = reply.send(Ok(()));
                }
                Ok(terminal) => {
                    info!(terminal_id = %id, "killing terminal");
                    terminal.request_kill();
                    terminal.kill_waiters.push(reply);
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::Release { id, reply } => self.release(id, reply),
            Command::ReleasedOutput { id, reply } => {
                let outcome = self
                    .released
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| TerminalError::NotFound(id.to_string()).into());
                let _ = reply.send(outcome);
            }
            Command::Live { reply } => {
                let _ = reply.send(Ok(self.terminals.keys().cloned().collect()));
            }
            Command::Chunk { id, bytes } => {
                if let Some(terminal) = self.terminals.get_mut(&id) {
                    terminal.buffer.push_bytes(&bytes);
                }
            }
            Command::Exited { id, status } => self.exited(&id, status),
        }
    }

    fn create(&mut self, request: CreateTerminalRequest) -> Result<TerminalId> {
        let (program, args) = parse_invocation(&request.command, request.args.as_deref())?;
        let executable =
            resolve_executable(&program, &self.settings.search_dirs, request.cwd.as_deref())?;

        let mut cmd = ProcessCommand::new(&executable);
        cmd.args(&args)
            .envs(request.env.iter().map(|var| (&var.name, &var.value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd
            .spawn()
            .map_err(|err| TerminalError::Spawn(format!("{}: {err}", executable.display())))?;

        let events = self
            .events
            .upgrade()
            .ok_or_else(|| AppError::Io("terminal manager is shutting down".into()))?;
        let id = TerminalId::generate();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(id.clone(), stdout, events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(id.clone(), stderr, events.clone())));
        }
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(id.clone(), child, readers, kill_rx, events));

        let limit = request
            .output_byte_limit
            .or(self.settings.default_output_limit);
        info!(
            terminal_id = %id,
            session_id = request.session_id.as_ref().map(ToString::to_string),
            ?pid,
            program = %executable.display(),
            ?args,
            ?limit,
            "terminal created"
        );
        self.terminals.insert(
            id.clone(),
            Terminal {
                buffer: OutputBuffer::new(limit),
                exit: None,
                kill: Some(kill_tx),
                exit_waiters: Vec::new(),
                kill_waiters: Vec::new(),
                release_waiters: Vec::new(),
            },
        );
        Ok(id)
    }

    fn release(&mut self, id: TerminalId, reply: Reply<()>) {
        let terminal = match self.live_mut(&id) {
            Ok(terminal) => terminal,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        if terminal.exit.is_some() {
            self.finalize(&id);
            let _ = reply.send(Ok(()));
        } else {
            debug!(terminal_id = %id, "release requested while running, killing");
            terminal.request_kill();
            terminal.release_waiters.push(reply);
        }
    }

    fn exited(&mut self, id: &TerminalId, status: TerminalExitStatus) {
        let Some(terminal) = self.terminals.get_mut(id) else {
            return;
        };
        terminal.buffer.finish();
        terminal.exit = Some(status.clone());
        terminal.kill = None;
        info!(terminal_id = %id, exit_code = ?status.exit_code, signal = ?status.signal, "terminal exited");

        for waiter in terminal.exit_waiters.drain(..) {
            let _ = waiter.send(Ok(status.clone()));
        }
        for waiter in terminal.kill_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        let release_waiters = std::mem::take(&mut terminal.release_waiters);
        if !release_waiters.is_empty() {
            self.finalize(id);
            for waiter in release_waiters {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Move an exited terminal into the released cache.
    fn finalize(&mut self, id: &TerminalId) {
        if let Some(terminal) = self.terminals.remove(id) {
            debug!(terminal_id = %id, bytes = terminal.buffer.len(), "terminal released");
            self.retired.insert(id.clone());
            self.released.insert(id.clone(), terminal.snapshot());
            self.released_order.push_back(id.clone());
            while self.released_order.len() > self.settings.released_cache {
                if let Some(oldest) = self.released_order.pop_front() {
                    debug!(terminal_id = %oldest, "released output evicted");
                    self.released.remove(&oldest);
                }
            }
        }
    }

    fn live(&self, id: &TerminalId) -> Result<&Terminal> {
        match self.terminals.get(id) {
            Some(terminal) => Ok(terminal),
            None => Err(self.missing(id)),
        }
    }

    fn live_mut(&mut self, id: &TerminalId) -> Result<&mut Terminal> {
        if !self.terminals.contains_key(id) {
            return Err(self.missing(id));
        }
        self.terminals
            .get_mut(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()).into())
    }

    fn missing(&self, id: &TerminalId) -> AppError {
        if self.retired.contains(id) {
            TerminalError::Released(id.to_string()).into()
        } else {
            TerminalError::NotFound(id.to_string()).into()
        }
    }
}

/// Forward one pipe into the actor until EOF.
async fn pump<R>(id: TerminalId, mut pipe: R, events: mpsc::Sender<Command>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Command::Chunk {
                    id: id.clone(),
                    bytes: buf[..n].to_vec(),
                };
                if events.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(terminal_id = %id, %err, "terminal pipe read failed");
                break;
            }
        }
    }
}

/// Own the child: wait for exit or a kill request, drain readers, report.
async fn supervise(
    id: TerminalId,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    mut kill: oneshot::Receiver<()>,
    events: mpsc::Sender<Command>,
) {
    let waited = tokio::select! {
        status = child.wait() => status,
        // A dropped sender means the manager is gone: kill as well.
        _ = &mut kill => {
            if let Err(err) = child.start_kill() {
                debug!(terminal_id = %id, %err, "kill failed, process already exiting");
            }
            child.wait().await
        }
    };
    let status = match waited {
        Ok(status) => TerminalExitStatus::from_status(status),
        Err(err) => {
            warn!(terminal_id = %id, %err, "failed to wait for terminal process");
            TerminalExitStatus::default()
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
            debug!(terminal_id = %id, "pipe still open after exit, detaching reader");
            reader.abort();
        }
    }

    let _ = events.send(Command::Exited { id, status }).await;
}
