#![forbid(unsafe_code)]

//! `acp-engine`: drive an ACP agent from the command line.
//!
//! `prompt` launches the configured agent, opens a session, sends one
//! prompt, and streams the agent's reply to stdout. `exec` runs one command
//! through the timeout-guarded executor. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_engine::acp::{AgentClient, ClientOptions};
use acp_engine::config::PermissionPolicy;
use acp_engine::host::fs::FileAccess;
use acp_engine::host::permission::{
    AutoApprover, AutoPolicy, ChannelApprover, PermissionApprover, PermissionPrompt,
};
use acp_engine::host::HostDelegate;
use acp_engine::models::protocol::{ContentBlock, SessionId};
use acp_engine::process::executor::{self, CommandSpec};
use acp_engine::session::{Role, Session, SessionSetup, SessionState};
use acp_engine::terminal::TerminalManager;
use acp_engine::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-engine", about = "Drive ACP agents over stdio", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one prompt to the configured agent and stream the reply.
    Prompt {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,
        /// Override the agent working directory.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Resume an existing session instead of creating one.
        #[arg(long)]
        session: Option<String>,
        /// Prompt text; read from stdin when omitted.
        text: Vec<String>,
    },
    /// Run one command with a hard timeout.
    Exec {
        /// Deadline in seconds.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// Working directory.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Program to run.
        program: String,
        /// Arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args.command))
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Prompt {
            config,
            cwd,
            session,
            text,
        } => run_prompt(config, cwd, session, text).await,
        Commands::Exec {
            timeout,
            cwd,
            program,
            args,
        } => run_exec(timeout, cwd, program, args).await,
    }
}

async fn run_prompt(
    config_path: PathBuf,
    cwd: Option<PathBuf>,
    resume: Option<String>,
    text: Vec<String>,
) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&config_path)?;
    if let Some(cwd) = cwd {
        config.agent.cwd = cwd
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid cwd override: {err}")))?;
    }
    let credentials = config.load_credentials().await?;
    info!(agent = config.agent.command, cwd = %config.agent.cwd.display(), "configuration loaded");

    let prompt_text = if text.is_empty() {
        read_stdin().await?
    } else {
        text.join(" ")
    };

    // ── Host capabilities ───────────────────────────────
    let terminals = TerminalManager::spawn(config.terminal_settings());
    let files = if config.host.confine_fs_to_cwd {
        FileAccess::confined_to(&config.agent.cwd)?
    } else {
        FileAccess::unrestricted()
    };
    let approver: Arc<dyn PermissionApprover> = match config.host.permission {
        PermissionPolicy::Allow => Arc::new(AutoApprover::new(AutoPolicy::Allow)),
        PermissionPolicy::Reject => Arc::new(AutoApprover::new(AutoPolicy::Reject)),
        PermissionPolicy::Ask => {
            let (approver, prompts) = ChannelApprover::new();
            tokio::spawn(ask_on_terminal(prompts));
            Arc::new(approver)
        }
    };
    let delegate = HostDelegate::new(files, terminals.clone(), approver);

    // ── Launch and open the session ─────────────────────
    let client = AgentClient::launch(
        &config.spawn_config(),
        ClientOptions {
            delegate: Some(Arc::new(delegate)),
            request_timeout: config.request_timeout(),
            terminals: Some(terminals),
        },
    )
    .await?;

    let mut setup = SessionSetup::new(config.agent.cwd.clone());
    setup.protocol_version = config.agent.protocol_version;
    setup.auth = credentials;
    let session = match resume {
        Some(id) => Session::resume(client, setup, SessionId(id)).await?,
        None => Session::start(client, setup).await?,
    };
    info!(session_id = %session.id(), "session ready");

    let printer = tokio::spawn(print_agent_text(session.subscribe()));

    // ── Run the turn until done or interrupted ──────────
    let outcome = tokio::select! {
        outcome = session.prompt(vec![ContentBlock::text(prompt_text)]) => Some(outcome),
        () = shutdown_signal() => None,
    };

    session.terminate().await;
    if let Err(err) = printer.await {
        warn!(%err, "output task failed");
    }

    match outcome {
        Some(Ok(reason)) => {
            eprintln!("\nstop reason: {reason:?}");
            Ok(())
        }
        Some(Err(err)) => {
            error!(%err, "prompt failed");
            Err(err)
        }
        None => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

async fn run_exec(
    timeout: u64,
    cwd: Option<PathBuf>,
    program: String,
    args: Vec<String>,
) -> Result<()> {
    let mut spec = CommandSpec::new(program)
        .args(args)
        .timeout(Duration::from_secs(timeout));
    if let Some(cwd) = cwd {
        spec = spec.cwd(cwd);
    }
    let stdout = executor::run(&spec).await?;
    let mut out = tokio::io::stdout();
    out.write_all(stdout.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

async fn read_stdin() -> Result<String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut text = String::new();
    while let Some(line) = lines.next_line().await? {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
    }
    if text.trim().is_empty() {
        return Err(AppError::Config("empty prompt".into()));
    }
    Ok(text)
}

/// Write the newest agent message to stdout as it grows.
async fn print_agent_text(mut state: watch::Receiver<SessionState>) {
    let mut out = tokio::io::stdout();
    let baseline = state.borrow().messages.len();
    let mut printed: (usize, usize) = (baseline, 0);

    loop {
        let delta = {
            let snapshot = state.borrow_and_update();
            let mut delta = String::new();
            for (index, message) in snapshot.messages.iter().enumerate().skip(printed.0) {
                if message.role != Role::Agent {
                    continue;
                }
                let start = if index == printed.0 { printed.1 } else { 0 };
                if index != printed.0 && !delta.is_empty() {
                    delta.push('\n');
                }
                delta.push_str(message.text.get(start..).unwrap_or_default());
                printed = (index, message.text.len());
            }
            delta
        };
        if !delta.is_empty() {
            let _ = out.write_all(delta.as_bytes()).await;
            let _ = out.flush().await;
        }
        if state.changed().await.is_err() {
            break;
        }
    }
}

/// Answer permission prompts interactively on stderr/stdin.
async fn ask_on_terminal(mut prompts: mpsc::UnboundedReceiver<PermissionPrompt>) {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(prompt) = prompts.recv().await {
        let title = prompt
            .request
            .tool_call
            .as_ref()
            .and_then(|call| call.title.clone())
            .unwrap_or_else(|| "tool call".into());
        eprintln!("\nThe agent asks permission for: {title}");
        for (index, option) in prompt.request.options.iter().enumerate() {
            eprintln!("  [{}] {}", index + 1, option.name);
        }
        eprint!("choice (empty to cancel): ");

        let choice = match input.next_line().await {
            Ok(Some(line)) => line.trim().parse::<usize>().ok(),
            _ => None,
        };
        let option_id = choice
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| prompt.request.options.get(i))
            .map(|opt| opt.option_id.clone());
        match option_id {
            Some(option_id) => {
                if let Err((prompt, err)) = prompt.select(&option_id) {
                    warn!(%err, "invalid permission choice");
                    prompt.cancel();
                }
            }
            None => prompt.cancel(),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
