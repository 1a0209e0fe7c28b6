//! Writer task for an agent's stdin.
//!
//! The connection loop encodes each outbound message and queues the line
//! here; it never waits on the pipe itself, so an agent that is slow to read
//! cannot stop the loop from draining the agent's stdout. Lines are written
//! in queue order with one `write_all` + `flush` each.
//!
//! The task stops when the queue closes, when `cancel` fires, or after the
//! first failed write. Anything still queued at that point is failed through
//! its [`Ack`].

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::message::RequestId;
use crate::{AppError, Result};

/// Who learns the outcome of a write.
#[derive(Debug)]
pub enum Ack {
    /// Nobody; failures are only logged (inbound replies).
    Silent,
    /// An outbound request; a failed write is reported back by id.
    Request(RequestId),
    /// A notification whose caller waits for the write to finish.
    Notify(oneshot::Sender<Result<()>>),
}

impl Ack {
    fn succeeded(self) {
        if let Self::Notify(reply) = self {
            let _ = reply.send(Ok(()));
        }
    }

    fn failed(self, label: &str, error: AppError, failures: &mpsc::UnboundedSender<WriteFailure>) {
        match self {
            Self::Silent => warn!(label, %error, "writer: reply to agent not written"),
            Self::Request(id) => {
                // The loop may already be gone; its shutdown fails the request then.
                let _ = failures.send(WriteFailure { id, error });
            }
            Self::Notify(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// One encoded line, newline included.
#[derive(Debug)]
pub struct Outbound {
    /// Bytes to write.
    pub line: Vec<u8>,
    /// Completion target.
    pub ack: Ack,
}

/// A request whose line never reached the agent.
#[derive(Debug)]
pub struct WriteFailure {
    /// The request's id.
    pub id: RequestId,
    /// Why the write failed.
    pub error: AppError,
}

/// Write queued lines to `writer` until the queue closes or `cancel` fires.
pub async fn run_writer<W>(
    label: String,
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    failures: mpsc::UnboundedSender<WriteFailure>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut stopped_by: Option<String> = None;

    loop {
        let outbound = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "writer: cancellation received, stopping");
                break;
            }

            next = queue.recv() => match next {
                Some(outbound) => outbound,
                None => {
                    debug!(label, "writer: queue closed, stopping");
                    break;
                }
            },
        };

        let written = tokio::select! {
            biased;

            () = cancel.cancelled() => Err(AppError::Io("write cancelled".into())),
            res = write_line(&mut writer, &outbound.line) => res,
        };
        match written {
            Ok(()) => outbound.ack.succeeded(),
            Err(err) => {
                warn!(label, error = %err, "writer: write to agent failed, stopping");
                stopped_by = Some(err.to_string());
                outbound.ack.failed(&label, err, &failures);
                break;
            }
        }
    }

    queue.close();
    let reason = stopped_by.unwrap_or_else(|| "connection closed".into());
    while let Ok(outbound) = queue.try_recv() {
        let error = AppError::Io(format!("write abandoned: {reason}"));
        outbound.ack.failed(&label, error, &failures);
    }

    if let Err(err) = writer.shutdown().await {
        debug!(label, %err, "writer: closing agent stdin failed");
    }
}

async fn write_line<W>(writer: &mut W, line: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(line)
        .await
        .map_err(|e| AppError::Io(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::Io(format!("flush failed: {e}")))
}
