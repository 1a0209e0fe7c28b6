//! Outbound request correlation.
//!
//! The [`Correlator`] allocates monotonic integer ids and keeps one
//! [`oneshot`] waiter per in-flight request. It is plain data owned by the
//! connection task; nothing else touches the table, so no locking is needed.
//!
//! Every waiter is completed exactly once: by [`Correlator::resolve`] when the
//! matching response arrives, by [`Correlator::abandon`] when the caller
//! gave up, or by [`Correlator::fail_all`] when the transport dies.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::TransportError;
use crate::models::message::{RequestId, Response};
use crate::{AppError, Result};

/// Receiving half handed to the caller of a request.
pub type ResponseWaiter = oneshot::Receiver<Result<Value>>;

/// Pending-request table keyed by request id.
#[derive(Debug, Default)]
pub struct Correlator {
    next_id: i64,
    pending: HashMap<RequestId, PendingRequest>,
}

#[derive(Debug)]
struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

impl Correlator {
    /// Create an empty table; the first allocated id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and register a waiter for it.
    pub fn register(&mut self, method: &str) -> (RequestId, ResponseWaiter) {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_owned(),
                tx,
            },
        );
        (id, rx)
    }

    /// Complete the waiter for `response.id`.
    ///
    /// Returns `false` when no request with that id is pending; the response
    /// is then discarded (the request may already have been failed).
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(id) = response.id.clone() else {
            debug!("correlator: response without id discarded");
            return false;
        };
        let Some(pending) = self.pending.remove(&id) else {
            debug!(request_id = %id, "correlator: response for unknown request discarded");
            return false;
        };

        let outcome = response_outcome(&pending.method, response);
        // The caller may have dropped its receiver; nothing to do then.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Complete one waiter with `error`, e.g. when the write failed or a
    /// timeout fired. Returns `false` if `id` was not pending.
    pub fn abandon(&mut self, id: &RequestId, error: AppError) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                let _ = pending.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Complete every pending waiter with `error`.
    pub fn fail_all(&mut self, error: &TransportError) {
        for (id, pending) in self.pending.drain() {
            debug!(request_id = %id, method = pending.method, %error, "correlator: failing pending request");
            let _ = pending.tx.send(Err(AppError::Transport(error.clone())));
        }
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is in flight.
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }
}

/// Turn a response into the caller's result.
fn response_outcome(method: &str, response: Response) -> Result<Value> {
    match (response.error, response.result) {
        (Some(error), _) => Err(AppError::Agent(error)),
        (None, Some(result)) => Ok(result),
        (None, None) => Err(AppError::Protocol(format!(
            "response to {method} has neither result nor error"
        ))),
    }
}
