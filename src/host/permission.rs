//! Permission approvers.
//!
//! The agent asks before sensitive tool calls. An approver turns each
//! [`PermissionRequest`] into exactly one [`PermissionOutcome`]:
//!
//! - [`ChannelApprover`] hands the prompt to a UI over a channel and
//!   suspends until the UI answers. Dropping the prompt counts as
//!   `cancelled`.
//! - [`AutoApprover`] decides immediately from the offered option kinds,
//!   for headless runs.

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::acp::router::DelegateFuture;
use crate::models::permission::{PermissionOutcome, PermissionRequest};
use crate::{AppError, Result};

/// Decides permission prompts.
pub trait PermissionApprover: Send + Sync {
    /// Resolve `request` to one outcome.
    ///
    /// # Errors
    ///
    /// Implementations may fail when no decision maker is reachable.
    fn decide(&self, request: PermissionRequest) -> DelegateFuture<'_, PermissionOutcome>;
}

/// A pending prompt delivered to the UI.
#[derive(Debug)]
pub struct PermissionPrompt {
    /// What the agent asked.
    pub request: PermissionRequest,
    responder: oneshot::Sender<PermissionOutcome>,
}

impl PermissionPrompt {
    /// Answer with one of the offered options.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] (and leaves the prompt unanswered) if
    /// `option_id` was not offered.
    pub fn select(self, option_id: &str) -> std::result::Result<(), (Self, AppError)> {
        if !self.request.offers(option_id) {
            let err = AppError::NotFound(format!("permission option {option_id}"));
            return Err((self, err));
        }
        let _ = self.responder.send(PermissionOutcome::Selected {
            option_id: option_id.to_owned(),
        });
        Ok(())
    }

    /// Dismiss the prompt.
    pub fn cancel(self) {
        let _ = self.responder.send(PermissionOutcome::Cancelled);
    }
}

/// Forwards prompts to a UI consumer.
#[derive(Debug, Clone)]
pub struct ChannelApprover {
    prompts: mpsc::UnboundedSender<PermissionPrompt>,
}

impl ChannelApprover {
    /// Create the approver and the receiving end for the UI.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PermissionPrompt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { prompts: tx }, rx)
    }
}

impl PermissionApprover for ChannelApprover {
    fn decide(&self, request: PermissionRequest) -> DelegateFuture<'_, PermissionOutcome> {
        Box::pin(async move {
            let session_id = request.session_id.clone();
            let (tx, rx) = oneshot::channel();
            let prompt = PermissionPrompt {
                request,
                responder: tx,
            };
            if self.prompts.send(prompt).is_err() {
                warn!(%session_id, "no permission consumer, cancelling prompt");
                return Ok(PermissionOutcome::Cancelled);
            }
            let outcome = rx.await.unwrap_or(PermissionOutcome::Cancelled);
            info!(%session_id, ?outcome, "permission decided");
            Ok(outcome)
        })
    }
}

/// Policy of an [`AutoApprover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPolicy {
    /// Pick the first allow option; reject when none is offered.
    #[default]
    Allow,
    /// Always pick a reject option.
    Reject,
}

/// Decides without asking anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprover {
    policy: AutoPolicy,
}

impl AutoApprover {
    /// Approver with the given policy.
    #[must_use]
    pub fn new(policy: AutoPolicy) -> Self {
        Self { policy }
    }

    /// The outcome this approver picks for `request`.
    #[must_use]
    pub fn outcome_for(&self, request: &PermissionRequest) -> PermissionOutcome {
        let allowed = match self.policy {
            AutoPolicy::Allow => request.first_allow(),
            AutoPolicy::Reject => None,
        };
        let chosen = allowed.or_else(|| request.options.iter().find(|opt| !opt.kind.is_allow()));
        match chosen {
            Some(option) => PermissionOutcome::Selected {
                option_id: option.option_id.clone(),
            },
            None => PermissionOutcome::Cancelled,
        }
    }
}

impl PermissionApprover for AutoApprover {
    fn decide(&self, request: PermissionRequest) -> DelegateFuture<'_, PermissionOutcome> {
        let outcome = self.outcome_for(&request);
        info!(session_id = %request.session_id, policy = ?self.policy, ?outcome, "permission auto-decided");
        Box::pin(async move { Result::Ok(outcome) })
    }
}
