//! The stock [`ClientDelegate`]: local files, managed terminals, and a
//! pluggable permission approver.

use std::sync::Arc;

use crate::acp::router::{ClientDelegate, DelegateFuture};
use crate::host::fs::FileAccess;
use crate::host::permission::PermissionApprover;
use crate::models::permission::{PermissionOutcome, PermissionRequest};
use crate::models::protocol::{ReadTextFileRequest, ReadTextFileResponse, WriteTextFileRequest};
use crate::models::terminal::{
    CreateTerminalRequest, CreateTerminalResponse, TerminalExitStatus, TerminalOutputResponse,
    TerminalRequest,
};
use crate::terminal::TerminalManager;

/// Host-side capability handlers for one agent.
#[derive(Clone)]
pub struct HostDelegate {
    files: FileAccess,
    terminals: TerminalManager,
    approver: Arc<dyn PermissionApprover>,
}

impl std::fmt::Debug for HostDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDelegate")
            .field("files", &self.files)
            .field("terminals", &self.terminals)
            .finish_non_exhaustive()
    }
}

impl HostDelegate {
    /// Compose the delegate.
    #[must_use]
    pub fn new(
        files: FileAccess,
        terminals: TerminalManager,
        approver: Arc<dyn PermissionApprover>,
    ) -> Self {
        Self {
            files,
            terminals,
            approver,
        }
    }

    /// The terminal manager, e.g. for late reads of released output.
    #[must_use]
    pub fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }
}

impl ClientDelegate for HostDelegate {
    fn read_text_file(
        &self,
        request: ReadTextFileRequest,
    ) -> DelegateFuture<'_, ReadTextFileResponse> {
        Box::pin(async move { self.files.read_text_file(&request).await })
    }

    fn write_text_file(&self, request: WriteTextFileRequest) -> DelegateFuture<'_, ()> {
        Box::pin(self.files.write_text_file(request))
    }

    fn create_terminal(
        &self,
        request: CreateTerminalRequest,
    ) -> DelegateFuture<'_, CreateTerminalResponse> {
        Box::pin(async move {
            let terminal_id = self.terminals.create(request).await?;
            Ok(CreateTerminalResponse { terminal_id })
        })
    }

    fn terminal_output(
        &self,
        request: TerminalRequest,
    ) -> DelegateFuture<'_, TerminalOutputResponse> {
        Box::pin(async move { self.terminals.output(&request.terminal_id).await })
    }

    fn wait_for_terminal_exit(
        &self,
        request: TerminalRequest,
    ) -> DelegateFuture<'_, TerminalExitStatus> {
        Box::pin(async move { self.terminals.wait_for_exit(&request.terminal_id).await })
    }

    fn kill_terminal(&self, request: TerminalRequest) -> DelegateFuture<'_, ()> {
        Box::pin(async move { self.terminals.kill(&request.terminal_id).await })
    }

    fn release_terminal(&self, request: TerminalRequest) -> DelegateFuture<'_, ()> {
        Box::pin(async move { self.terminals.release(&request.terminal_id).await })
    }

    fn request_permission(
        &self,
        request: PermissionRequest,
    ) -> DelegateFuture<'_, PermissionOutcome> {
        self.approver.decide(request)
    }
}
