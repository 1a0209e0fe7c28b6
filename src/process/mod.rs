//! One-shot subprocess helpers.
//!
//! - `executor`: run a command to completion with output capture and a hard timeout.
//! - `shell_env`: import the user's login-shell environment for spawned agents.

pub mod executor;
pub mod shell_env;
