//! Terminals run on behalf of the agent.
//!
//! - `manager`: actor owning every terminal process and its output.
//! - `buffer`: UTF-8 aware output accumulation with front truncation.
//! - `command_line`: shell-style command splitting.
//! - `resolve`: executable lookup.

pub mod buffer;
pub mod command_line;
pub mod manager;
pub mod resolve;

pub use manager::{TerminalManager, TerminalSettings};
