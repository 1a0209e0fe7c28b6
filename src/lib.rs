#![forbid(unsafe_code)]

//! Host-side engine for the Agent Client Protocol.
//!
//! Launches an agent subprocess, speaks NDJSON JSON-RPC over its stdio,
//! serves the agent's file, terminal, and permission requests, and folds
//! session updates into observable state.

pub mod acp;
pub mod config;
pub mod errors;
pub mod host;
pub mod models;
pub mod process;
pub mod session;
pub mod terminal;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
