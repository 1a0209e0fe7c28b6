//! Host-side capabilities offered to the agent.
//!
//! - `fs`: text file read/write.
//! - `permission`: approvers for permission prompts.
//! - `delegate`: [`HostDelegate`], the stock capability handler set.

pub mod delegate;
pub mod fs;
pub mod permission;

pub use delegate::HostDelegate;
