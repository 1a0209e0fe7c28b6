//! Agent Client Protocol (ACP) engine.
//!
//! Bidirectional JSON-RPC 2.0 over the agent's stdio, one JSON document per
//! line. The host calls the agent (`initialize`, `session/*`), the agent
//! streams `session/update` notifications back, and it calls into the host
//! for files, terminals, and permission prompts.
//!
//! - `codec`: NDJSON framing and message classification.
//! - `correlator`: request id allocation and response matching.
//! - `router`: inbound request dispatch to a [`router::ClientDelegate`].
//! - `connection`: the single task owning all of the above per agent.
//! - `writer`: the task that writes queued lines to the agent's stdin.
//! - `spawner`: agent process launch.
//! - `client`: [`client::AgentClient`], the typed façade.

pub mod client;
pub mod codec;
pub mod connection;
pub mod correlator;
pub mod router;
pub mod spawner;
pub mod writer;

pub use client::{AgentClient, ClientOptions, NotificationStream};
pub use router::ClientDelegate;
