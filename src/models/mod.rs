//! Domain model module declarations.

pub mod message;
pub mod permission;
pub mod protocol;
pub mod terminal;
pub mod tool_call;
