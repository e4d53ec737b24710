//! Client-side operational-transformation engine for a real-time
//! collaborative plain-text editor: the operation algebra, the
//! outstanding/buffer reconciliation state machine, presence/cursor
//! tracking, and the WebSocket connection manager that ties them to a
//! server.

pub mod client;
pub mod codepoint;
pub mod config;
pub mod connection;
pub mod editor;
pub mod error;
pub mod logging;
pub mod operation;
pub mod presence;
pub mod protocol;
