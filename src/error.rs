//! Shared error types. The operation algebra's own length-mismatch fault
//! (`operation::OpError`) is a programmer-visible assertion failure; this
//! module covers the faults that originate at or above the protocol
//! boundary and that the connection manager must turn into a user-visible
//! event (§7).
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unexpected message discriminator: {0}")]
    UnexpectedDiscriminator(String),

    #[error("history gap: local revision {local_revision} but server history starts at {server_start}")]
    HistoryGap { local_revision: u32, server_start: u32 },

    #[error("client desynchronized, restart required")]
    Desynchronized,
}
