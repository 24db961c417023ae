use std::net::SocketAddr;
use thiserror::Error;

/// A probing error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A probing error.
///
/// Probe outcomes are never errors; these cover misuse of the API and
/// failures reported by collaborators.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("unknown path: {0}")]
    UnknownPath(SocketAddr),
    #[error("path {0} already exists")]
    DuplicatePath(SocketAddr),
    #[error("association has no paths")]
    NoPaths,
    #[error("association is already up")]
    AlreadyUp,
    #[error("probe failed to send: {0}")]
    ProbeFailed(String),
    #[error("session closed")]
    SessionClosed,
    #[error("probing error: {0}")]
    Other(String),
}
