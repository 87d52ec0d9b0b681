use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::chunk::ChunkError;

/// Crate-wide error type for `call-media`.
///
/// Data-plane faults (malformed chunks, stale/duplicate objects) are meant
/// to be recovered locally by their component and never reach this type;
/// this enum is for control-plane and session-level faults that a caller
/// needs to see.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The session is not in a state that permits the requested operation.
    NotConnected,
    /// A `SUBSCRIBE` or `ANNOUNCE` referenced a namespace/track this session
    /// does not own or does not recognize.
    ProtocolViolation(String),
    /// A chunk failed to round-trip through the wire codec.
    MalformedChunk(ChunkError),
    /// A control-plane operation (e.g. catalog subscribe) did not complete
    /// within its timeout.
    Timeout(String),
    /// Catalog JSON failed to parse.
    Json(Arc<serde_json::Error>),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "session is not connected"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::MalformedChunk(err) => write!(f, "malformed chunk: {err}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ChunkError> for Error {
    fn from(err: ChunkError) -> Self {
        Self::MalformedChunk(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
