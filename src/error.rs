//! Error taxonomy for the capture client.

use thiserror::Error;

/// Failure of a message or tuple decode. Fatal for the run: a shape mismatch
/// between the publication and what the client expects cannot be interpreted
/// safely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unexpected tuple marker {0:#04x} in insert message")]
    UnexpectedTupleMarker(u8),

    #[error("unknown tuple field kind {0:#04x}")]
    UnknownFieldKind(u8),

    #[error("expected {expected} row fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {ordinal}: expected a binary value, found {found}")]
    FieldKind { ordinal: usize, found: &'static str },

    #[error("field {ordinal}: {reason}")]
    Malformed { ordinal: usize, reason: String },
}

/// Top-level error type for a capture run.
///
/// Connectivity problems are transient from the system's point of view, but the
/// run never retries internally: restarting from the last acknowledged position
/// is the only retry, and that belongs to an external supervisor.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("slot state: {0}")]
    SlotState(String),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("event sink: {0}")]
    Sink(#[source] anyhow::Error),

    #[error("position store: {0}")]
    PositionStore(#[source] anyhow::Error),
}

impl From<postgres::Error> for CaptureError {
    fn from(err: postgres::Error) -> Self {
        CaptureError::Connectivity(err.to_string())
    }
}
