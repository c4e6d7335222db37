use thiserror::Error;

use crate::codec::DecodeError;
use crate::facility::StateError;
use crate::semantics::client::ClientError;
use crate::time::TimeError;

/// Crate-wide error type, composing every component-local error enum.
///
/// Library-internal code matches on the specific `DecodeError`/`TimeError`/`StateError`
/// variants directly; this umbrella exists for the binaries and for callers that just
/// want a single `Result` type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed datagram: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid time slot: {0}")]
    Time(#[from] TimeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("client protocol error: {0}")]
    Client(#[from] ClientError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
