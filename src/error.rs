//! Crate-level error type for setup and transport-facing failures.
//!
//! This is distinct from [`crate::outcome::Failure`]: `Error` is for things
//! that go wrong *building or driving* the multiplexer (a misconfigured
//! pool, a node that never replies to a multi-endpoint request at all), not
//! for a single target's operation failing, which always becomes a
//! structured [`crate::outcome::Failure`] instead of an `Err`.

use crate::id::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker pool prefix {prefix:?} must have a positive size, got {size}")]
    InvalidPoolSize { prefix: String, size: usize },

    #[error("node {0} is unreachable")]
    NodeDown(NodeId),

    #[error("delegate {0} has already been registered")]
    DuplicateDelegate(String),

    #[error("no delegate registered under name {0}")]
    UnknownDelegate(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
