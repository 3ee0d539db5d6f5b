//! Crate-wide error type for synchronous submission failures.
//!
//! Asynchronous terminal states (`timeout`, `abort`, the CU-reported
//! `error`) are *not* represented here — they travel on the command
//! itself as a [`crate::command::CommandState`] and are observed
//! through the completion path, not through a `Result`. This enum only
//! covers the failures a caller sees synchronously, matching the table
//! in the error handling design.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("allocation failed: {0}")]
    NoMem(String),

    #[error("resource busy: {0}")]
    Busy(String),

    #[error("no such entity: {0}")]
    NoEnt(String),

    #[error("CU is in bad state")]
    BadState,

    #[error("scheduler is in a bad state, deadlock avoided")]
    Deadlock,

    #[error("a worker thread panicked while holding a lock")]
    PoisonedLock,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Error {
        Error::PoisonedLock
    }
}
