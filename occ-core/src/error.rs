//! Caller-facing error types. Background workers use `anyhow` internally
//! (see `sweeper.rs`, `status_scheduler.rs`) and never let failures escape
//! to a caller; this module is only for the synchronous request surface.

use thiserror::Error;

/// Errors returned across the facade boundary (`handle_scan` and friends).
/// These are the language-neutral kinds named in the error handling design:
/// reported to the caller, never silently swallowed, never retried here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScanError {
    #[error("token does not resolve to a known occupant")]
    InvalidToken,

    #[error("space is not open: {message}")]
    RejectedClosed { message: String },

    #[error("space is full and no session is evictable")]
    RejectedFullAndUnremovable,

    #[error("occupant already has an open session")]
    AlreadyInside,

    #[error("occupant has no open session")]
    NotInside,

    #[error("value out of documented bounds: {0}")]
    OutOfRange(String),

    #[error("invalid status value")]
    InvalidStatus,

    #[error("time must be in HH:MM format")]
    InvalidTimeFormat,

    #[error("persistence store is unavailable")]
    PersistenceUnavailable,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
