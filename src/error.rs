//! Error kinds surfaced by the core.
//!
//! Every operation returns one of four semantic kinds. Conflicts are terminal
//! for the request that hit them; the caller decides whether to retry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the boundary layer to pick a transport code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

/// State conflicts detected against the current ledger or membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("Already a member of this group")]
    AlreadyMember,

    #[error("Group is full")]
    GroupFull,

    #[error("Task already completed today")]
    AlreadyCompletedToday,

    #[error("Completion already verified")]
    AlreadyVerified,

    #[error("You cannot verify your own completion")]
    SelfVerification,

    #[error("User with this email already exists")]
    EmailTaken,

    #[error("Username already taken")]
    UsernameTaken,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// The standard rejection for callers outside the group.
    pub fn not_a_member() -> Self {
        Error::Forbidden("You are not a member of this group".to_string())
    }

    /// Returns the conflict if this error is one.
    pub fn as_conflict(&self) -> Option<Conflict> {
        match self {
            Error::Conflict(c) => Some(*c),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Internal(format!("database error: {}", e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("task join error: {}", e))
    }
}
